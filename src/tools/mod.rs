//! 工具层：注册表、执行器（ActionExecutor 实现）、输出 Schema；具体文件 / 命令类工具由宿主注册

pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::{ActionExecutor, ToolExecutor};
pub use registry::{Tool, ToolRegistry};
pub use schema::{plan_schema_json, tool_call_schema_json};
