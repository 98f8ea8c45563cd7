//! 运行监管：取消令牌与协作方调用的超时 / 中断
//!
//! 每次运行持有一个 CancellationToken；reset 时取消它，正在进行的计划生成、会话轮次、工具执行
//! 都会被中断（对应 future 被丢弃），而不是等结果回来再忽略。

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{ExecutionError, PlanningError, TurnError};

/// 协作方调用被打断的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

impl From<Interrupt> for PlanningError {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Cancelled => PlanningError::Cancelled,
            Interrupt::TimedOut(d) => PlanningError::Timeout(d),
        }
    }
}

impl From<Interrupt> for TurnError {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Cancelled => TurnError::Cancelled,
            Interrupt::TimedOut(d) => TurnError::Timeout(d),
        }
    }
}

impl From<Interrupt> for ExecutionError {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Cancelled => ExecutionError::Cancelled,
            Interrupt::TimedOut(d) => ExecutionError::Timeout(format!("no result after {d:?}")),
        }
    }
}

#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 取消当前运行，并换上新的令牌供下一次运行使用
    pub fn cancel_and_renew(&mut self) {
        self.cancel_token.cancel();
        self.cancel_token = CancellationToken::new();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 在取消令牌与可选超时下执行一次协作方调用
pub async fn guarded<F, T>(
    token: &CancellationToken,
    limit: Option<Duration>,
    fut: F,
) -> Result<T, Interrupt>
where
    F: Future<Output = T>,
{
    if token.is_cancelled() {
        return Err(Interrupt::Cancelled);
    }
    match limit {
        Some(limit) => tokio::select! {
            _ = token.cancelled() => Err(Interrupt::Cancelled),
            res = tokio::time::timeout(limit, fut) => res.map_err(|_| Interrupt::TimedOut(limit)),
        },
        None => tokio::select! {
            _ = token.cancelled() => Err(Interrupt::Cancelled),
            res = fut => Ok(res),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_passes_through() {
        let token = CancellationToken::new();
        let res = guarded(&token, None, async { 7 }).await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn test_guarded_times_out() {
        let token = CancellationToken::new();
        let limit = Duration::from_millis(10);
        let res = guarded(&token, Some(limit), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert_eq!(res, Err(Interrupt::TimedOut(limit)));
    }

    #[tokio::test]
    async fn test_guarded_observes_cancellation() {
        let mut supervisor = SessionSupervisor::new();
        let token = supervisor.cancel_token();
        let handle = tokio::spawn(async move {
            guarded(&token, None, std::future::pending::<()>()).await
        });
        supervisor.cancel_and_renew();
        assert_eq!(handle.await.unwrap(), Err(Interrupt::Cancelled));
        assert!(!supervisor.is_cancelled());
    }
}
