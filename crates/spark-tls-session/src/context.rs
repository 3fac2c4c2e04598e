//! 调用上下文：取消令牌与截止时间。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手与记录 I/O 都可能长时间阻塞在网络上，调用方需要一种不依赖丢弃 Future 的方式中止操作；
//! - 取消或超时一旦发生，会话进入失效状态，后续调用得到状态错误。
//!
//! ## 逻辑（How）
//! - [`Cancellation`] 以共享的 `AtomicBool` 表达取消标记，子令牌与父令牌共享同一原子位；
//! - [`run_with_context`] 先检查截止与取消，再以 `tokio::select!` 同时等待取消轮询、截止计时与实际 I/O；
//! - 取消采用定时轮询，避免为每次 I/O 额外创建任务。
//!
//! ## 契约（What）
//! - 截止时间已过或取消已触发时，立即返回对应错误且不执行 I/O；
//! - I/O 失败映射为 [`TlsSessionError::Transport`]，携带操作名称。
//!
//! ## 风险与权衡（Trade-offs）
//! - 轮询取消存在毫秒级延迟。

use std::{
    future::Future,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;

use crate::error::TlsSessionError;

const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// 取消令牌。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// 标记取消，返回 `true` 表示本次调用首次触发。
    pub fn cancel(&self) -> bool {
        self.inner
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// 单次调用的上下文。
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancellation: Cancellation,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 以绝对时间点设置截止。
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 以相对当前时刻的时长设置截止。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn deadline_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// 在执行任何 I/O 之前检查取消与截止。
    pub(crate) fn check(&self, operation: &'static str) -> Result<(), TlsSessionError> {
        if self.deadline_expired() {
            return Err(TlsSessionError::TimedOut { operation });
        }
        if self.cancellation.is_cancelled() {
            return Err(TlsSessionError::Cancelled { operation });
        }
        Ok(())
    }
}

/// 在调用上下文约束下执行一次 I/O。
pub(crate) async fn run_with_context<F, T>(
    ctx: &CallContext,
    operation: &'static str,
    future: F,
) -> Result<T, TlsSessionError>
where
    F: Future<Output = io::Result<T>>,
{
    ctx.check(operation)?;

    let cancel = wait_for_cancellation(ctx.cancellation());
    tokio::pin!(cancel);
    tokio::pin!(future);

    if let Some(deadline) = ctx.deadline() {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        tokio::select! {
            biased;
            _ = &mut cancel => Err(TlsSessionError::Cancelled { operation }),
            _ = &mut sleep => Err(TlsSessionError::TimedOut { operation }),
            result = &mut future => result.map_err(|err| TlsSessionError::transport(operation, err)),
        }
    } else {
        tokio::select! {
            biased;
            _ = &mut cancel => Err(TlsSessionError::Cancelled { operation }),
            result = &mut future => result.map_err(|err| TlsSessionError::transport(operation, err)),
        }
    }
}

async fn wait_for_cancellation(cancellation: &Cancellation) {
    while !cancellation.is_cancelled() {
        tokio::time::sleep(CANCELLATION_POLL_INTERVAL).await;
    }
}
