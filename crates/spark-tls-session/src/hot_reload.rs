use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{error::TlsSessionError, options::SessionOptions};

/// 服务端会话选项的热更新容器。
///
/// # 设计动机（Why）
/// - **零中断目标**：证书轮换时无需暂停监听，新会话读取最新选项，旧会话继续使用握手开始时的快照；
/// - **模式选择**：利用 `ArcSwap` 的“读无锁、写常数时间”特性，实现 RCU（Read-Copy-Update）式的选项广播。
///
/// # 核心契约（What）
/// - 容器内的选项始终是通过 [`SessionOptions::validate`] 的服务端选项；
/// - `replace` 校验失败时保持原快照不变并返回配置错误；
/// - [`TlsStream::authenticate_as_server_with`](crate::TlsStream::authenticate_as_server_with) 每次握手读取一次快照。
///
/// # 风险提示（Trade-offs & Gotchas）
/// - 高频替换时会暂存多份 `Arc<SessionOptions>`，内存峰值取决于并发握手数量。
#[derive(Clone)]
pub struct HotReloadingServerOptions {
    inner: Arc<ArcSwap<SessionOptions>>,
}

impl HotReloadingServerOptions {
    /// 基于已有的 `Arc<SessionOptions>` 构造热更容器。
    pub fn new(initial: Arc<SessionOptions>) -> Result<Self, TlsSessionError> {
        check_server_options(&initial)?;
        Ok(Self {
            inner: Arc::new(ArcSwap::new(initial)),
        })
    }

    /// 以值语义构造，语义与 [`Self::new`] 等价。
    #[inline]
    pub fn from_options(initial: SessionOptions) -> Result<Self, TlsSessionError> {
        Self::new(Arc::new(initial))
    }

    /// 获取当前选项的共享快照，仅增加引用计数。
    #[inline]
    pub fn snapshot(&self) -> Arc<SessionOptions> {
        self.inner.load_full()
    }

    /// 校验并替换当前选项，返回被替换下来的旧快照。
    pub fn replace(&self, next: Arc<SessionOptions>) -> Result<Arc<SessionOptions>, TlsSessionError> {
        check_server_options(&next)?;
        tracing::info!(
            protocols = %next.enabled_protocols(),
            "服务端会话选项已热更新"
        );
        Ok(self.inner.swap(next))
    }
}

fn check_server_options(options: &SessionOptions) -> Result<(), TlsSessionError> {
    if !options.is_server() {
        return Err(TlsSessionError::configuration(
            "热更新容器只接受服务端选项",
        ));
    }
    options.validate()
}

impl fmt::Debug for HotReloadingServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotReloadingServerOptions")
            .finish_non_exhaustive()
    }
}
