//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为会话编排层对外暴露的失败语义提供集中定义，调用方只需匹配一个枚举即可区分配置、凭证、协议、校验、传输与状态六类故障；
//! - 每个变体提供稳定错误码，便于日志检索与告警聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`，可直接通过 `?` 传播；
//! - [`TlsSessionError::category`] 给出粗粒度类别，[`TlsSessionError::code`] 给出细粒度稳定码；
//! - 状态类错误（[`StateViolation`]）属于调用方编程错误，产生时不会修改会话状态。
//!
//! ## 扩展建议（How）
//! - 新增变体时同步补充 `code()` 与 `category()` 的映射，并在单元测试中锁定错误码字符串。

use std::{fmt, io};

use thiserror::Error;

use crate::{alert::AlertDescription, chain::ChainStatusFlags, validator::PolicyErrors};

/// 错误类别，对应会话失败的六个来源。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// 选项冲突或配置非法，在任何 I/O 之前抛出。
    Configuration,
    /// 本地证书或凭证不可用。
    Credential,
    /// 安全提供者报告的握手或记录层失败。
    Protocol,
    /// 对端证书被拒绝。
    Validation,
    /// 底层字节流失败、调用被取消或超时。
    Transport,
    /// 在错误的会话阶段调用了操作。
    State,
}

/// 凭证失败的具体原因。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CredentialFailure {
    /// 服务端没有任何来源能给出带私钥的证书。
    NoServerCertificate,
    /// 安全提供者拒绝为所选证书构造凭证。
    AcquireFailed { diagnostic: String },
}

impl fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoServerCertificate => f.write_str("服务端没有可用的带私钥证书"),
            Self::AcquireFailed { diagnostic } => write!(f, "凭证构造失败: {diagnostic}"),
        }
    }
}

/// 会话状态违例。
///
/// - **意图 (Why)**：把“在错误阶段调用 API”的情形与真实 I/O 故障区分开，调用方可据此修正调用顺序；
/// - **契约 (What)**：除 [`StateViolation::Faulted`] 外，产生这些违例时会话状态保持不变；
/// - **风险 (Trade-offs)**：`Faulted` 携带首个致命错误的错误码与描述，后续调用都只能看到这份快照。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateViolation {
    NotAuthenticated,
    AlreadyAuthenticated,
    HandshakeInProgress,
    AlreadyShutdown,
    ReentrantRead,
    ReentrantWrite,
    Faulted { code: &'static str, detail: String },
}

impl StateViolation {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "tls.state.not_authenticated",
            Self::AlreadyAuthenticated => "tls.state.already_authenticated",
            Self::HandshakeInProgress => "tls.state.handshake_in_progress",
            Self::AlreadyShutdown => "tls.state.already_shutdown",
            Self::ReentrantRead => "tls.state.reentrant_read",
            Self::ReentrantWrite => "tls.state.reentrant_write",
            Self::Faulted { .. } => "tls.state.faulted",
        }
    }
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => f.write_str("会话尚未完成认证"),
            Self::AlreadyAuthenticated => f.write_str("会话已经完成认证"),
            Self::HandshakeInProgress => f.write_str("握手仍在进行中"),
            Self::AlreadyShutdown => f.write_str("会话已经关闭"),
            Self::ReentrantRead => f.write_str("已有一个读操作在进行"),
            Self::ReentrantWrite => f.write_str("已有一个写操作在进行"),
            Self::Faulted { code, detail } => write!(f, "会话已因 `{code}` 失效: {detail}"),
        }
    }
}

/// 会话编排层的统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合握手、记录层与证书校验路径上的所有失败，调用方无需关心是哪一个子组件抛出；
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可跨任务传播；
///   - 除 [`TlsSessionError::State`] 外，任何错误都会使会话进入失效状态；
/// - **执行逻辑 (How)**：变体携带结构化上下文，`code()` 映射为稳定字符串，`category()` 映射为粗粒度类别；
/// - **设计权衡 (Trade-offs)**：描述以 `String` 保存，牺牲少量分配换取可读的诊断信息。
#[derive(Debug, Error)]
pub enum TlsSessionError {
    /// 选项非法或互相冲突。
    ///
    /// - **意图 (Why)**：在任何 I/O 发生前拒绝无法工作的配置；
    /// - **契约 (What)**：`detail` 说明冲突的字段；会话状态保持 `Created`。
    #[error("TLS 会话配置非法: {detail}")]
    Configuration { detail: String },

    /// 本地凭证不可用。
    ///
    /// - **意图 (Why)**：区分“找不到证书”与“协议失败”，前者通常需要运维补齐证书；
    /// - **契约 (What)**：`reason` 给出具体原因。
    #[error("本地凭证不可用: {reason}")]
    Credential { reason: CredentialFailure },

    /// 安全提供者报告的协议失败。
    ///
    /// - **意图 (Why)**：握手与记录层失败都来自后端，统一收敛到一个变体；
    /// - **契约 (What)**：`status` 为后端状态的稳定名称，`detail` 为后端诊断；
    /// - **风险 (Trade-offs)**：诊断文本来自后端，不保证跨后端一致。
    #[error("TLS 协议失败（{status}）: {detail}")]
    Protocol { status: &'static str, detail: String },

    /// 对端证书被拒绝。
    ///
    /// - **意图 (Why)**：携带策略错误与链状态，调用方可据此决定是否提示用户或记录审计；
    /// - **契约 (What)**：`alert` 为已经（或尝试）发送给对端的告警。
    #[error("对端证书校验失败: {policy_errors}（链状态: {chain_status}）")]
    Validation {
        policy_errors: PolicyErrors,
        chain_status: ChainStatusFlags,
        alert: Option<AlertDescription>,
    },

    /// 底层字节流失败。
    #[error("底层传输在 `{operation}` 阶段失败: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// 调用方通过取消令牌中止了操作。
    #[error("`{operation}` 已被调用方取消")]
    Cancelled { operation: &'static str },

    /// 操作超过了调用上下文的截止时间。
    #[error("`{operation}` 超过截止时间")]
    TimedOut { operation: &'static str },

    /// 在错误的会话阶段调用了操作。
    #[error("会话状态不允许该操作: {violation}")]
    State { violation: StateViolation },
}

impl TlsSessionError {
    /// 构造配置错误。
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    /// 构造协议错误。
    pub fn protocol(status: &'static str, detail: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            detail: detail.into(),
        }
    }

    /// 构造状态错误。
    pub fn state(violation: StateViolation) -> Self {
        Self::State { violation }
    }

    /// 构造传输错误。
    pub fn transport(operation: &'static str, source: io::Error) -> Self {
        Self::Transport { operation, source }
    }

    /// 返回粗粒度类别。
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Credential { .. } => ErrorCategory::Credential,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Transport { .. } | Self::Cancelled { .. } | Self::TimedOut { .. } => {
                ErrorCategory::Transport
            }
            Self::State { .. } => ErrorCategory::State,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "tls.config.invalid",
            Self::Credential {
                reason: CredentialFailure::NoServerCertificate,
            } => "tls.credential.no_server_certificate",
            Self::Credential { .. } => "tls.credential.acquire_failed",
            Self::Protocol { .. } => "tls.protocol.failed",
            Self::Validation { .. } => "tls.validation.rejected",
            Self::Transport { .. } => "tls.transport.io",
            Self::Cancelled { .. } => "tls.transport.cancelled",
            Self::TimedOut { .. } => "tls.transport.timeout",
            Self::State { violation } => violation.code(),
        }
    }

    /// 若为状态错误，返回违例详情。
    pub fn state_violation(&self) -> Option<&StateViolation> {
        match self {
            Self::State { violation } => Some(violation),
            _ => None,
        }
    }
}
