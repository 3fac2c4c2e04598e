//! 安全提供者（Security Provider）后端抽象。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 真正的握手密码学、记录加解密与告警编码由平台或纯 Rust 后端完成，会话层只负责驱动与编排；
//! - 以关联类型表达“凭证句柄”与“安全上下文”，编排层无需知道后端内部结构即可保证所有权正确。
//!
//! ## 逻辑（How）
//! - [`SecurityProvider::step_handshake`] 接收 `&mut Option<Context>`，首次调用时由后端创建上下文；
//! - 记录加解密直接写入调用方提供的 `BytesMut`，便于复用缓冲池；
//! - 能力位（[`ProviderCapabilities`]）告诉编排层后端是否支持“先匿名再补证书”以及是否能加密空消息。
//!
//! ## 契约（What）
//! - 所有方法都是同步调用，编排层在调用期间持有会话内的独占锁，不会对同一上下文并发调用；
//! - 任何失败都以 [`SecurityStatus::Error`] 或 [`ProviderError`] 返回，后端不得 panic；
//! - 后端若需要在上下文中长期持有凭证，应调用 [`Credential::acquire`] 自行增加引用。
//!
//! ## 风险与权衡（Trade-offs）
//! - 同步接口意味着后端中的阻塞操作（例如硬件密钥签名）会占用当前 Tokio 工作线程；
//!   需要长耗时签名的后端应在内部自行卸载。

use std::fmt;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{
    alert::{AlertDescription, AlertLevel},
    cache::Credential,
    certificate::Certificate,
    options::{EncryptionPolicy, Role, SessionOptions, SslProtocols},
};

/// 后端一步操作的结果状态。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecurityStatus {
    /// 握手完成或记录处理成功。
    Ok,
    /// 握手需要更多来自对端的输入。
    ContinueNeeded,
    /// 客户端需要补充证书（对端请求了客户端证书）。
    CredentialsNeeded,
    /// 对端发起重新协商。
    Renegotiate,
    /// 对端关闭了会话（收到 `close_notify`）。
    ContextExpired,
    /// 终止性失败。
    Error { diagnostic: String },
}

impl SecurityStatus {
    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self::Error {
            diagnostic: diagnostic.into(),
        }
    }

    /// 稳定名称，用于日志字段与错误描述。
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ContinueNeeded => "continue_needed",
            Self::CredentialsNeeded => "credentials_needed",
            Self::Renegotiate => "renegotiate",
            Self::ContextExpired => "context_expired",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error { diagnostic } => write!(f, "error: {diagnostic}"),
            other => f.write_str(other.label()),
        }
    }
}

/// 后端在非状态型接口上的失败。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("安全提供者在 `{operation}` 中失败: {diagnostic}")]
pub struct ProviderError {
    pub operation: &'static str,
    pub diagnostic: String,
}

impl ProviderError {
    pub fn new(operation: &'static str, diagnostic: impl Into<String>) -> Self {
        Self {
            operation,
            diagnostic: diagnostic.into(),
        }
    }
}

/// 记录层尺寸。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamSizes {
    pub header: usize,
    pub trailer: usize,
    pub maximum_message: usize,
}

impl StreamSizes {
    /// 单条记录可承载的最大明文，等于 `maximum_message - (header + trailer)`。
    ///
    /// 结果不为正时返回 `None`。
    pub fn max_plaintext(&self) -> Option<usize> {
        let overhead = self.header.checked_add(self.trailer)?;
        match self.maximum_message.checked_sub(overhead) {
            Some(0) | None => None,
            Some(size) => Some(size),
        }
    }
}

impl Default for StreamSizes {
    fn default() -> Self {
        Self {
            header: 5,
            trailer: 16,
            maximum_message: 16_354 + 5 + 16,
        }
    }
}

/// 密码套件标识（IANA 编号）。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);
    pub const TLS_NULL_WITH_NULL_NULL: Self = Self(0x0000);
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// 握手完成后由后端报告的协商结果。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NegotiatedInfo {
    pub sizes: StreamSizes,
    pub cipher_suite: CipherSuite,
    pub protocol_version: SslProtocols,
    pub application_protocol: Option<Bytes>,
}

/// 对端出示的证书：叶子证书加随附的中间证书。
#[derive(Clone, Debug)]
pub struct RemoteCertificate {
    pub leaf: Certificate,
    pub extra: Vec<Certificate>,
}

/// 后端能力位。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProviderCapabilities {
    /// 支持先以匿名凭证握手，待对端请求证书后再补充。
    pub start_mutual_auth_as_anonymous: bool,
    /// 能够为零长度明文生成记录。
    pub can_encrypt_empty_message: bool,
}

/// 构造凭证所需的参数。
#[derive(Clone, Copy, Debug)]
pub struct CredentialRequest<'a> {
    pub role: Role,
    pub certificate: Option<&'a Certificate>,
    pub protocols: SslProtocols,
    pub encryption_policy: EncryptionPolicy,
}

/// 一次握手推进的输入。
pub struct HandshakeStepRequest<'a, H> {
    pub role: Role,
    pub credential: &'a Credential<H>,
    pub options: &'a SessionOptions,
    /// 来自对端的完整记录，首个客户端步骤为空。
    pub inbound: &'a [u8],
}

/// 一次握手推进的输出。
#[derive(Clone, Debug)]
pub struct HandshakeStepOutput {
    pub status: SecurityStatus,
    pub outbound: Bytes,
}

impl HandshakeStepOutput {
    pub fn new(status: SecurityStatus, outbound: impl Into<Bytes>) -> Self {
        Self {
            status,
            outbound: outbound.into(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            status: SecurityStatus::error(diagnostic),
            outbound: Bytes::new(),
        }
    }
}

/// 安全提供者后端。
pub trait SecurityProvider: Send + Sync + 'static {
    /// 后端凭证句柄，由凭证缓存跨会话共享。
    type Credential: Send + Sync + 'static;
    /// 每个会话独占的安全上下文。
    type Context: Send + 'static;

    /// 为所选证书（或匿名）构造凭证。
    fn acquire_credentials(
        &self,
        request: &CredentialRequest<'_>,
    ) -> Result<Self::Credential, ProviderError>;

    /// 推进一步握手；`context` 为 `None` 时由后端创建。
    fn step_handshake(
        &self,
        request: HandshakeStepRequest<'_, Self::Credential>,
        context: &mut Option<Self::Context>,
    ) -> HandshakeStepOutput;

    /// 加密一段明文并把完整记录追加到 `output`。
    fn encrypt_record(
        &self,
        context: &mut Self::Context,
        plaintext: &[u8],
        output: &mut BytesMut,
    ) -> SecurityStatus;

    /// 解密一条完整记录并把明文追加到 `plaintext`。
    fn decrypt_record(
        &self,
        context: &mut Self::Context,
        frame: &[u8],
        plaintext: &mut BytesMut,
    ) -> SecurityStatus;

    /// 查询协商结果。
    fn query_negotiated_info(&self, context: &Self::Context)
    -> Result<NegotiatedInfo, ProviderError>;

    /// 生成一条告警记录。
    fn apply_alert(
        &self,
        context: &mut Self::Context,
        level: AlertLevel,
        description: AlertDescription,
    ) -> Result<Bytes, ProviderError>;

    /// 生成关闭记录（`close_notify`）。
    fn apply_shutdown(&self, context: &mut Self::Context) -> Result<Bytes, ProviderError>;

    /// 对端出示的证书。
    fn remote_certificate(&self, context: &Self::Context) -> Option<RemoteCertificate>;

    /// 对端在证书请求中给出的可接受颁发者名称。
    fn requested_certificate_authorities(&self, context: &Self::Context) -> Vec<String>;

    /// 从首条客户端记录中提取 SNI 主机名，服务端据此选择证书。
    ///
    /// 不解析 SNI 的后端保持默认实现，服务端证书选择回调将收到 `None`。
    fn server_name_indication(&self, _client_hello: &[u8]) -> Option<String> {
        None
    }

    /// 上下文是否仍然有效，默认认为有效。
    fn is_context_valid(&self, _context: &Self::Context) -> bool {
        true
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }
}
