#![doc = r#"
# spark-tls-session

## 设计动机（Why）
- **编排而非密码学**：握手密码学与记录加解密由可插拔的 [`SecurityProvider`] 后端完成，本 crate 负责驱动握手、挑选证书、复用凭证与校验对端证书；
- **凭证复用**：相同证书、协议范围、角色与加密策略的会话共享一份后端凭证，避免每次握手都重新装载私钥；
- **热更新**：服务端选项可通过 [`HotReloadingServerOptions`] 在不中断现有会话的情况下替换证书。

## 核心契约（What）
- [`TlsStream`]：包装任意 `AsyncRead + AsyncWrite` 字节流，提供 `authenticate_as_client` / `authenticate_as_server`、`read`、`write`、`shutdown`；
- [`CredentialCache`]：以 [`CredentialFingerprint`] 为键、引用计数为生命周期的跨会话凭证缓存；
- [`CertificateSelector`] 与 [`CertificateValidator`]：本地证书选择与对端证书校验，二者都依赖外部 [`ChainValidator`] 构建证书链；
- [`HandshakeEngine`]：不做 I/O 的握手状态机，可单独测试；
- 错误统一为 [`TlsSessionError`]，每个变体带稳定错误码。

## 实现策略（How）
- 记录按 5 字节头部分帧，解密后多余的明文暂存在残留缓冲中并在读空后归还缓冲池；
- `run_with_context` 为所有 I/O 注入 [`CallContext`] 的取消与截止；
- 日志统一走 `tracing`，握手完成、证书拒绝与会话失效分别以 info/warn 级别记录。

## 风险与考量（Trade-offs）
- 后端接口为同步调用，耗时的签名操作会占用 Tokio 工作线程；
- 轮询式取消存在毫秒级延迟；
- 证书解析与链构建不在本 crate 内实现，[`Certificate`] 仅携带 DER 与主体/颁发者名称。
"#]

mod alert;
mod cache;
mod certificate;
mod chain;
mod config;
mod context;
mod engine;
mod error;
mod hot_reload;
mod options;
mod provider;
mod record;
mod selector;
mod services;
mod stream;
mod validator;

pub use alert::{AlertDescription, AlertLevel};
pub use cache::{CacheStats, Credential, CredentialCache, CredentialFingerprint};
pub use certificate::{
    Certificate, CertificateContext, CertificateStore, MemoryCertificateStore, StoreLocation,
    Thumbprint, find_certificate_with_private_key,
};
pub use chain::{
    CLIENT_AUTH_OID, ChainOutcome, ChainRequest, ChainStatusFlags, ChainValidator,
    RevocationScope, SERVER_AUTH_OID,
};
pub use config::TlsSessionConfig;
pub use context::{CallContext, Cancellation};
pub use engine::{
    HandshakeEngine, HandshakeState, HandshakeToken, NegotiatedParameters, RemoteVerification,
    TokenOutcome, ValidationSummary,
};
pub use error::{CredentialFailure, ErrorCategory, StateViolation, TlsSessionError};
pub use hot_reload::HotReloadingServerOptions;
pub use options::{
    CertificateSelectionRequest, EncryptionPolicy, LocalCertificateSelection,
    RemoteCertificateReview, RemoteCertificateValidation, RevocationMode, Role,
    ServerCertificateSelection, SessionOptions, SslProtocols,
};
pub use provider::{
    CipherSuite, CredentialRequest, HandshakeStepOutput, HandshakeStepRequest, NegotiatedInfo,
    ProviderCapabilities, ProviderError, RemoteCertificate, SecurityProvider, SecurityStatus,
    StreamSizes,
};
pub use record::{
    ContentType, DecryptedResidue, MAX_RECORD_PAYLOAD, RECORD_HEADER_SIZE, RecordBufferPool,
    RecordHeader,
};
pub use selector::{CertificateSelector, ClientCertificateChoice, SelectionHints};
pub use services::TlsServices;
pub use stream::{SessionPhase, TlsStream};
pub use validator::{
    CertificateValidator, PolicyErrors, ValidationOutcome, alert_for_chain_status,
    alert_for_policy_errors,
};
