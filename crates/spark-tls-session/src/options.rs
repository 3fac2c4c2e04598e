//! 会话选项与策略回调。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 一次认证所需的全部输入集中在 [`SessionOptions`] 中：角色、目标主机、本地证书来源、校验回调与协议范围；
//! - 选项冲突必须在任何 I/O 之前暴露，因此提供 [`SessionOptions::validate`]。
//!
//! ## 逻辑（How）
//! - 通过 [`SessionOptions::client`] / [`SessionOptions::server`] 创建，再以 `with_*` 链式补充；
//! - 回调以 trait 对象保存，并为闭包提供 blanket 实现，调用方既可以写结构体也可以直接传闭包；
//! - 选项在握手开始时被包进 `Arc`，此后只读。
//!
//! ## 契约（What）
//! - 服务端证书选择回调与显式证书、证书上下文、本地选择回调互斥；
//! - 服务端至少需要一种证书来源；
//! - ALPN 协议名非空且不超过 255 字节。

use std::{fmt, ops::BitOr, sync::Arc};

use bytes::Bytes;
use serde::Deserialize;

use crate::{
    certificate::{Certificate, CertificateContext},
    chain::ChainStatusFlags,
    error::TlsSessionError,
    validator::PolicyErrors,
};

/// 会话角色。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_server(self) -> bool {
        matches!(self, Role::Server)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 启用的协议版本集合，空集合表示交给安全提供者按系统默认决定。
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct SslProtocols(u8);

impl SslProtocols {
    pub const SYSTEM_DEFAULT: Self = Self(0);
    pub const TLS10: Self = Self(1 << 0);
    pub const TLS11: Self = Self(1 << 1);
    pub const TLS12: Self = Self(1 << 2);
    pub const TLS13: Self = Self(1 << 3);

    const NAMED: [(SslProtocols, &'static str); 4] = [
        (Self::TLS10, "tls1.0"),
        (Self::TLS11, "tls1.1"),
        (Self::TLS12, "tls1.2"),
        (Self::TLS13, "tls1.3"),
    ];

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_system_default(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 按配置文件中的名称解析单个版本，大小写不敏感。
    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let normalized = lowered.strip_prefix("tlsv").map_or(lowered.as_str(), |rest| rest);
        let normalized = normalized.strip_prefix("tls").unwrap_or(normalized);
        match normalized {
            "1.0" | "10" => Some(Self::TLS10),
            "1.1" | "11" => Some(Self::TLS11),
            "1.2" | "12" => Some(Self::TLS12),
            "1.3" | "13" => Some(Self::TLS13),
            _ => None,
        }
    }
}

impl BitOr for SslProtocols {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for SslProtocols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_system_default() {
            return f.write_str("system-default");
        }
        let mut first = true;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SslProtocols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SslProtocols({self})")
    }
}

/// 吊销检查模式。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationMode {
    #[default]
    NoCheck,
    Online,
    Offline,
}

/// 加密策略。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionPolicy {
    #[default]
    RequireEncryption,
    AllowNoEncryption,
    NoEncryption,
}

/// 客户端证书选择回调的输入。
#[derive(Clone, Copy, Debug)]
pub struct CertificateSelectionRequest<'a> {
    pub target_host: &'a str,
    pub candidates: &'a [Certificate],
    pub remote_certificate: Option<&'a Certificate>,
    pub acceptable_issuers: &'a [String],
}

/// 本地证书选择策略。
///
/// 客户端在每次刷新凭证时调用；服务端仅在未配置新式选择回调时作为兼容路径调用。
pub trait LocalCertificateSelection: Send + Sync {
    fn select(&self, request: &CertificateSelectionRequest<'_>) -> Option<Certificate>;
}

impl<F> LocalCertificateSelection for F
where
    F: Fn(&CertificateSelectionRequest<'_>) -> Option<Certificate> + Send + Sync,
{
    fn select(&self, request: &CertificateSelectionRequest<'_>) -> Option<Certificate> {
        self(request)
    }
}

/// 服务端按 SNI 主机名选择证书的策略。
pub trait ServerCertificateSelection: Send + Sync {
    fn select(&self, host_name: Option<&str>) -> Option<Certificate>;
}

impl<F> ServerCertificateSelection for F
where
    F: Fn(Option<&str>) -> Option<Certificate> + Send + Sync,
{
    fn select(&self, host_name: Option<&str>) -> Option<Certificate> {
        self(host_name)
    }
}

/// 对端证书复核回调的输入。
#[derive(Clone, Copy, Debug)]
pub struct RemoteCertificateReview<'a> {
    pub certificate: Option<&'a Certificate>,
    pub chain: &'a [Certificate],
    pub policy_errors: PolicyErrors,
    pub chain_status: ChainStatusFlags,
}

/// 对端证书校验策略，返回 `true` 表示接受。
///
/// 未配置时，只有 `policy_errors` 为空才接受。
pub trait RemoteCertificateValidation: Send + Sync {
    fn validate(&self, review: &RemoteCertificateReview<'_>) -> bool;
}

impl<F> RemoteCertificateValidation for F
where
    F: Fn(&RemoteCertificateReview<'_>) -> bool + Send + Sync,
{
    fn validate(&self, review: &RemoteCertificateReview<'_>) -> bool {
        self(review)
    }
}

/// 一次认证的完整选项。
///
/// # 契约（What）
/// - `remote_certificate_required`：客户端恒为 `true`，服务端默认 `false`，
///   可通过 [`SessionOptions::require_client_certificate`] 打开；
/// - `check_certificate_name`：客户端是否校验服务端证书与 `target_host` 匹配，默认开启；
/// - 其余字段缺省时交由安全提供者采用系统默认。
#[derive(Clone)]
pub struct SessionOptions {
    role: Role,
    target_host: String,
    client_certificates: Vec<Certificate>,
    server_certificate: Option<Certificate>,
    certificate_context: Option<CertificateContext>,
    local_certificate_selection: Option<Arc<dyn LocalCertificateSelection>>,
    server_certificate_selection: Option<Arc<dyn ServerCertificateSelection>>,
    remote_certificate_validation: Option<Arc<dyn RemoteCertificateValidation>>,
    remote_certificate_required: bool,
    check_certificate_name: bool,
    enabled_protocols: SslProtocols,
    revocation_mode: RevocationMode,
    encryption_policy: EncryptionPolicy,
    application_protocols: Vec<Bytes>,
}

impl SessionOptions {
    fn base(role: Role, target_host: String) -> Self {
        Self {
            role,
            target_host,
            client_certificates: Vec::new(),
            server_certificate: None,
            certificate_context: None,
            local_certificate_selection: None,
            server_certificate_selection: None,
            remote_certificate_validation: None,
            remote_certificate_required: !role.is_server(),
            check_certificate_name: true,
            enabled_protocols: SslProtocols::SYSTEM_DEFAULT,
            revocation_mode: RevocationMode::NoCheck,
            encryption_policy: EncryptionPolicy::RequireEncryption,
            application_protocols: Vec::new(),
        }
    }

    /// 客户端选项，`target_host` 同时用作 SNI 与主机名校验。
    pub fn client(target_host: impl Into<String>) -> Self {
        Self::base(Role::Client, target_host.into())
    }

    /// 服务端选项。
    pub fn server() -> Self {
        Self::base(Role::Server, String::new())
    }

    pub fn with_client_certificates(mut self, certificates: Vec<Certificate>) -> Self {
        self.client_certificates = certificates;
        self
    }

    pub fn with_server_certificate(mut self, certificate: Certificate) -> Self {
        self.server_certificate = Some(certificate);
        self
    }

    pub fn with_certificate_context(mut self, context: CertificateContext) -> Self {
        self.certificate_context = Some(context);
        self
    }

    pub fn with_local_certificate_selection<S>(mut self, selection: S) -> Self
    where
        S: LocalCertificateSelection + 'static,
    {
        self.local_certificate_selection = Some(Arc::new(selection));
        self
    }

    pub fn with_server_certificate_selection<S>(mut self, selection: S) -> Self
    where
        S: ServerCertificateSelection + 'static,
    {
        self.server_certificate_selection = Some(Arc::new(selection));
        self
    }

    pub fn with_remote_certificate_validation<V>(mut self, validation: V) -> Self
    where
        V: RemoteCertificateValidation + 'static,
    {
        self.remote_certificate_validation = Some(Arc::new(validation));
        self
    }

    /// 服务端要求客户端出示证书；对客户端选项无影响。
    pub fn require_client_certificate(mut self, required: bool) -> Self {
        if self.role.is_server() {
            self.remote_certificate_required = required;
        }
        self
    }

    pub fn with_check_certificate_name(mut self, check: bool) -> Self {
        self.check_certificate_name = check;
        self
    }

    pub fn with_enabled_protocols(mut self, protocols: SslProtocols) -> Self {
        self.enabled_protocols = protocols;
        self
    }

    pub fn with_revocation_mode(mut self, mode: RevocationMode) -> Self {
        self.revocation_mode = mode;
        self
    }

    pub fn with_encryption_policy(mut self, policy: EncryptionPolicy) -> Self {
        self.encryption_policy = policy;
        self
    }

    pub fn with_application_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        self.application_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// 在任何 I/O 之前检查选项组合。
    ///
    /// # 契约（What）
    /// - 服务端证书选择回调与显式证书、证书上下文、本地选择回调同时出现时拒绝；
    /// - 服务端四种来源全部缺失时拒绝；
    /// - 客户端不得携带仅对服务端有意义的证书来源；
    /// - ALPN 协议名长度必须落在 `1..=255`。
    pub fn validate(&self) -> Result<(), TlsSessionError> {
        match self.role {
            Role::Server => {
                if self.server_certificate_selection.is_some()
                    && (self.server_certificate.is_some()
                        || self.certificate_context.is_some()
                        || self.local_certificate_selection.is_some())
                {
                    return Err(TlsSessionError::configuration(
                        "服务端证书选择回调不能与显式证书、证书上下文或本地选择回调同时配置",
                    ));
                }
                if self.server_certificate_selection.is_none()
                    && self.server_certificate.is_none()
                    && self.certificate_context.is_none()
                    && self.local_certificate_selection.is_none()
                {
                    return Err(TlsSessionError::configuration(
                        "服务端必须配置证书、证书上下文或证书选择回调之一",
                    ));
                }
            }
            Role::Client => {
                if self.server_certificate.is_some()
                    || self.certificate_context.is_some()
                    || self.server_certificate_selection.is_some()
                {
                    return Err(TlsSessionError::configuration(
                        "客户端选项不能携带服务端证书来源",
                    ));
                }
            }
        }
        if let Some(invalid) = self
            .application_protocols
            .iter()
            .find(|protocol| protocol.is_empty() || protocol.len() > 255)
        {
            return Err(TlsSessionError::configuration(format!(
                "ALPN 协议名长度必须在 1..=255 之间，实际为 {}",
                invalid.len()
            )));
        }
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role.is_server()
    }

    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    pub fn client_certificates(&self) -> &[Certificate] {
        &self.client_certificates
    }

    pub fn server_certificate(&self) -> Option<&Certificate> {
        self.server_certificate.as_ref()
    }

    pub fn certificate_context(&self) -> Option<&CertificateContext> {
        self.certificate_context.as_ref()
    }

    pub fn local_certificate_selection(&self) -> Option<&dyn LocalCertificateSelection> {
        self.local_certificate_selection.as_deref()
    }

    pub fn server_certificate_selection(&self) -> Option<&dyn ServerCertificateSelection> {
        self.server_certificate_selection.as_deref()
    }

    pub fn remote_certificate_validation(&self) -> Option<&dyn RemoteCertificateValidation> {
        self.remote_certificate_validation.as_deref()
    }

    pub fn remote_certificate_required(&self) -> bool {
        self.remote_certificate_required
    }

    pub fn check_certificate_name(&self) -> bool {
        self.check_certificate_name
    }

    pub fn enabled_protocols(&self) -> SslProtocols {
        self.enabled_protocols
    }

    pub fn revocation_mode(&self) -> RevocationMode {
        self.revocation_mode
    }

    pub fn encryption_policy(&self) -> EncryptionPolicy {
        self.encryption_policy
    }

    pub fn application_protocols(&self) -> &[Bytes] {
        &self.application_protocols
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("role", &self.role)
            .field("target_host", &self.target_host)
            .field("client_certificates", &self.client_certificates.len())
            .field("server_certificate", &self.server_certificate)
            .field("remote_certificate_required", &self.remote_certificate_required)
            .field("enabled_protocols", &self.enabled_protocols)
            .field("revocation_mode", &self.revocation_mode)
            .field("encryption_policy", &self.encryption_policy)
            .finish_non_exhaustive()
    }
}
