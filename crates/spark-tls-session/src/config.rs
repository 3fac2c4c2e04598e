//! 声明式会话配置。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 运维侧通常以 TOML 文件描述协议版本、吊销检查与 ALPN 等策略，证书本身则由程序装载；
//! - 把“可写进文件的部分”集中到 [`TlsSessionConfig`]，再转换为 [`SessionOptions`] 交给会话。
//!
//! ## 契约（What）
//! - 未知字段直接拒绝，避免拼写错误被静默忽略；
//! - 协议名称无法识别或缓存容量为 0 时返回配置错误；客户端可以省略 `target_host`，此时目标主机为空字符串；
//! - 证书、选择回调与校验回调不在文件中表达，需要在 [`TlsSessionConfig::into_options`] 的结果上继续设置。

use std::num::NonZeroUsize;

use serde::Deserialize;

use crate::{
    cache::CredentialCache,
    error::TlsSessionError,
    options::{EncryptionPolicy, RevocationMode, Role, SessionOptions, SslProtocols},
};

/// 会话配置文件的结构。
///
/// ```toml
/// role = "client"
/// target_host = "api.example.com"
/// protocols = ["tls1.2", "tls1.3"]
/// revocation_mode = "online"
/// application_protocols = ["h2", "http/1.1"]
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSessionConfig {
    pub role: Role,
    #[serde(default)]
    pub target_host: Option<String>,
    /// 为空表示交由系统默认。
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub revocation_mode: RevocationMode,
    #[serde(default)]
    pub encryption_policy: EncryptionPolicy,
    #[serde(default)]
    pub require_client_certificate: bool,
    #[serde(default = "default_true")]
    pub check_certificate_name: bool,
    #[serde(default)]
    pub application_protocols: Vec<String>,
    /// 凭证缓存容量，缺省表示不设上限。
    #[serde(default)]
    pub credential_cache_capacity: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl TlsSessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, TlsSessionError> {
        toml::from_str(raw)
            .map_err(|error| TlsSessionError::configuration(format!("解析会话配置失败: {error}")))
    }

    /// 把协议名称列表合并为位集合。
    pub fn enabled_protocols(&self) -> Result<SslProtocols, TlsSessionError> {
        self.protocols
            .iter()
            .try_fold(SslProtocols::SYSTEM_DEFAULT, |acc, name| {
                SslProtocols::from_name(name)
                    .map(|protocol| acc | protocol)
                    .ok_or_else(|| {
                        TlsSessionError::configuration(format!("无法识别的协议版本 `{name}`"))
                    })
            })
    }

    /// 转换为会话选项。
    pub fn into_options(self) -> Result<SessionOptions, TlsSessionError> {
        let protocols = self.enabled_protocols()?;
        let options = match self.role {
            Role::Client => SessionOptions::client(self.target_host.unwrap_or_default()),
            Role::Server => {
                SessionOptions::server().require_client_certificate(self.require_client_certificate)
            }
        };
        Ok(options
            .with_enabled_protocols(protocols)
            .with_revocation_mode(self.revocation_mode)
            .with_encryption_policy(self.encryption_policy)
            .with_check_certificate_name(self.check_certificate_name)
            .with_application_protocols(self.application_protocols.into_iter().map(String::into_bytes)))
    }

    /// 按配置的容量构造凭证缓存。
    pub fn credential_cache<H>(&self) -> Result<CredentialCache<H>, TlsSessionError> {
        match self.credential_cache_capacity {
            None => Ok(CredentialCache::unbounded()),
            Some(capacity) => NonZeroUsize::new(capacity)
                .map(CredentialCache::with_capacity)
                .ok_or_else(|| TlsSessionError::configuration("凭证缓存容量必须大于 0")),
        }
    }
}
