//! 证书句柄、指纹与证书仓库。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 会话层不解析 X.509，只需要证书的 DER 字节、主题/颁发者名称、是否附带私钥以及稳定指纹；
//! - 指纹作为凭证缓存键的一部分，必须对同一 DER 恒定，因此使用 SHA-256 摘要计算。
//!
//! ## 逻辑（How）
//! - [`Certificate`] 以 `Arc` 共享不可变内部数据，克隆只增加引用计数；
//! - [`CertificateStore`] 抽象系统证书仓库，会话层仅用它按指纹补全私钥；
//! - [`find_certificate_with_private_key`] 按角色决定先查用户仓库还是机器仓库。
//!
//! ## 契约（What）
//! - 证书相等性按指纹判断；
//! - 日志中只能出现指纹的十六进制形式，私钥材料永不离开安全提供者。

use std::{fmt, sync::Arc};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::options::Role;

/// 证书 DER 的 SHA-256 指纹。
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Thumbprint([u8; 32]);

impl Thumbprint {
    /// 计算 DER 字节的指纹。
    pub fn of(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 大写十六进制表示，用于日志与缓存键展示。
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", self.to_hex())
    }
}

/// 不可变证书句柄。
///
/// # 契约（What）
/// - `der` 为证书原始编码，`subject`/`issuer` 为可读名称；
/// - `has_private_key` 表示安全提供者能否用该证书完成签名，会话层从不接触私钥本身；
/// - 相等性与哈希只看指纹。
#[derive(Clone)]
pub struct Certificate {
    inner: Arc<CertificateInner>,
}

struct CertificateInner {
    der: Bytes,
    subject: String,
    issuer: String,
    thumbprint: Thumbprint,
    has_private_key: bool,
}

impl Certificate {
    /// 由 DER 与名称构造不带私钥的证书。
    pub fn from_der(
        der: impl Into<Bytes>,
        subject: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        let der = der.into();
        let thumbprint = Thumbprint::of(&der);
        Self {
            inner: Arc::new(CertificateInner {
                der,
                subject: subject.into(),
                issuer: issuer.into(),
                thumbprint,
                has_private_key: false,
            }),
        }
    }

    /// 返回一份标记为“附带私钥”的副本，DER 与指纹保持不变。
    pub fn with_private_key(&self) -> Self {
        Self {
            inner: Arc::new(CertificateInner {
                der: self.inner.der.clone(),
                subject: self.inner.subject.clone(),
                issuer: self.inner.issuer.clone(),
                thumbprint: self.inner.thumbprint,
                has_private_key: true,
            }),
        }
    }

    pub fn der(&self) -> &Bytes {
        &self.inner.der
    }

    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    pub fn issuer(&self) -> &str {
        &self.inner.issuer
    }

    pub fn thumbprint(&self) -> Thumbprint {
        self.inner.thumbprint
    }

    pub fn has_private_key(&self) -> bool {
        self.inner.has_private_key
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.inner.thumbprint == other.inner.thumbprint
    }
}

impl Eq for Certificate {}

impl std::hash::Hash for Certificate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.thumbprint.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.inner.subject)
            .field("issuer", &self.inner.issuer)
            .field("thumbprint", &self.inner.thumbprint)
            .field("has_private_key", &self.inner.has_private_key)
            .finish()
    }
}

/// 预先组装好的服务端证书上下文：叶子证书加中间证书。
#[derive(Clone, Debug)]
pub struct CertificateContext {
    certificate: Certificate,
    intermediates: Vec<Certificate>,
}

impl CertificateContext {
    pub fn new(certificate: Certificate, intermediates: Vec<Certificate>) -> Self {
        Self {
            certificate,
            intermediates,
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn intermediates(&self) -> &[Certificate] {
        &self.intermediates
    }
}

/// 证书仓库位置。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreLocation {
    CurrentUser,
    LocalMachine,
}

impl StoreLocation {
    /// 按角色给出探测顺序：服务端先查机器仓库，客户端先查用户仓库。
    pub fn probe_order(role: Role) -> [StoreLocation; 2] {
        match role {
            Role::Server => [StoreLocation::LocalMachine, StoreLocation::CurrentUser],
            Role::Client => [StoreLocation::CurrentUser, StoreLocation::LocalMachine],
        }
    }
}

/// 系统证书仓库抽象。
///
/// # 契约（What）
/// - `find_by_thumbprint` 在指定位置查找指纹相同的证书，未命中返回 `None`；
/// - 实现必须线程安全，会话层可能在多个握手中并发调用。
pub trait CertificateStore: Send + Sync {
    fn find_by_thumbprint(
        &self,
        location: StoreLocation,
        thumbprint: &Thumbprint,
    ) -> Option<Certificate>;
}

/// 基于内存向量的证书仓库，适合测试与无系统仓库的部署。
#[derive(Clone, Debug, Default)]
pub struct MemoryCertificateStore {
    current_user: Vec<Certificate>,
    local_machine: Vec<Certificate>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 向指定位置追加一张证书。
    pub fn insert(&mut self, location: StoreLocation, certificate: Certificate) {
        match location {
            StoreLocation::CurrentUser => self.current_user.push(certificate),
            StoreLocation::LocalMachine => self.local_machine.push(certificate),
        }
    }

    pub fn with(mut self, location: StoreLocation, certificate: Certificate) -> Self {
        self.insert(location, certificate);
        self
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn find_by_thumbprint(
        &self,
        location: StoreLocation,
        thumbprint: &Thumbprint,
    ) -> Option<Certificate> {
        let certificates = match location {
            StoreLocation::CurrentUser => &self.current_user,
            StoreLocation::LocalMachine => &self.local_machine,
        };
        certificates
            .iter()
            .find(|certificate| certificate.thumbprint() == *thumbprint)
            .cloned()
    }
}

/// 确保证书附带私钥。
///
/// # 逻辑（How）
/// - 证书本身已附带私钥时直接返回；
/// - 否则按 [`StoreLocation::probe_order`] 依次在仓库中查找同指纹且带私钥的副本；
/// - 全部未命中返回 `None`，调用方据此跳过该候选。
pub fn find_certificate_with_private_key(
    store: &dyn CertificateStore,
    role: Role,
    certificate: &Certificate,
) -> Option<Certificate> {
    if certificate.has_private_key() {
        return Some(certificate.clone());
    }
    let thumbprint = certificate.thumbprint();
    for location in StoreLocation::probe_order(role) {
        if let Some(found) = store.find_by_thumbprint(location, &thumbprint) {
            if found.has_private_key() {
                tracing::debug!(
                    thumbprint = %thumbprint,
                    ?location,
                    "在证书仓库中找到带私钥的同指纹证书"
                );
                return Some(found);
            }
        }
    }
    tracing::debug!(thumbprint = %thumbprint, "证书及仓库中均无可用私钥");
    None
}
