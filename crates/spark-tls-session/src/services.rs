//! 会话共享服务集合。
//!
//! 安全提供者、链校验后端、证书仓库、凭证缓存与缓冲池在进程内共享，
//! 每个会话持有一份 [`TlsServices`] 克隆（仅增加 `Arc` 计数）。

use std::{fmt, sync::Arc};

use crate::{
    cache::CredentialCache,
    certificate::{CertificateStore, MemoryCertificateStore},
    chain::ChainValidator,
    provider::SecurityProvider,
    record::RecordBufferPool,
};

/// 会话依赖的共享服务。
pub struct TlsServices<B: SecurityProvider> {
    provider: Arc<B>,
    chain_validator: Arc<dyn ChainValidator>,
    certificate_store: Arc<dyn CertificateStore>,
    credential_cache: Arc<CredentialCache<B::Credential>>,
    buffer_pool: Arc<RecordBufferPool>,
}

impl<B: SecurityProvider> TlsServices<B> {
    /// 以空证书仓库、无上限凭证缓存与默认缓冲池构造。
    pub fn new<V>(provider: B, chain_validator: V) -> Self
    where
        V: ChainValidator + 'static,
    {
        Self {
            provider: Arc::new(provider),
            chain_validator: Arc::new(chain_validator),
            certificate_store: Arc::new(MemoryCertificateStore::new()),
            credential_cache: Arc::new(CredentialCache::unbounded()),
            buffer_pool: Arc::new(RecordBufferPool::default()),
        }
    }

    pub fn with_certificate_store<S>(mut self, store: S) -> Self
    where
        S: CertificateStore + 'static,
    {
        self.certificate_store = Arc::new(store);
        self
    }

    /// 注入外部构造的凭证缓存，便于多组服务共享或调整容量。
    pub fn with_credential_cache(mut self, cache: Arc<CredentialCache<B::Credential>>) -> Self {
        self.credential_cache = cache;
        self
    }

    pub fn with_buffer_pool(mut self, pool: Arc<RecordBufferPool>) -> Self {
        self.buffer_pool = pool;
        self
    }

    pub fn provider(&self) -> &B {
        &self.provider
    }

    pub(crate) fn provider_arc(&self) -> &Arc<B> {
        &self.provider
    }

    pub fn chain_validator(&self) -> &dyn ChainValidator {
        self.chain_validator.as_ref()
    }

    pub fn certificate_store(&self) -> &dyn CertificateStore {
        self.certificate_store.as_ref()
    }

    pub fn credential_cache(&self) -> &Arc<CredentialCache<B::Credential>> {
        &self.credential_cache
    }

    pub fn buffer_pool(&self) -> &Arc<RecordBufferPool> {
        &self.buffer_pool
    }
}

impl<B: SecurityProvider> Clone for TlsServices<B> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            chain_validator: Arc::clone(&self.chain_validator),
            certificate_store: Arc::clone(&self.certificate_store),
            credential_cache: Arc::clone(&self.credential_cache),
            buffer_pool: Arc::clone(&self.buffer_pool),
        }
    }
}

impl<B: SecurityProvider> fmt::Debug for TlsServices<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsServices")
            .field("credential_cache", &self.credential_cache)
            .finish_non_exhaustive()
    }
}
