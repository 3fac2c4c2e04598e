//! 进程级凭证缓存。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 构造凭证通常涉及私钥加载与后端初始化，成本远高于一次哈希查询；相同证书、协议与加密策略的会话应复用同一凭证；
//! - 凭证在多个会话间共享，必须在最后一个持有者释放后才销毁。
//!
//! ## 逻辑（How）
//! - [`Credential`] 以 `Arc` 表达引用计数，`acquire` 即克隆、`release` 即释放，后端句柄在计数归零时随 `Drop` 销毁；
//! - [`CredentialCache`] 以 `DashMap` 分片保存条目，读路径只持有单个分片的读锁；
//! - 可选容量上限，超过时按最近使用时间淘汰最久未用的条目。
//!
//! ## 契约（What）
//! - `try_get` 命中时返回一份已增加引用的凭证，调用方持有期间条目被淘汰也不影响其有效性；
//! - `put` 只在键不存在时插入，返回值表示是否真正写入；
//! - 缓存本身始终持有一份引用，因此缓存中的凭证计数至少为 1。
//!
//! ## 风险与权衡（Trade-offs）
//! - 默认不设上限，与“进程生命周期内复用”的语义一致；长时间运行且证书频繁轮换的服务应使用
//!   [`CredentialCache::with_capacity`]；
//! - 淘汰需要遍历全部分片寻找最旧条目，复杂度为 O(n)，仅在超出容量的插入路径上发生。

use std::{
    fmt,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    certificate::Thumbprint,
    options::{EncryptionPolicy, Role, SslProtocols},
};

/// 引用计数的共享凭证。
///
/// # 契约（What）
/// - [`Credential::acquire`] 与 [`Credential::release`] 是改变计数的唯一入口；
/// - 后端句柄在最后一份引用释放时销毁。
pub struct Credential<H> {
    inner: Arc<H>,
}

impl<H> Credential<H> {
    /// 包装新构造的后端句柄，初始计数为 1。
    pub fn new(handle: H) -> Self {
        Self {
            inner: Arc::new(handle),
        }
    }

    /// 增加一份引用。
    #[must_use = "acquire 返回的新引用需要被持有，否则会立即释放"]
    pub fn acquire(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// 释放当前引用。
    pub fn release(self) {
        drop(self);
    }

    pub fn handle(&self) -> &H {
        &self.inner
    }

    /// 当前引用数。
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// 是否与 `other` 指向同一个后端句柄。
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<H> fmt::Debug for Credential<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// 凭证缓存键。
///
/// 由证书指纹（匿名为 `None`）、协议集合、角色与加密策略共同决定。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CredentialFingerprint {
    thumbprint: Option<Thumbprint>,
    protocols: SslProtocols,
    role: Role,
    encryption_policy: EncryptionPolicy,
}

impl CredentialFingerprint {
    pub fn new(
        thumbprint: Option<Thumbprint>,
        protocols: SslProtocols,
        role: Role,
        encryption_policy: EncryptionPolicy,
    ) -> Self {
        Self {
            thumbprint,
            protocols,
            role,
            encryption_policy,
        }
    }

    pub fn thumbprint(&self) -> Option<Thumbprint> {
        self.thumbprint
    }

    pub fn is_anonymous(&self) -> bool {
        self.thumbprint.is_none()
    }
}

impl fmt::Display for CredentialFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thumbprint {
            Some(thumbprint) => write!(f, "{}:{thumbprint}", self.role)?,
            None => write!(f, "{}:anonymous", self.role)?,
        }
        write!(f, ":{}:{:?}", self.protocols, self.encryption_policy)
    }
}

/// 缓存统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

struct CacheEntry<H> {
    credential: Credential<H>,
    last_used: AtomicU64,
}

/// 进程级凭证缓存。
pub struct CredentialCache<H> {
    entries: DashMap<CredentialFingerprint, CacheEntry<H>>,
    capacity: Option<NonZeroUsize>,
    clock: AtomicU64,
    counters: CacheCounters,
}

impl<H> CredentialCache<H> {
    /// 不设上限的缓存。
    pub fn unbounded() -> Self {
        Self {
            entries: DashMap::new(),
            capacity: None,
            clock: AtomicU64::new(0),
            counters: CacheCounters::default(),
        }
    }

    /// 最多保留 `capacity` 个条目，超出时淘汰最久未用者。
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.get()),
            capacity: Some(capacity),
            clock: AtomicU64::new(0),
            counters: CacheCounters::default(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 查找并返回一份已增加引用的凭证。
    pub fn try_get(&self, fingerprint: &CredentialFingerprint) -> Option<Credential<H>> {
        let now = self.tick();
        let found = self.entries.get(fingerprint).map(|entry| {
            entry.last_used.store(now, Ordering::Relaxed);
            entry.credential.acquire()
        });
        match &found {
            Some(_) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%fingerprint, "凭证缓存命中");
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%fingerprint, "凭证缓存未命中");
            }
        }
        found
    }

    /// 在键不存在时写入凭证，缓存自身持有一份新引用。
    pub fn put(&self, fingerprint: CredentialFingerprint, credential: &Credential<H>) -> bool {
        let now = self.tick();
        let inserted = match self.entries.entry(fingerprint) {
            Entry::Occupied(occupied) => {
                occupied.get().last_used.store(now, Ordering::Relaxed);
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    credential: credential.acquire(),
                    last_used: AtomicU64::new(now),
                });
                true
            }
        };
        if inserted {
            self.counters.insertions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%fingerprint, "凭证写入缓存");
            self.evict_over_capacity(&fingerprint);
        }
        inserted
    }

    fn evict_over_capacity(&self, protected: &CredentialFingerprint) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity.get() {
            let oldest = self
                .entries
                .iter()
                .filter(|entry| entry.key() != protected)
                .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
                .map(|entry| *entry.key());
            let Some(victim) = oldest else {
                return;
            };
            if self.entries.remove(&victim).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %victim, "凭证缓存超出容量，淘汰最久未用条目");
            }
        }
    }

    /// 移除条目并把缓存持有的引用交给调用方。
    pub fn remove(&self, fingerprint: &CredentialFingerprint) -> Option<Credential<H>> {
        self.entries
            .remove(fingerprint)
            .map(|(_, entry)| entry.credential)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<H> Default for CredentialCache<H> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<H> fmt::Debug for CredentialCache<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
