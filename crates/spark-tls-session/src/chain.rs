//! 证书链构建与校验后端抽象。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 链构建、吊销检查与主机名匹配依赖平台信任库，会话层只关心结果：链元素与状态位集合；
//! - 证书选择（匹配对端给出的颁发者提示）与对端证书校验共用同一后端。
//!
//! ## 契约（What）
//! - [`ChainValidator::build_and_validate`] 必须是纯查询，不得修改会话状态；
//! - 返回的 `chain` 按“叶子在前、根在后”排列，可为空；
//! - `status` 为整条链状态位的并集，空集合表示没有链错误。

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::{certificate::Certificate, options::RevocationMode};

/// 服务端身份认证的扩展密钥用途 OID（客户端校验服务端证书时使用）。
pub const SERVER_AUTH_OID: &str = "1.3.6.1.5.5.7.3.1";
/// 客户端身份认证的扩展密钥用途 OID（服务端校验客户端证书时使用）。
pub const CLIENT_AUTH_OID: &str = "1.3.6.1.5.5.7.3.2";

/// 链状态位集合。
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct ChainStatusFlags(u32);

macro_rules! chain_flags {
    ($($(#[$meta:meta])* $name:ident = $bit:expr, $label:literal;)*) => {
        impl ChainStatusFlags {
            $( $(#[$meta])* pub const $name: Self = Self(1 << $bit); )*

            const LABELS: &'static [(ChainStatusFlags, &'static str)] = &[
                $( (Self::$name, $label), )*
            ];
        }
    };
}

chain_flags! {
    NOT_TIME_VALID = 0, "NotTimeValid";
    NOT_TIME_NESTED = 1, "NotTimeNested";
    REVOKED = 2, "Revoked";
    NOT_SIGNATURE_VALID = 3, "NotSignatureValid";
    NOT_VALID_FOR_USAGE = 4, "NotValidForUsage";
    UNTRUSTED_ROOT = 5, "UntrustedRoot";
    REVOCATION_STATUS_UNKNOWN = 6, "RevocationStatusUnknown";
    CYCLIC = 7, "Cyclic";
    INVALID_EXTENSION = 8, "InvalidExtension";
    INVALID_POLICY_CONSTRAINTS = 9, "InvalidPolicyConstraints";
    INVALID_BASIC_CONSTRAINTS = 10, "InvalidBasicConstraints";
    INVALID_NAME_CONSTRAINTS = 11, "InvalidNameConstraints";
    HAS_NOT_SUPPORTED_NAME_CONSTRAINT = 12, "HasNotSupportedNameConstraint";
    NO_ISSUANCE_CHAIN_POLICY = 13, "NoIssuanceChainPolicy";
    OFFLINE_REVOCATION = 14, "OfflineRevocation";
    PARTIAL_CHAIN = 15, "PartialChain";
    CTL_NOT_TIME_VALID = 16, "CtlNotTimeValid";
    CTL_NOT_SIGNATURE_VALID = 17, "CtlNotSignatureValid";
    CTL_NOT_VALID_FOR_USAGE = 18, "CtlNotValidForUsage";
    EXPLICIT_DISTRUST = 19, "ExplicitDistrust";
}

impl ChainStatusFlags {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 是否包含 `other` 的全部位。
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 是否与 `other` 至少有一位重叠。
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ChainStatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ChainStatusFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for ChainStatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NoError");
        }
        let mut first = true;
        for (flag, label) in Self::LABELS {
            if self.contains(*flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(label)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ChainStatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainStatusFlags({self})")
    }
}

/// 吊销检查范围。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum RevocationScope {
    EndCertificateOnly,
    #[default]
    ExcludeRoot,
    EntireChain,
}

/// 一次链构建请求。
#[derive(Clone, Copy, Debug)]
pub struct ChainRequest<'a> {
    pub leaf: &'a Certificate,
    pub extra_certificates: &'a [Certificate],
    pub revocation_mode: RevocationMode,
    pub revocation_scope: RevocationScope,
    /// 期望的扩展密钥用途，`None` 表示不检查用途。
    pub application_policy: Option<&'static str>,
    /// 需要匹配的主机名，`None` 表示跳过主机名检查。
    pub host_name: Option<&'a str>,
}

/// 链构建结果。
#[derive(Clone, Debug, Default)]
pub struct ChainOutcome {
    pub chain: Vec<Certificate>,
    pub status: ChainStatusFlags,
    /// 仅当请求携带 `host_name` 时有意义。
    pub name_mismatch: bool,
}

/// 证书链构建与校验后端。
pub trait ChainValidator: Send + Sync {
    fn build_and_validate(&self, request: &ChainRequest<'_>) -> ChainOutcome;
}
