//! 对端证书校验与告警映射。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手完成后，会话层需要判断对端证书是否可信，并在拒绝时给出一条合适的 TLS 告警；
//! - 校验结果同时交给用户回调复核，用户可以放行带有策略错误的证书（例如测试环境的自签证书）。
//!
//! ## 逻辑（How）
//! 1. 对端未出示证书：先记为 `REMOTE_CERTIFICATE_NOT_AVAILABLE`，回调总能看到该位；没有回调且本端不要求证书时，裁决前再清除；
//! 2. 出示了证书：以 [`ChainValidator`] 构建链，应用用途 OID 按角色选择（客户端校验服务端用
//!    [`SERVER_AUTH_OID`]，服务端校验客户端用 [`CLIENT_AUTH_OID`]），吊销模式取自选项；
//! 3. 链状态非空记 `REMOTE_CERTIFICATE_CHAIN_ERRORS`，客户端开启主机名校验且不匹配时记 `REMOTE_CERTIFICATE_NAME_MISMATCH`；
//! 4. 有回调则由回调裁决，否则仅在无策略错误时接受；
//! 5. 拒绝时按优先级映射告警：链错误看链状态，其次主机名不匹配，最后兜底 `certificate_unknown`。
//!
//! ## 契约（What）
//! - [`CertificateValidator::validate`] 不做任何 I/O，也不修改会话状态；
//! - 告警映射是纯函数，可单独测试。

use std::fmt;
use std::ops::BitOr;

use crate::{
    alert::AlertDescription,
    certificate::Certificate,
    chain::{
        CLIENT_AUTH_OID, ChainRequest, ChainStatusFlags, ChainValidator, RevocationScope,
        SERVER_AUTH_OID,
    },
    options::{RemoteCertificateReview, Role, SessionOptions},
    provider::RemoteCertificate,
};

/// 证书策略错误位集合。
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct PolicyErrors(u8);

impl PolicyErrors {
    pub const NONE: Self = Self(0);
    pub const REMOTE_CERTIFICATE_NOT_AVAILABLE: Self = Self(1 << 0);
    pub const REMOTE_CERTIFICATE_NAME_MISMATCH: Self = Self(1 << 1);
    pub const REMOTE_CERTIFICATE_CHAIN_ERRORS: Self = Self(1 << 2);

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 去掉 `other` 中的位。
    #[inline]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PolicyErrors {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for PolicyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let labels = [
            (Self::REMOTE_CERTIFICATE_NOT_AVAILABLE, "RemoteCertificateNotAvailable"),
            (Self::REMOTE_CERTIFICATE_NAME_MISMATCH, "RemoteCertificateNameMismatch"),
            (Self::REMOTE_CERTIFICATE_CHAIN_ERRORS, "RemoteCertificateChainErrors"),
        ];
        let mut first = true;
        for (flag, label) in labels {
            if self.contains(flag) {
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

impl fmt::Debug for PolicyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyErrors({self})")
    }
}

/// 一次对端证书校验的结果。
#[derive(Clone, Debug)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub policy_errors: PolicyErrors,
    pub chain_status: ChainStatusFlags,
    pub chain: Vec<Certificate>,
    /// 拒绝时应发送的告警，接受时为 `None`。
    pub alert: Option<AlertDescription>,
}

/// 对端证书校验器。
pub struct CertificateValidator<'a> {
    chain_validator: &'a dyn ChainValidator,
}

impl<'a> CertificateValidator<'a> {
    pub fn new(chain_validator: &'a dyn ChainValidator) -> Self {
        Self { chain_validator }
    }

    /// 校验对端证书并应用用户回调。
    pub fn validate(
        &self,
        role: Role,
        remote: Option<&RemoteCertificate>,
        options: &SessionOptions,
    ) -> ValidationOutcome {
        let mut policy_errors = PolicyErrors::NONE;
        let mut chain_status = ChainStatusFlags::NONE;
        let mut chain = Vec::new();

        match remote {
            None => {
                policy_errors = policy_errors | PolicyErrors::REMOTE_CERTIFICATE_NOT_AVAILABLE;
            }
            Some(remote) => {
                let application_policy = match role {
                    Role::Client => SERVER_AUTH_OID,
                    Role::Server => CLIENT_AUTH_OID,
                };
                let host_name = (role == Role::Client && options.check_certificate_name())
                    .then(|| options.target_host());
                let outcome = self.chain_validator.build_and_validate(&ChainRequest {
                    leaf: &remote.leaf,
                    extra_certificates: &remote.extra,
                    revocation_mode: options.revocation_mode(),
                    revocation_scope: RevocationScope::ExcludeRoot,
                    application_policy: Some(application_policy),
                    host_name,
                });
                chain_status = outcome.status;
                chain = outcome.chain;
                if !chain_status.is_empty() {
                    policy_errors = policy_errors | PolicyErrors::REMOTE_CERTIFICATE_CHAIN_ERRORS;
                }
                if host_name.is_some() && outcome.name_mismatch {
                    policy_errors = policy_errors | PolicyErrors::REMOTE_CERTIFICATE_NAME_MISMATCH;
                }
            }
        }

        let accepted = match options.remote_certificate_validation() {
            Some(callback) => callback.validate(&RemoteCertificateReview {
                certificate: remote.map(|remote| &remote.leaf),
                chain: &chain,
                policy_errors,
                chain_status,
            }),
            None => {
                // 未要求对端证书时，缺失只对回调可见，不参与默认裁决。
                if !options.remote_certificate_required() {
                    policy_errors =
                        policy_errors.without(PolicyErrors::REMOTE_CERTIFICATE_NOT_AVAILABLE);
                }
                policy_errors.is_empty()
            }
        };

        let alert = (!accepted).then(|| alert_for_policy_errors(policy_errors, chain_status));
        if accepted {
            tracing::debug!(%role, %policy_errors, "对端证书校验通过");
        } else {
            tracing::warn!(
                %role,
                %policy_errors,
                %chain_status,
                alert = ?alert,
                "对端证书被拒绝"
            );
        }

        ValidationOutcome {
            accepted,
            policy_errors,
            chain_status,
            chain,
            alert,
        }
    }
}

/// 按优先级把策略错误映射为一条告警。
pub fn alert_for_policy_errors(
    policy_errors: PolicyErrors,
    chain_status: ChainStatusFlags,
) -> AlertDescription {
    if policy_errors.contains(PolicyErrors::REMOTE_CERTIFICATE_CHAIN_ERRORS) {
        alert_for_chain_status(chain_status)
    } else if policy_errors.contains(PolicyErrors::REMOTE_CERTIFICATE_NAME_MISMATCH) {
        AlertDescription::BadCertificate
    } else {
        AlertDescription::CertificateUnknown
    }
}

/// 把链状态映射为告警。
///
/// 有链错误但状态为空时视为证书本身损坏，返回 `bad_certificate`。
pub fn alert_for_chain_status(status: ChainStatusFlags) -> AlertDescription {
    if status.is_empty() {
        return AlertDescription::BadCertificate;
    }
    if status.intersects(
        ChainStatusFlags::UNTRUSTED_ROOT
            | ChainStatusFlags::PARTIAL_CHAIN
            | ChainStatusFlags::CYCLIC,
    ) {
        return AlertDescription::UnknownCa;
    }
    if status.intersects(ChainStatusFlags::REVOKED | ChainStatusFlags::OFFLINE_REVOCATION) {
        return AlertDescription::CertificateRevoked;
    }
    if status.intersects(
        ChainStatusFlags::NOT_TIME_VALID
            | ChainStatusFlags::NOT_TIME_NESTED
            | ChainStatusFlags::CTL_NOT_TIME_VALID,
    ) {
        return AlertDescription::CertificateExpired;
    }
    if status.intersects(
        ChainStatusFlags::NOT_VALID_FOR_USAGE | ChainStatusFlags::CTL_NOT_VALID_FOR_USAGE,
    ) {
        return AlertDescription::UnsupportedCertificate;
    }
    if status.intersects(
        ChainStatusFlags::NOT_SIGNATURE_VALID
            | ChainStatusFlags::CTL_NOT_SIGNATURE_VALID
            | ChainStatusFlags::INVALID_EXTENSION
            | ChainStatusFlags::INVALID_POLICY_CONSTRAINTS
            | ChainStatusFlags::INVALID_BASIC_CONSTRAINTS
            | ChainStatusFlags::INVALID_NAME_CONSTRAINTS
            | ChainStatusFlags::HAS_NOT_SUPPORTED_NAME_CONSTRAINT
            | ChainStatusFlags::NO_ISSUANCE_CHAIN_POLICY,
    ) {
        return AlertDescription::BadCertificate;
    }
    AlertDescription::CertificateUnknown
}
