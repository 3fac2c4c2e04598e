//! 本地证书选择。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 客户端可能配置多张证书，也可能在握手中途才知道服务端接受哪些颁发者；选择逻辑需要在两个时机都可重入；
//! - 服务端有多种证书来源（新式按 SNI 选择、兼容式本地选择回调、证书上下文、显式证书），需要固定的优先级。
//!
//! ## 逻辑（How）
//! - 客户端：
//!   1. 配置了选择回调：以候选列表、远端证书与颁发者提示调用回调，返回值视为一次全新选择；
//!   2. 尚无凭证且有候选：猜测首张证书可以复用之前的会话，标记为“会话恢复尝试”；
//!   3. 已有凭证且有候选：若对端给出颁发者提示，只保留链上某一颁发者匹配提示的候选（构链时不查吊销）；
//!   4. 在过滤后的候选中取第一张能补全私钥的证书。
//! - 服务端按“新式回调 → 兼容回调 → 证书上下文 → 显式证书”的顺序，首个给出证书的来源胜出，
//!   最后统一要求证书附带私钥。
//!
//! ## 契约（What）
//! - 选择过程不修改会话状态，也不访问凭证缓存；缓存查询与“匿名重启”由握手引擎决定；
//! - 客户端选不出证书时返回 `None`，表示以匿名身份继续。

use crate::{
    certificate::{Certificate, CertificateStore, find_certificate_with_private_key},
    chain::{ChainRequest, ChainValidator, RevocationScope},
    error::{CredentialFailure, TlsSessionError},
    options::{CertificateSelectionRequest, RevocationMode, Role, SessionOptions},
};

/// 客户端在刷新凭证时可用的对端信息。
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionHints<'a> {
    pub acceptable_issuers: &'a [String],
    pub remote_certificate: Option<&'a Certificate>,
}

/// 客户端选择结果。
#[derive(Clone, Debug, Default)]
pub struct ClientCertificateChoice {
    pub certificate: Option<Certificate>,
    /// 猜测首张证书可复用先前会话。
    pub session_restart_attempt: bool,
}

/// 证书选择器。
pub struct CertificateSelector<'a> {
    store: &'a dyn CertificateStore,
    chain_validator: &'a dyn ChainValidator,
}

impl<'a> CertificateSelector<'a> {
    pub fn new(store: &'a dyn CertificateStore, chain_validator: &'a dyn ChainValidator) -> Self {
        Self {
            store,
            chain_validator,
        }
    }

    /// 客户端证书选择，`has_credential` 表示本次握手是否已绑定过凭证。
    pub fn select_client_certificate(
        &self,
        options: &SessionOptions,
        hints: &SelectionHints<'_>,
        has_credential: bool,
    ) -> ClientCertificateChoice {
        let candidates = options.client_certificates();
        let mut filtered: Vec<Certificate> = Vec::new();
        let mut session_restart_attempt = false;

        if let Some(selection) = options.local_certificate_selection() {
            let selected = selection.select(&CertificateSelectionRequest {
                target_host: options.target_host(),
                candidates,
                remote_certificate: hints.remote_certificate,
                acceptable_issuers: hints.acceptable_issuers,
            });
            if let Some(certificate) = selected {
                tracing::debug!(
                    thumbprint = %certificate.thumbprint(),
                    "本地选择回调给出了客户端证书"
                );
                filtered.push(certificate);
            } else {
                tracing::debug!("本地选择回调未给出证书");
            }
        } else if !has_credential && !candidates.is_empty() {
            tracing::debug!(
                candidates = candidates.len(),
                "尚无凭证，尝试以首张候选证书恢复会话"
            );
            filtered.push(candidates[0].clone());
            session_restart_attempt = true;
        } else if !candidates.is_empty() {
            for candidate in candidates {
                if hints.acceptable_issuers.is_empty()
                    || self.issued_by_any(candidate, hints.acceptable_issuers)
                {
                    filtered.push(candidate.clone());
                } else {
                    tracing::trace!(
                        thumbprint = %candidate.thumbprint(),
                        "候选证书链上没有对端接受的颁发者"
                    );
                }
            }
        }

        let certificate = filtered.iter().find_map(|candidate| {
            find_certificate_with_private_key(self.store, Role::Client, candidate)
        });
        if certificate.is_none() && !filtered.is_empty() {
            tracing::debug!("过滤后的候选证书都没有私钥，以匿名身份继续");
        }
        ClientCertificateChoice {
            certificate,
            session_restart_attempt,
        }
    }

    fn issued_by_any(&self, candidate: &Certificate, issuers: &[String]) -> bool {
        let outcome = self.chain_validator.build_and_validate(&ChainRequest {
            leaf: candidate,
            extra_certificates: &[],
            revocation_mode: RevocationMode::NoCheck,
            revocation_scope: RevocationScope::ExcludeRoot,
            application_policy: None,
            host_name: None,
        });
        std::iter::once(candidate)
            .chain(outcome.chain.iter())
            .any(|element| {
                issuers
                    .iter()
                    .any(|issuer| issuer.eq_ignore_ascii_case(element.issuer()))
            })
    }

    /// 服务端证书选择。
    ///
    /// `host_name` 为客户端在 SNI 中给出的主机名（若有）。
    pub fn select_server_certificate(
        &self,
        options: &SessionOptions,
        host_name: Option<&str>,
    ) -> Result<Certificate, TlsSessionError> {
        let selected = if let Some(selection) = options.server_certificate_selection() {
            selection.select(host_name)
        } else if let Some(selection) = options.local_certificate_selection() {
            let candidates: Vec<Certificate> = options
                .certificate_context()
                .map(|context| context.certificate().clone())
                .or_else(|| options.server_certificate().cloned())
                .into_iter()
                .collect();
            selection.select(&CertificateSelectionRequest {
                target_host: host_name.unwrap_or_default(),
                candidates: &candidates,
                remote_certificate: None,
                acceptable_issuers: &[],
            })
        } else if let Some(context) = options.certificate_context() {
            Some(context.certificate().clone())
        } else {
            options.server_certificate().cloned()
        };

        let certificate = selected
            .and_then(|certificate| {
                find_certificate_with_private_key(self.store, Role::Server, &certificate)
            })
            .ok_or(TlsSessionError::Credential {
                reason: CredentialFailure::NoServerCertificate,
            })?;
        tracing::debug!(
            thumbprint = %certificate.thumbprint(),
            host_name = host_name.unwrap_or_default(),
            "服务端证书已选定"
        );
        Ok(certificate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        certificate::{CertificateContext, MemoryCertificateStore, StoreLocation},
        chain::ChainOutcome,
    };

    struct LeafOnlyChain;

    impl ChainValidator for LeafOnlyChain {
        fn build_and_validate(&self, request: &ChainRequest<'_>) -> ChainOutcome {
            ChainOutcome {
                chain: vec![request.leaf.clone()],
                ..ChainOutcome::default()
            }
        }
    }

    fn cert(name: &str, issuer: &str) -> Certificate {
        Certificate::from_der(name.as_bytes().to_vec(), format!("CN={name}"), issuer)
    }

    #[test]
    fn first_candidate_is_guessed_before_any_credential() {
        let store = MemoryCertificateStore::new();
        let selector = CertificateSelector::new(&store, &LeafOnlyChain);
        let first = cert("a", "CN=ca-a").with_private_key();
        let options = SessionOptions::client("svc.test")
            .with_client_certificates(vec![first.clone(), cert("b", "CN=ca-b").with_private_key()]);

        let choice = selector.select_client_certificate(&options, &SelectionHints::default(), false);
        assert!(choice.session_restart_attempt);
        assert_eq!(choice.certificate, Some(first));
    }

    #[test]
    fn issuer_hints_filter_candidates_and_fall_back_to_anonymous() {
        let store = MemoryCertificateStore::new();
        let selector = CertificateSelector::new(&store, &LeafOnlyChain);
        let b = cert("b", "CN=ca-b").with_private_key();
        let options = SessionOptions::client("svc.test").with_client_certificates(vec![
            cert("a", "CN=ca-a").with_private_key(),
            b.clone(),
        ]);

        let issuers = vec!["cn=CA-B".to_owned()];
        let hints = SelectionHints {
            acceptable_issuers: &issuers,
            remote_certificate: None,
        };
        let choice = selector.select_client_certificate(&options, &hints, true);
        assert!(!choice.session_restart_attempt);
        assert_eq!(choice.certificate, Some(b));

        let unknown = vec!["CN=ca-z".to_owned()];
        let hints = SelectionHints {
            acceptable_issuers: &unknown,
            remote_certificate: None,
        };
        let choice = selector.select_client_certificate(&options, &hints, true);
        assert_eq!(choice.certificate, None, "没有匹配颁发者时以匿名继续");
    }

    #[test]
    fn delegate_result_is_a_fresh_selection_and_private_key_is_probed() {
        let plain = cert("delegate", "CN=ca");
        let store =
            MemoryCertificateStore::new().with(StoreLocation::CurrentUser, plain.with_private_key());
        let selector = CertificateSelector::new(&store, &LeafOnlyChain);
        let returned = plain.clone();
        let options = SessionOptions::client("svc.test").with_local_certificate_selection(
            move |request: &CertificateSelectionRequest<'_>| {
                assert_eq!(request.target_host, "svc.test");
                Some(returned.clone())
            },
        );
        let choice = selector.select_client_certificate(&options, &SelectionHints::default(), false);
        assert!(!choice.session_restart_attempt, "回调给出的证书不是会话恢复尝试");
        let chosen = choice.certificate.expect("仓库中存在带私钥的副本");
        assert!(chosen.has_private_key());
        assert_eq!(chosen, plain);
    }

    #[test]
    fn server_sources_follow_priority_and_require_private_key() {
        let store = MemoryCertificateStore::new();
        let selector = CertificateSelector::new(&store, &LeafOnlyChain);
        let keyed = cert("srv", "CN=ca").with_private_key();

        let by_sni = keyed.clone();
        let options = SessionOptions::server().with_server_certificate_selection(
            move |host: Option<&str>| -> Option<Certificate> {
                (host == Some("sni.test")).then(|| by_sni.clone())
            },
        );
        assert_eq!(
            selector.select_server_certificate(&options, Some("sni.test")).ok(),
            Some(keyed.clone())
        );
        let error = selector
            .select_server_certificate(&options, Some("other.test"))
            .expect_err("回调未给出证书时失败");
        assert_eq!(error.code(), "tls.credential.no_server_certificate");

        let context = SessionOptions::server()
            .with_certificate_context(CertificateContext::new(keyed.clone(), Vec::new()));
        assert!(selector.select_server_certificate(&context, None).is_ok());

        let without_key =
            SessionOptions::server().with_server_certificate(cert("srv", "CN=ca"));
        assert!(
            selector.select_server_certificate(&without_key, None).is_err(),
            "没有私钥的证书不能用于服务端"
        );
    }

    #[test]
    fn legacy_selection_receives_configured_certificate_as_candidate() {
        let store = MemoryCertificateStore::new();
        let selector = CertificateSelector::new(&store, &LeafOnlyChain);
        let keyed = cert("srv", "CN=ca").with_private_key();
        let options = SessionOptions::server()
            .with_server_certificate(keyed.clone())
            .with_local_certificate_selection(|request: &CertificateSelectionRequest<'_>| {
                request.candidates.first().cloned()
            });
        assert_eq!(
            selector.select_server_certificate(&options, None).ok(),
            Some(keyed)
        );
    }
}
