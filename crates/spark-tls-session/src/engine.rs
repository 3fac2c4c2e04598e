//! 握手引擎：驱动安全提供者完成握手并管理凭证生命周期。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把“刷新凭证 → 推进一步 → 处理结果”的循环从字节流读写中剥离出来，使其可以在没有任何 I/O 的情况下被测试；
//! - 集中处理凭证缓存、匿名重启与“对端请求客户端证书”这几个容易出错的分支。
//!
//! ## 逻辑（How）
//! 1. 需要刷新时，通过 [`CertificateSelector`] 选出本地证书，计算缓存指纹并查询 [`CredentialCache`](crate::cache::CredentialCache)；
//!    会话恢复猜测未命中缓存且后端支持“先匿名再补证书”时，退回匿名凭证；
//! 2. 以当前凭证和入站记录调用 [`SecurityProvider::step_handshake`]；
//! 3. 客户端收到 `CredentialsNeeded` 时，带着对端给出的颁发者提示重新选择证书并用同一入站记录重试一次；
//! 4. 刷新发生后，若安全上下文已有效，立即释放被替换下来的旧凭证，否则推迟到会话结束；
//! 5. 握手完成时查询协商结果、校验记录尺寸，并在凭证不来自缓存且不处于匿名重启时写入缓存。
//!
//! ## 契约（What）
//! - 引擎不做 I/O，调用方负责把 [`HandshakeToken::payload`] 发给对端并读回下一条记录；
//! - 终止性失败以 [`TokenOutcome::Failed`] 令牌返回，令牌中可能仍带有需要发给对端的告警；
//! - 进入 `Failed` 或 `Closed` 后安全上下文与凭证引用立即释放，协商参数与证书信息保留供查询。
//!
//! ## 风险与权衡（Trade-offs）
//! - `CredentialsNeeded` 每次握手只重试一次，后端再次请求时视为协议失败；
//! - 引擎由会话独占，内部不加锁；并发保护由上层的互斥锁承担。

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::{
    alert::{AlertDescription, AlertLevel},
    cache::{Credential, CredentialFingerprint},
    certificate::Certificate,
    chain::ChainStatusFlags,
    error::{CredentialFailure, StateViolation, TlsSessionError},
    options::{Role, SessionOptions, SslProtocols},
    provider::{
        CipherSuite, CredentialRequest, HandshakeStepOutput, HandshakeStepRequest,
        SecurityProvider, SecurityStatus, StreamSizes,
    },
    selector::{CertificateSelector, SelectionHints},
    services::TlsServices,
    validator::{CertificateValidator, PolicyErrors},
};

/// 握手状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HandshakeState {
    NotStarted,
    Stepping,
    CredentialsNeeded,
    Complete,
    Failed,
    Closed,
}

/// 单步握手的结论。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TokenOutcome {
    /// 需要读取对端的下一条记录后继续。
    Continue,
    /// 握手完成。
    Done,
    /// 后端请求重新协商。
    Renegotiate,
    /// 对端在握手期间关闭了会话。
    Closed,
    /// 终止性失败。
    Failed,
}

/// 单步握手产物：需要发给对端的字节与结论。
#[derive(Clone, Debug)]
pub struct HandshakeToken {
    outcome: TokenOutcome,
    payload: Bytes,
    diagnostic: Option<String>,
}

impl HandshakeToken {
    fn new(outcome: TokenOutcome, payload: Bytes) -> Self {
        Self {
            outcome,
            payload,
            diagnostic: None,
        }
    }

    fn failed(payload: Bytes, diagnostic: String) -> Self {
        Self {
            outcome: TokenOutcome::Failed,
            payload,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn outcome(&self) -> TokenOutcome {
        self.outcome
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.outcome == TokenOutcome::Done
    }

    /// 终止性令牌对应的错误，非终止令牌返回 `None`。
    pub fn to_error(&self) -> Option<TlsSessionError> {
        match self.outcome {
            TokenOutcome::Failed => Some(TlsSessionError::protocol(
                "handshake_failed",
                self.diagnostic.clone().unwrap_or_default(),
            )),
            TokenOutcome::Closed => Some(TlsSessionError::protocol(
                "context_expired",
                "对端在握手期间关闭了会话",
            )),
            _ => None,
        }
    }
}

/// 对端证书校验摘要，仅在证书被接受时记录。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidationSummary {
    pub policy_errors: PolicyErrors,
    pub chain_status: ChainStatusFlags,
}

/// 握手完成后固定下来的协商参数。
#[derive(Clone, Debug)]
pub struct NegotiatedParameters {
    pub sizes: StreamSizes,
    pub max_plaintext: usize,
    pub cipher_suite: CipherSuite,
    pub protocol_version: SslProtocols,
    pub application_protocol: Option<Bytes>,
    pub remote_certificate: Option<Certificate>,
    pub remote_intermediates: Vec<Certificate>,
    /// 服务端从 SNI 中得到的主机名。
    pub server_name: Option<String>,
    pub validation: Option<ValidationSummary>,
}

/// 对端证书校验的结论。
#[derive(Debug)]
pub enum RemoteVerification {
    Accepted,
    /// 证书被拒绝，`alert_record` 为需要发给对端的致命告警（后端生成失败时为 `None`）。
    Rejected {
        alert_record: Option<Bytes>,
        error: TlsSessionError,
    },
}

/// 握手引擎，每个会话独占一个。
pub struct HandshakeEngine<B: SecurityProvider> {
    services: TlsServices<B>,
    options: Arc<SessionOptions>,
    state: HandshakeState,
    context: Option<B::Context>,
    credential: Option<Credential<B::Credential>>,
    retired_credentials: Vec<Credential<B::Credential>>,
    fingerprint: Option<CredentialFingerprint>,
    credential_from_cache: bool,
    anonymous_retry: bool,
    refresh_needed: bool,
    credentials_needed_retried: bool,
    local_certificate: Option<Certificate>,
    server_name: Option<String>,
    parameters: Option<NegotiatedParameters>,
}

impl<B: SecurityProvider> HandshakeEngine<B> {
    pub fn new(services: TlsServices<B>, options: Arc<SessionOptions>) -> Self {
        Self {
            services,
            options,
            state: HandshakeState::NotStarted,
            context: None,
            credential: None,
            retired_credentials: Vec::new(),
            fingerprint: None,
            credential_from_cache: false,
            anonymous_retry: false,
            refresh_needed: true,
            credentials_needed_retried: false,
            local_certificate: None,
            server_name: None,
            parameters: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn parameters(&self) -> Option<&NegotiatedParameters> {
        self.parameters.as_ref()
    }

    /// 本端实际使用的证书（客户端匿名时为 `None`）。
    pub fn local_certificate(&self) -> Option<&Certificate> {
        self.local_certificate.as_ref()
    }

    /// 当前绑定的凭证。
    pub fn credential(&self) -> Option<&Credential<B::Credential>> {
        self.credential.as_ref()
    }

    /// 当前凭证是否来自（或已写入）缓存。
    pub fn credential_from_cache(&self) -> bool {
        self.credential_from_cache
    }

    /// 尚未释放的被替换凭证数量。
    pub fn retired_credentials(&self) -> usize {
        self.retired_credentials.len()
    }

    /// 单条记录可承载的最大明文。
    pub fn max_plaintext(&self) -> Option<usize> {
        self.parameters.as_ref().map(|parameters| parameters.max_plaintext)
    }

    pub fn can_encrypt_empty_message(&self) -> bool {
        self.services
            .provider()
            .capabilities()
            .can_encrypt_empty_message
    }

    /// 推进一步握手。
    ///
    /// # 契约（What）
    /// - `inbound` 为对端的一条完整记录；客户端首步与重新协商首步传空切片；
    /// - 返回 `Err` 表示在调用后端之前就失败（例如没有可用证书），此时没有需要发送的字节；
    /// - 返回的令牌为 `Failed`/`Closed` 时引擎已进入终止状态。
    pub fn step(&mut self, inbound: &[u8]) -> Result<HandshakeToken, TlsSessionError> {
        match self.state {
            HandshakeState::NotStarted => self.state = HandshakeState::Stepping,
            HandshakeState::Stepping | HandshakeState::CredentialsNeeded => {}
            HandshakeState::Complete => {
                return Err(TlsSessionError::state(StateViolation::AlreadyAuthenticated));
            }
            HandshakeState::Failed => {
                return Err(TlsSessionError::state(StateViolation::NotAuthenticated));
            }
            HandshakeState::Closed => {
                return Err(TlsSessionError::state(StateViolation::AlreadyShutdown));
            }
        }

        let role = self.options.role();
        let mut refreshed = false;
        if self.refresh_needed {
            if let Err(error) = self.refresh_credentials(inbound) {
                self.fail();
                return Err(error);
            }
            refreshed = true;
        }

        let mut output = self.invoke_backend(inbound);
        if output.status == SecurityStatus::CredentialsNeeded
            && role == Role::Client
            && !self.credentials_needed_retried
        {
            self.credentials_needed_retried = true;
            self.state = HandshakeState::CredentialsNeeded;
            tracing::debug!("对端请求客户端证书，按颁发者提示重新选择后重试");
            self.refresh_needed = true;
            if let Err(error) = self.refresh_credentials(inbound) {
                self.fail();
                return Err(error);
            }
            refreshed = true;
            output = self.invoke_backend(inbound);
            self.state = HandshakeState::Stepping;
        }

        if refreshed {
            self.settle_retired_credentials();
        }
        tracing::trace!(
            %role,
            inbound = inbound.len(),
            outbound = output.outbound.len(),
            status = output.status.label(),
            "握手推进一步"
        );
        self.absorb(output)
    }

    /// 在已完成的会话上开始重新协商。
    pub fn begin_renegotiation(&mut self) -> Result<(), TlsSessionError> {
        if self.state != HandshakeState::Complete {
            return Err(TlsSessionError::state(StateViolation::NotAuthenticated));
        }
        tracing::debug!(role = %self.options.role(), "开始重新协商");
        self.state = HandshakeState::Stepping;
        self.credentials_needed_retried = false;
        Ok(())
    }

    fn invoke_backend(&mut self, inbound: &[u8]) -> HandshakeStepOutput {
        let Some(credential) = self.credential.as_ref() else {
            return HandshakeStepOutput::failed("握手时没有绑定凭证");
        };
        let request = HandshakeStepRequest {
            role: self.options.role(),
            credential,
            options: self.options.as_ref(),
            inbound,
        };
        self.services
            .provider()
            .step_handshake(request, &mut self.context)
    }

    fn absorb(&mut self, output: HandshakeStepOutput) -> Result<HandshakeToken, TlsSessionError> {
        let HandshakeStepOutput { status, outbound } = output;
        match status {
            SecurityStatus::Ok => {
                if let Err(error) = self.finalize() {
                    self.fail();
                    return Err(error);
                }
                Ok(HandshakeToken::new(TokenOutcome::Done, outbound))
            }
            SecurityStatus::ContinueNeeded => {
                Ok(HandshakeToken::new(TokenOutcome::Continue, outbound))
            }
            SecurityStatus::Renegotiate => {
                Ok(HandshakeToken::new(TokenOutcome::Renegotiate, outbound))
            }
            SecurityStatus::ContextExpired => {
                tracing::debug!("对端在握手期间关闭了会话");
                self.close();
                Ok(HandshakeToken::new(TokenOutcome::Closed, outbound))
            }
            SecurityStatus::CredentialsNeeded => {
                let diagnostic = match self.options.role() {
                    Role::Client => "对端在同一次握手中再次请求客户端证书",
                    Role::Server => "服务端后端不应请求补充凭证",
                };
                tracing::warn!(diagnostic, "握手失败");
                self.fail();
                Ok(HandshakeToken::failed(outbound, diagnostic.to_owned()))
            }
            SecurityStatus::Error { diagnostic } => {
                tracing::warn!(%diagnostic, "安全提供者报告握手失败");
                self.fail();
                Ok(HandshakeToken::failed(outbound, diagnostic))
            }
        }
    }

    fn refresh_credentials(&mut self, inbound: &[u8]) -> Result<(), TlsSessionError> {
        let options = Arc::clone(&self.options);
        let services = self.services.clone();
        let provider = services.provider();
        let selector =
            CertificateSelector::new(services.certificate_store(), services.chain_validator());
        let role = options.role();
        self.anonymous_retry = false;

        let (mut certificate, restart_attempt) = match role {
            Role::Server => {
                if self.server_name.is_none() {
                    self.server_name = provider.server_name_indication(inbound);
                }
                let certificate =
                    selector.select_server_certificate(&options, self.server_name.as_deref())?;
                (Some(certificate), false)
            }
            Role::Client => {
                let (issuers, remote) = match self.context.as_ref() {
                    Some(context) => (
                        provider.requested_certificate_authorities(context),
                        provider.remote_certificate(context),
                    ),
                    None => (Vec::new(), None),
                };
                let hints = SelectionHints {
                    acceptable_issuers: &issuers,
                    remote_certificate: remote.as_ref().map(|remote| &remote.leaf),
                };
                let choice = selector.select_client_certificate(
                    &options,
                    &hints,
                    self.credential.is_some(),
                );
                (choice.certificate, choice.session_restart_attempt)
            }
        };

        let fingerprint_for = |certificate: Option<&Certificate>| {
            CredentialFingerprint::new(
                certificate.map(Certificate::thumbprint),
                options.enabled_protocols(),
                role,
                options.encryption_policy(),
            )
        };
        let mut fingerprint = fingerprint_for(certificate.as_ref());
        let mut cached = services.credential_cache().try_get(&fingerprint);

        if restart_attempt
            && cached.is_none()
            && certificate.is_some()
            && provider.capabilities().start_mutual_auth_as_anonymous
        {
            tracing::debug!(
                %fingerprint,
                "会话恢复猜测未命中缓存，先以匿名身份握手，待对端请求证书后再补充"
            );
            certificate = None;
            fingerprint = fingerprint_for(None);
            self.anonymous_retry = true;
        }

        let from_cache = cached.is_some();
        let credential = match cached.take() {
            Some(credential) => credential,
            None => {
                let handle = provider
                    .acquire_credentials(&CredentialRequest {
                        role,
                        certificate: certificate.as_ref(),
                        protocols: options.enabled_protocols(),
                        encryption_policy: options.encryption_policy(),
                    })
                    .map_err(|error| TlsSessionError::Credential {
                        reason: CredentialFailure::AcquireFailed {
                            diagnostic: error.to_string(),
                        },
                    })?;
                Credential::new(handle)
            }
        };
        tracing::debug!(%fingerprint, from_cache, "凭证已刷新");

        if let Some(previous) = self.credential.replace(credential) {
            self.retired_credentials.push(previous);
        }
        self.fingerprint = Some(fingerprint);
        self.credential_from_cache = from_cache;
        self.local_certificate = certificate;
        self.refresh_needed = false;
        Ok(())
    }

    fn context_valid(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|context| self.services.provider().is_context_valid(context))
    }

    fn settle_retired_credentials(&mut self) {
        if self.retired_credentials.is_empty() {
            return;
        }
        if self.context_valid() && self.credential.is_some() {
            let released = self.retired_credentials.len();
            for credential in self.retired_credentials.drain(..) {
                credential.release();
            }
            tracing::debug!(released, "后端已切换到新凭证，释放被替换的凭证引用");
        } else {
            tracing::debug!(
                pending = self.retired_credentials.len(),
                "安全上下文尚未有效，被替换的凭证推迟到会话结束释放"
            );
        }
    }

    fn finalize(&mut self) -> Result<(), TlsSessionError> {
        let provider = self.services.provider();
        let Some(context) = self.context.as_ref() else {
            return Err(TlsSessionError::protocol(
                "missing_context",
                "后端报告握手完成但没有创建安全上下文",
            ));
        };
        let info = provider
            .query_negotiated_info(context)
            .map_err(|error| TlsSessionError::protocol("query_failed", error.to_string()))?;
        let max_plaintext = info.sizes.max_plaintext().ok_or_else(|| {
            TlsSessionError::protocol(
                "invalid_stream_sizes",
                format!(
                    "最大消息 {} 容纳不下头部 {} 与尾部 {}",
                    info.sizes.maximum_message, info.sizes.header, info.sizes.trailer
                ),
            )
        })?;
        // 重新协商不覆盖首次握手得到的 ALPN。
        let application_protocol = self
            .parameters
            .as_ref()
            .and_then(|parameters| parameters.application_protocol.clone())
            .or(info.application_protocol);
        let remote = provider.remote_certificate(context);
        let (remote_certificate, remote_intermediates) = match remote {
            Some(remote) => (Some(remote.leaf), remote.extra),
            None => (None, Vec::new()),
        };

        tracing::info!(
            role = %self.options.role(),
            cipher_suite = %info.cipher_suite,
            protocol = %info.protocol_version,
            max_plaintext,
            alpn = ?application_protocol,
            "TLS 握手完成"
        );
        self.parameters = Some(NegotiatedParameters {
            sizes: info.sizes,
            max_plaintext,
            cipher_suite: info.cipher_suite,
            protocol_version: info.protocol_version,
            application_protocol,
            remote_certificate,
            remote_intermediates,
            server_name: self.server_name.clone(),
            validation: None,
        });
        self.state = HandshakeState::Complete;
        self.cache_credential();
        Ok(())
    }

    fn cache_credential(&mut self) {
        if self.credential_from_cache || self.anonymous_retry || !self.context_valid() {
            return;
        }
        if let (Some(fingerprint), Some(credential)) = (self.fingerprint, self.credential.as_ref())
        {
            if self.services.credential_cache().put(fingerprint, credential) {
                self.credential_from_cache = true;
            }
        }
    }

    /// 校验对端证书；拒绝时生成致命告警并使引擎失效。
    pub fn verify_remote_certificate(&mut self) -> RemoteVerification {
        let role = self.options.role();
        let remote = self
            .context
            .as_ref()
            .and_then(|context| self.services.provider().remote_certificate(context));
        let outcome = CertificateValidator::new(self.services.chain_validator()).validate(
            role,
            remote.as_ref(),
            &self.options,
        );
        if outcome.accepted {
            if let Some(parameters) = self.parameters.as_mut() {
                parameters.validation = Some(ValidationSummary {
                    policy_errors: outcome.policy_errors,
                    chain_status: outcome.chain_status,
                });
            }
            return RemoteVerification::Accepted;
        }

        let alert = outcome
            .alert
            .unwrap_or(AlertDescription::CertificateUnknown);
        let alert_record = self.context.as_mut().and_then(|context| {
            match self
                .services
                .provider()
                .apply_alert(context, AlertLevel::Fatal, alert)
            {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!(%error, "生成致命告警失败");
                    None
                }
            }
        });
        self.fail();
        RemoteVerification::Rejected {
            alert_record,
            error: TlsSessionError::Validation {
                policy_errors: outcome.policy_errors,
                chain_status: outcome.chain_status,
                alert: Some(alert),
            },
        }
    }

    fn context_mut(&mut self) -> Result<&mut B::Context, TlsSessionError> {
        match self.state {
            HandshakeState::Complete => {}
            HandshakeState::Closed => {
                return Err(TlsSessionError::state(StateViolation::AlreadyShutdown));
            }
            _ => return Err(TlsSessionError::state(StateViolation::NotAuthenticated)),
        }
        self.context
            .as_mut()
            .ok_or(TlsSessionError::state(StateViolation::NotAuthenticated))
    }

    /// 加密一段不超过 [`Self::max_plaintext`] 的明文。
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        output: &mut BytesMut,
    ) -> Result<(), TlsSessionError> {
        let provider = Arc::clone(self.services.provider_arc());
        let context = self.context_mut()?;
        match provider.encrypt_record(context, plaintext, output) {
            SecurityStatus::Ok => Ok(()),
            other => Err(TlsSessionError::protocol(
                other.label(),
                format!("加密记录失败: {other}"),
            )),
        }
    }

    /// 解密一条完整记录，明文追加到 `plaintext`。
    ///
    /// 返回 `Ok`、`Renegotiate`、`ContextExpired` 或 `ContinueNeeded`；其余状态映射为协议错误。
    pub fn decrypt(
        &mut self,
        frame: &[u8],
        plaintext: &mut BytesMut,
    ) -> Result<SecurityStatus, TlsSessionError> {
        let provider = Arc::clone(self.services.provider_arc());
        let context = self.context_mut()?;
        match provider.decrypt_record(context, frame, plaintext) {
            status @ (SecurityStatus::Ok
            | SecurityStatus::Renegotiate
            | SecurityStatus::ContextExpired
            | SecurityStatus::ContinueNeeded) => Ok(status),
            other => Err(TlsSessionError::protocol(
                other.label(),
                format!("解密记录失败: {other}"),
            )),
        }
    }

    /// 生成关闭记录。
    pub fn shutdown_record(&mut self) -> Result<Bytes, TlsSessionError> {
        let provider = Arc::clone(self.services.provider_arc());
        let context = self.context_mut()?;
        provider
            .apply_shutdown(context)
            .map_err(|error| TlsSessionError::protocol("shutdown_failed", error.to_string()))
    }

    /// 进入失效状态并释放上下文与凭证。
    pub fn fail(&mut self) {
        self.state = HandshakeState::Failed;
        self.teardown();
    }

    /// 正常关闭并释放上下文与凭证；已失效的引擎保持 `Failed`。
    pub fn close(&mut self) {
        if self.state != HandshakeState::Failed {
            self.state = HandshakeState::Closed;
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.context = None;
        if let Some(credential) = self.credential.take() {
            credential.release();
        }
        for credential in self.retired_credentials.drain(..) {
            credential.release();
        }
    }
}
