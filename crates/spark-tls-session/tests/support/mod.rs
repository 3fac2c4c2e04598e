//! 集成测试共用的模拟安全提供者、脚本化链校验后端与会话夹具。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 会话编排层只依赖 [`SecurityProvider`] 与 [`ChainValidator`] 两个 trait，测试无需真实密码学即可覆盖握手编排、
//!   凭证缓存、证书校验与记录分帧；
//! - 模拟后端同时记录凭证构造次数、存活句柄数与收到的告警，便于断言引用计数平衡。
//!
//! ## 玩具协议（How）
//! - 记录沿用 5 字节头部 `[类型, 3, 3, 长度高位, 长度低位]`：22 为握手、23 为应用数据、21 为告警；
//! - 握手消息首字节为消息类型：0 `HelloRequest`、1 `ClientHello`（主机名 + ALPN 列表）、
//!   2 `ServerHello`（服务端证书、是否请求客户端证书、可接受颁发者、选中的 ALPN）、3 `ClientFinished`（客户端证书）；
//! - 应用数据负载为“明文逐字节异或 0x5A”后接 4 字节尾部 `MAC!`，因此每条记录开销为 9 字节；
//! - 已建立的会话收到握手记录时暂存该记录并返回 `Renegotiate`，下一次空输入的握手步骤处理它。
//!
//! ## 契约（What）
//! - 客户端首次收到证书请求且当前凭证没有证书时返回一次 `CredentialsNeeded`，不消费该记录；
//! - 重新协商不改变 ALPN，后端在重新协商后报告的 ALPN 为空；
//! - 通过 [`Probe::request_renegotiation`] 可让服务端下一次加密输出 `HelloRequest` 而非应用数据。

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use spark_tls_session::{
    AlertDescription, AlertLevel, CallContext, Certificate, ChainOutcome, ChainRequest,
    ChainStatusFlags, ChainValidator, CipherSuite, CredentialRequest, HandshakeStepOutput,
    HandshakeStepRequest, NegotiatedInfo, ProviderCapabilities, ProviderError, RemoteCertificate,
    RevocationMode, Role, SecurityProvider, SecurityStatus, SessionOptions, SslProtocols,
    StreamSizes, Thumbprint, TlsServices, TlsSessionError, TlsStream,
};
use tokio::io::DuplexStream;

pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;
pub const CONTENT_APPLICATION_DATA: u8 = 23;

const HELLO_REQUEST: u8 = 0;
const CLIENT_HELLO: u8 = 1;
const SERVER_HELLO: u8 = 2;
const CLIENT_FINISHED: u8 = 3;

const XOR_KEY: u8 = 0x5A;
const MAC: &[u8; 4] = b"MAC!";
pub const RECORD_OVERHEAD: usize = 5 + MAC.len();

/// 模拟后端的观测计数。
#[derive(Default)]
struct ProbeState {
    acquires: AtomicUsize,
    live_credentials: AtomicUsize,
    records_encrypted: AtomicUsize,
    client_handshakes: AtomicUsize,
    server_handshakes: AtomicUsize,
    renegotiate_next_write: AtomicBool,
    alerts_received: Mutex<Vec<(AlertLevel, AlertDescription)>>,
}

/// 测试侧持有的观测句柄。
#[derive(Clone, Default)]
pub struct Probe(Arc<ProbeState>);

impl Probe {
    pub fn acquires(&self) -> usize {
        self.0.acquires.load(Ordering::SeqCst)
    }

    pub fn live_credentials(&self) -> usize {
        self.0.live_credentials.load(Ordering::SeqCst)
    }

    pub fn records_encrypted(&self) -> usize {
        self.0.records_encrypted.load(Ordering::SeqCst)
    }

    pub fn client_handshakes(&self) -> usize {
        self.0.client_handshakes.load(Ordering::SeqCst)
    }

    pub fn server_handshakes(&self) -> usize {
        self.0.server_handshakes.load(Ordering::SeqCst)
    }

    /// 让服务端下一次加密输出 `HelloRequest`，该次写入的明文被丢弃。
    pub fn request_renegotiation(&self) {
        self.0.renegotiate_next_write.store(true, Ordering::SeqCst);
    }

    pub fn alerts_received(&self) -> Vec<(AlertLevel, AlertDescription)> {
        self.0.alerts_received.lock().clone()
    }

    fn note_alert(&self, payload: &[u8]) -> Option<(AlertLevel, AlertDescription)> {
        let level = AlertLevel::from_u8(*payload.first()?)?;
        let description = AlertDescription::from_u8(*payload.get(1)?)?;
        self.0.alerts_received.lock().push((level, description));
        Some((level, description))
    }
}

/// 模拟凭证句柄，销毁时递减存活计数。
pub struct MockCredential {
    pub certificate: Option<Certificate>,
    pub role: Role,
    probe: Probe,
}

impl Drop for MockCredential {
    fn drop(&mut self) {
        self.probe.0.live_credentials.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Start,
    AwaitServerHello,
    AwaitClientFinished,
    Established,
}

pub struct MockContext {
    phase: Phase,
    remote: Option<RemoteCertificate>,
    cert_requested: bool,
    issuers: Vec<String>,
    alpn: Option<Bytes>,
    asked_credentials: bool,
    pending: Option<Vec<u8>>,
}

impl MockContext {
    fn new() -> Self {
        Self {
            phase: Phase::Start,
            remote: None,
            cert_requested: false,
            issuers: Vec::new(),
            alpn: None,
            asked_credentials: false,
            pending: None,
        }
    }
}

/// 以玩具协议实现的安全提供者。
pub struct MockProvider {
    probe: Probe,
    capabilities: ProviderCapabilities,
    max_plaintext: usize,
    acceptable_issuers: Vec<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            probe: Probe::default(),
            capabilities: ProviderCapabilities::default(),
            max_plaintext: 64,
            acceptable_issuers: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_max_plaintext(mut self, max_plaintext: usize) -> Self {
        self.max_plaintext = max_plaintext;
        self
    }

    /// 服务端请求客户端证书时给出的可接受颁发者。
    pub fn with_acceptable_issuers(mut self, issuers: &[&str]) -> Self {
        self.acceptable_issuers = issuers.iter().map(|issuer| (*issuer).to_owned()).collect();
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }

    pub fn max_plaintext(&self) -> usize {
        self.max_plaintext
    }

    fn client_step(
        &self,
        context: &mut MockContext,
        request: &HandshakeStepRequest<'_, MockCredential>,
        inbound: &[u8],
    ) -> HandshakeStepOutput {
        if inbound.is_empty() {
            if context.phase != Phase::Start {
                return HandshakeStepOutput::failed("客户端在握手中途收到空输入");
            }
            context.phase = Phase::AwaitServerHello;
            let hello = client_hello(
                request.options.target_host(),
                request.options.application_protocols(),
            );
            return HandshakeStepOutput::new(SecurityStatus::ContinueNeeded, hello);
        }

        let Some((content_type, payload)) = split_record(inbound) else {
            return HandshakeStepOutput::failed("记录格式错误");
        };
        match (content_type, payload.first().copied()) {
            (CONTENT_ALERT, _) => {
                let alert = self.probe.note_alert(payload);
                HandshakeStepOutput::failed(format!("握手期间收到告警 {alert:?}"))
            }
            (CONTENT_HANDSHAKE, Some(HELLO_REQUEST)) if context.phase == Phase::Established => {
                context.phase = Phase::AwaitServerHello;
                context.asked_credentials = false;
                // 重新协商的 ClientHello 不再携带 ALPN。
                let hello = client_hello(request.options.target_host(), &[]);
                HandshakeStepOutput::new(SecurityStatus::ContinueNeeded, hello)
            }
            (CONTENT_HANDSHAKE, Some(SERVER_HELLO)) if context.phase == Phase::AwaitServerHello => {
                let Some(hello) = ServerHello::decode(&payload[1..]) else {
                    return HandshakeStepOutput::failed("ServerHello 格式错误");
                };
                context.remote = hello.certificate.map(|leaf| RemoteCertificate {
                    leaf,
                    extra: Vec::new(),
                });
                context.cert_requested = hello.cert_requested;
                context.issuers = hello.issuers;
                context.alpn = hello.alpn;

                let local = request.credential.handle().certificate.clone();
                if context.cert_requested && local.is_none() && !context.asked_credentials {
                    context.asked_credentials = true;
                    return HandshakeStepOutput::new(SecurityStatus::CredentialsNeeded, Bytes::new());
                }
                let mut body = BytesMut::new();
                body.put_u8(CLIENT_FINISHED);
                put_optional_certificate(&mut body, local.as_ref());
                context.phase = Phase::Established;
                self.probe.0.client_handshakes.fetch_add(1, Ordering::SeqCst);
                HandshakeStepOutput::new(SecurityStatus::Ok, record(CONTENT_HANDSHAKE, &body))
            }
            _ => HandshakeStepOutput::failed("客户端收到意外的握手消息"),
        }
    }

    fn server_step(
        &self,
        context: &mut MockContext,
        request: &HandshakeStepRequest<'_, MockCredential>,
        inbound: &[u8],
    ) -> HandshakeStepOutput {
        let Some((content_type, payload)) = split_record(inbound) else {
            return HandshakeStepOutput::failed("服务端需要一条完整记录");
        };
        match (content_type, payload.first().copied()) {
            (CONTENT_ALERT, _) => {
                let alert = self.probe.note_alert(payload);
                HandshakeStepOutput::failed(format!("握手期间收到告警 {alert:?}"))
            }
            (CONTENT_HANDSHAKE, Some(CLIENT_HELLO))
                if matches!(context.phase, Phase::Start | Phase::Established) =>
            {
                let Some((_, offered)) = decode_client_hello(&payload[1..]) else {
                    return HandshakeStepOutput::failed("ClientHello 格式错误");
                };
                let renegotiating = context.phase == Phase::Established;
                let alpn = if renegotiating {
                    None
                } else {
                    request
                        .options
                        .application_protocols()
                        .iter()
                        .find(|candidate| offered.contains(candidate))
                        .cloned()
                };
                context.alpn = alpn.clone();
                let cert_requested = request.options.remote_certificate_required();
                let hello = ServerHello {
                    certificate: request.credential.handle().certificate.clone(),
                    cert_requested,
                    issuers: if cert_requested {
                        self.acceptable_issuers.clone()
                    } else {
                        Vec::new()
                    },
                    alpn,
                };
                context.phase = Phase::AwaitClientFinished;
                HandshakeStepOutput::new(
                    SecurityStatus::ContinueNeeded,
                    record(CONTENT_HANDSHAKE, &hello.encode()),
                )
            }
            (CONTENT_HANDSHAKE, Some(CLIENT_FINISHED))
                if context.phase == Phase::AwaitClientFinished =>
            {
                let mut cursor = Cursor::new(&payload[1..]);
                let Some(certificate) = read_optional_certificate(&mut cursor) else {
                    return HandshakeStepOutput::failed("ClientFinished 格式错误");
                };
                context.remote = certificate.map(|leaf| RemoteCertificate {
                    leaf,
                    extra: Vec::new(),
                });
                context.phase = Phase::Established;
                self.probe.0.server_handshakes.fetch_add(1, Ordering::SeqCst);
                HandshakeStepOutput::new(SecurityStatus::Ok, Bytes::new())
            }
            _ => HandshakeStepOutput::failed("服务端收到意外的握手消息"),
        }
    }
}

impl SecurityProvider for MockProvider {
    type Credential = MockCredential;
    type Context = MockContext;

    fn acquire_credentials(
        &self,
        request: &CredentialRequest<'_>,
    ) -> Result<MockCredential, ProviderError> {
        self.probe.0.acquires.fetch_add(1, Ordering::SeqCst);
        self.probe.0.live_credentials.fetch_add(1, Ordering::SeqCst);
        Ok(MockCredential {
            certificate: request.certificate.cloned(),
            role: request.role,
            probe: self.probe.clone(),
        })
    }

    fn step_handshake(
        &self,
        request: HandshakeStepRequest<'_, MockCredential>,
        context: &mut Option<MockContext>,
    ) -> HandshakeStepOutput {
        let context = context.get_or_insert_with(MockContext::new);
        let from_pending = request.inbound.is_empty();
        let inbound = if from_pending {
            context.pending.take().unwrap_or_default()
        } else {
            request.inbound.to_vec()
        };
        let output = match request.role {
            Role::Client => self.client_step(context, &request, &inbound),
            Role::Server => self.server_step(context, &request, &inbound),
        };
        if output.status == SecurityStatus::CredentialsNeeded && from_pending {
            context.pending = Some(inbound);
        }
        output
    }

    fn encrypt_record(
        &self,
        context: &mut MockContext,
        plaintext: &[u8],
        output: &mut BytesMut,
    ) -> SecurityStatus {
        if context.phase != Phase::Established {
            return SecurityStatus::error("会话尚未建立");
        }
        if plaintext.len() > self.max_plaintext {
            return SecurityStatus::error("明文超过单条记录上限");
        }
        if self.probe.0.renegotiate_next_write.swap(false, Ordering::SeqCst) {
            output.extend_from_slice(&record(CONTENT_HANDSHAKE, &[HELLO_REQUEST]));
            return SecurityStatus::Ok;
        }
        let mut payload = Vec::with_capacity(plaintext.len() + MAC.len());
        payload.extend(plaintext.iter().map(|byte| byte ^ XOR_KEY));
        payload.extend_from_slice(MAC);
        output.extend_from_slice(&record(CONTENT_APPLICATION_DATA, &payload));
        self.probe.0.records_encrypted.fetch_add(1, Ordering::SeqCst);
        SecurityStatus::Ok
    }

    fn decrypt_record(
        &self,
        context: &mut MockContext,
        frame: &[u8],
        plaintext: &mut BytesMut,
    ) -> SecurityStatus {
        let Some((content_type, payload)) = split_record(frame) else {
            return SecurityStatus::error("记录格式错误");
        };
        match content_type {
            CONTENT_APPLICATION_DATA => {
                let Some(body) = payload.strip_suffix(MAC.as_slice()) else {
                    return SecurityStatus::error("记录完整性校验失败");
                };
                plaintext.extend(body.iter().map(|byte| byte ^ XOR_KEY));
                SecurityStatus::Ok
            }
            CONTENT_ALERT => match self.probe.note_alert(payload) {
                Some((_, AlertDescription::CloseNotify)) => SecurityStatus::ContextExpired,
                Some((AlertLevel::Fatal, description)) => {
                    SecurityStatus::error(format!("收到致命告警 {description}"))
                }
                Some((AlertLevel::Warning, _)) => SecurityStatus::Ok,
                None => SecurityStatus::error("告警格式错误"),
            },
            CONTENT_HANDSHAKE => {
                context.pending = Some(frame.to_vec());
                SecurityStatus::Renegotiate
            }
            _ => SecurityStatus::error("未知的记录类型"),
        }
    }

    fn query_negotiated_info(&self, context: &MockContext) -> Result<NegotiatedInfo, ProviderError> {
        if context.phase != Phase::Established {
            return Err(ProviderError::new("query_negotiated_info", "会话尚未建立"));
        }
        Ok(NegotiatedInfo {
            sizes: StreamSizes {
                header: 5,
                trailer: MAC.len(),
                maximum_message: RECORD_OVERHEAD + self.max_plaintext,
            },
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            protocol_version: SslProtocols::TLS13,
            application_protocol: context.alpn.clone(),
        })
    }

    fn apply_alert(
        &self,
        _context: &mut MockContext,
        level: AlertLevel,
        description: AlertDescription,
    ) -> Result<Bytes, ProviderError> {
        Ok(record(CONTENT_ALERT, &[level as u8, description.as_u8()]))
    }

    fn apply_shutdown(&self, context: &mut MockContext) -> Result<Bytes, ProviderError> {
        self.apply_alert(context, AlertLevel::Warning, AlertDescription::CloseNotify)
    }

    fn remote_certificate(&self, context: &MockContext) -> Option<RemoteCertificate> {
        context.remote.clone()
    }

    fn requested_certificate_authorities(&self, context: &MockContext) -> Vec<String> {
        context.issuers.clone()
    }

    fn server_name_indication(&self, client_hello: &[u8]) -> Option<String> {
        let (content_type, payload) = split_record(client_hello)?;
        if content_type != CONTENT_HANDSHAKE || payload.first() != Some(&CLIENT_HELLO) {
            return None;
        }
        let (host, _) = decode_client_hello(&payload[1..])?;
        (!host.is_empty()).then_some(host)
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }
}

/// 以每张证书指纹脚本化链状态的校验后端。
///
/// 主机名匹配规则：证书主体必须等于 `CN=<host>`。
#[derive(Clone, Default)]
pub struct ScriptedChainValidator {
    inner: Arc<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    statuses: Mutex<HashMap<Thumbprint, ChainStatusFlags>>,
    calls: Mutex<Vec<ChainCall>>,
}

/// 一次链构建调用的记录。
#[derive(Clone, Debug)]
pub struct ChainCall {
    pub subject: String,
    pub application_policy: Option<&'static str>,
    pub host_name: Option<String>,
    pub revocation_mode: RevocationMode,
}

impl ScriptedChainValidator {
    pub fn set_status(&self, certificate: &Certificate, status: ChainStatusFlags) {
        self.inner
            .statuses
            .lock()
            .insert(certificate.thumbprint(), status);
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.inner.calls.lock().clone()
    }
}

impl ChainValidator for ScriptedChainValidator {
    fn build_and_validate(&self, request: &ChainRequest<'_>) -> ChainOutcome {
        self.inner.calls.lock().push(ChainCall {
            subject: request.leaf.subject().to_owned(),
            application_policy: request.application_policy,
            host_name: request.host_name.map(str::to_owned),
            revocation_mode: request.revocation_mode,
        });
        let status = self
            .inner
            .statuses
            .lock()
            .get(&request.leaf.thumbprint())
            .copied()
            .unwrap_or_default();
        let mut chain = vec![request.leaf.clone()];
        chain.extend(request.extra_certificates.iter().cloned());
        ChainOutcome {
            chain,
            status,
            name_mismatch: request
                .host_name
                .is_some_and(|host| request.leaf.subject() != format!("CN={host}")),
        }
    }
}

pub type MockStream = TlsStream<DuplexStream, MockProvider>;

/// 主体为 `CN=<host>`、由测试根签发且附带私钥的服务端证书。
pub fn server_certificate(host: &str) -> Certificate {
    Certificate::from_der(
        format!("server-der:{host}").into_bytes(),
        format!("CN={host}"),
        "CN=Test Root",
    )
    .with_private_key()
}

/// 由 `issuer` 签发且附带私钥的客户端证书。
pub fn client_certificate(name: &str, issuer: &str) -> Certificate {
    Certificate::from_der(
        format!("client-der:{name}:{issuer}").into_bytes(),
        format!("CN={name}"),
        issuer,
    )
    .with_private_key()
}

pub fn services(provider: MockProvider, validator: &ScriptedChainValidator) -> TlsServices<MockProvider> {
    TlsServices::new(provider, validator.clone())
}

/// 以内存双工管道连接的一对会话。
pub fn session_pair(
    client_services: &TlsServices<MockProvider>,
    server_services: &TlsServices<MockProvider>,
) -> (MockStream, MockStream) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    (
        TlsStream::new(client_io, client_services.clone()),
        TlsStream::new(server_io, server_services.clone()),
    )
}

/// 并发驱动两端握手，返回（客户端结果，服务端结果）。
pub async fn establish(
    client: &MockStream,
    server: &MockStream,
    client_options: SessionOptions,
    server_options: SessionOptions,
) -> (Result<(), TlsSessionError>, Result<(), TlsSessionError>) {
    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    tokio::join!(
        client.authenticate_as_client(&ctx, client_options),
        server.authenticate_as_server(&ctx, server_options),
    )
}

/// 服务端以 `host` 证书、客户端以 `host` 为目标的最小选项。
pub fn default_options(host: &str) -> (SessionOptions, SessionOptions) {
    (
        SessionOptions::client(host),
        SessionOptions::server().with_server_certificate(server_certificate(host)),
    )
}

/// 以固定超时读取恰好 `len` 字节明文。
pub async fn read_plaintext(
    stream: &MockStream,
    len: usize,
) -> Result<Vec<u8>, TlsSessionError> {
    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let mut collected = Vec::with_capacity(len);
    let mut buf = vec![0u8; len.max(1)];
    while collected.len() < len {
        let n = stream.read(&ctx, &mut buf[..len - collected.len()]).await?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    Ok(collected)
}

/// 轮询等待条件成立，最多等待一秒。
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn record(content_type: u8, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(5 + payload.len());
    out.put_u8(content_type);
    out.put_slice(&[3, 3]);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    out.freeze()
}

fn split_record(frame: &[u8]) -> Option<(u8, &[u8])> {
    let header = frame.get(..5)?;
    let len = usize::from(u16::from_be_bytes([header[3], header[4]]));
    let payload = frame.get(5..5 + len)?;
    Some((header[0], payload))
}

fn client_hello(host: &str, protocols: &[Bytes]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(CLIENT_HELLO);
    put_short(&mut body, host.as_bytes());
    body.put_u8(protocols.len() as u8);
    for protocol in protocols {
        put_short(&mut body, protocol);
    }
    record(CONTENT_HANDSHAKE, &body)
}

fn decode_client_hello(body: &[u8]) -> Option<(String, Vec<Bytes>)> {
    let mut cursor = Cursor::new(body);
    let host = String::from_utf8(cursor.short()?.to_vec()).ok()?;
    let count = cursor.u8()?;
    let protocols = (0..count)
        .map(|_| cursor.short().map(Bytes::copy_from_slice))
        .collect::<Option<Vec<_>>>()?;
    Some((host, protocols))
}

struct ServerHello {
    certificate: Option<Certificate>,
    cert_requested: bool,
    issuers: Vec<String>,
    alpn: Option<Bytes>,
}

impl ServerHello {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(SERVER_HELLO);
        put_optional_certificate(&mut body, self.certificate.as_ref());
        body.put_u8(u8::from(self.cert_requested));
        body.put_u8(self.issuers.len() as u8);
        for issuer in &self.issuers {
            put_short(&mut body, issuer.as_bytes());
        }
        put_short(&mut body, self.alpn.as_deref().unwrap_or_default());
        body
    }

    fn decode(body: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(body);
        let certificate = read_optional_certificate(&mut cursor)?;
        let cert_requested = cursor.u8()? != 0;
        let count = cursor.u8()?;
        let issuers = (0..count)
            .map(|_| {
                cursor
                    .short()
                    .and_then(|raw| String::from_utf8(raw.to_vec()).ok())
            })
            .collect::<Option<Vec<_>>>()?;
        let alpn = cursor.short()?;
        Some(Self {
            certificate,
            cert_requested,
            issuers,
            alpn: (!alpn.is_empty()).then(|| Bytes::copy_from_slice(alpn)),
        })
    }
}

fn put_short(out: &mut BytesMut, bytes: &[u8]) {
    out.put_u8(bytes.len() as u8);
    out.put_slice(bytes);
}

fn put_optional_certificate(out: &mut BytesMut, certificate: Option<&Certificate>) {
    match certificate {
        None => out.put_u8(0),
        Some(certificate) => {
            out.put_u8(1);
            out.put_u16(certificate.der().len() as u16);
            out.put_slice(certificate.der());
            put_short(out, certificate.subject().as_bytes());
            put_short(out, certificate.issuer().as_bytes());
        }
    }
}

/// 外层 `None` 表示格式错误，内层 `None` 表示没有证书。
fn read_optional_certificate(cursor: &mut Cursor<'_>) -> Option<Option<Certificate>> {
    if cursor.u8()? == 0 {
        return Some(None);
    }
    let der_len = usize::from(cursor.u16()?);
    let der = cursor.take(der_len)?.to_vec();
    let subject = String::from_utf8(cursor.short()?.to_vec()).ok()?;
    let issuer = String::from_utf8(cursor.short()?.to_vec()).ok()?;
    Some(Some(Certificate::from_der(der, subject, issuer)))
}

struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.data.len() < n {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|bytes| bytes[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn short(&mut self) -> Option<&'a [u8]> {
        let len = usize::from(self.u8()?);
        self.take(len)
    }
}
