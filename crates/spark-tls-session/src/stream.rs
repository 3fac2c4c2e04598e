//! 面向调用方的 TLS 会话：握手入口、记录分帧的读写与关闭。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把 [`HandshakeEngine`] 的无 I/O 状态机接到真实的异步字节流上，调用方只面对明文；
//! - 统一处理取消、截止、重入与失效，避免每个调用点各自判断会话状态。
//!
//! ## 契约（What）
//! - `shutdown` 只关闭写方向：发出 `close_notify` 后仍可继续 `read`，直到对端的 `close_notify`
//!   或流结束，届时才释放安全上下文；
//! - 状态错误不改变会话阶段，其余错误使会话失效。

use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex as AsyncMutex,
};

use crate::{
    certificate::Certificate,
    context::{CallContext, run_with_context},
    engine::{HandshakeEngine, HandshakeState, NegotiatedParameters, RemoteVerification, TokenOutcome},
    error::{StateViolation, TlsSessionError},
    hot_reload::HotReloadingServerOptions,
    options::{RevocationMode, Role, SessionOptions, SslProtocols},
    provider::{CipherSuite, SecurityProvider, SecurityStatus},
    record::{DecryptedResidue, RECORD_HEADER_SIZE, RecordHeader},
    services::TlsServices,
};

const READ: &str = "read";
const WRITE: &str = "write";
const FLUSH: &str = "flush";
const SHUTDOWN: &str = "shutdown";
const HANDSHAKE: &str = "handshake";

/// 会话生命周期阶段。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    Created,
    Handshaking,
    Authenticated,
    /// 本端已发送 `close_notify`，写方向关闭，读方向仍可读到对端剩余数据。
    ShutDown,
    /// 首个致命错误的错误码与描述。
    Faulted { code: &'static str, detail: String },
}

/// 基于任意异步字节流的 TLS 会话。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为上层提供与明文流相似的 `read`/`write`/`shutdown` 接口，加解密与握手编排对调用方透明；
/// - 读写两个方向各自独立加锁，允许一个任务读的同时另一个任务写。
///
/// ## 逻辑（How）
/// - 构造时以 `tokio::io::split` 拆分底层流，读半部与残留明文缓冲共用一把异步锁，写半部单独一把；
/// - 握手引擎放在同步互斥锁内，只在不跨 `.await` 的短临界区中访问；
/// - 所有 I/O 都经过 `run_with_context`，遵循 [`CallContext`] 的取消与截止；
/// - 读到重新协商请求时，在持有读锁的前提下再取得写锁，完成嵌套握手后继续读取应用数据。
///
/// ## 契约（What）
/// - `authenticate_*` 只能成功调用一次，选项冲突在任何 I/O 之前以配置错误返回；
/// - 同一方向上的并发调用返回 [`StateViolation::ReentrantRead`] 或 [`StateViolation::ReentrantWrite`]；
/// - 除状态错误外，任何失败都使会话进入 [`SessionPhase::Faulted`]，此后所有 I/O 调用返回
///   [`StateViolation::Faulted`]；
/// - `shutdown` 之后 `write` 与第二次 `shutdown` 返回 [`StateViolation::AlreadyShutdown`]，不触发 I/O；
///   `read` 仍可交付对端在关闭前发出的数据，读到对端关闭后返回 `0`。
///
/// ## 风险与权衡（Trade-offs）
/// - 取消发生在记录读取中途时，底层流可能停在记录中间，因此取消同样使会话失效；
/// - `write` 按最大明文切片逐条加密并立即写出，没有合并小记录。
pub struct TlsStream<IO, B: SecurityProvider> {
    inner: Arc<TlsStreamInner<IO, B>>,
}

struct TlsStreamInner<IO, B: SecurityProvider> {
    services: TlsServices<B>,
    engine: Mutex<Option<HandshakeEngine<B>>>,
    reader: AsyncMutex<ReadSide<IO>>,
    writer: AsyncMutex<WriteHalf<IO>>,
    phase: Mutex<SessionPhase>,
    read_guard: ReentrancyGuard,
    write_guard: ReentrancyGuard,
}

struct ReadSide<IO> {
    half: ReadHalf<IO>,
    residue: DecryptedResidue,
}

/// 单方向的重入检测标记。
#[derive(Debug, Default)]
struct ReentrancyGuard {
    busy: AtomicBool,
}

impl ReentrancyGuard {
    fn try_enter(&self, violation: StateViolation) -> Result<GuardToken<'_>, TlsSessionError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TlsSessionError::state(violation));
        }
        Ok(GuardToken { guard: self })
    }
}

struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

impl<IO, B: SecurityProvider> Clone for TlsStream<IO, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<IO, B> TlsStream<IO, B>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    B: SecurityProvider,
{
    /// 以底层字节流和共享服务构造会话，此时尚未握手。
    pub fn new(io: IO, services: TlsServices<B>) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            inner: Arc::new(TlsStreamInner {
                services,
                engine: Mutex::new(None),
                reader: AsyncMutex::new(ReadSide {
                    half: read_half,
                    residue: DecryptedResidue::default(),
                }),
                writer: AsyncMutex::new(write_half),
                phase: Mutex::new(SessionPhase::Created),
                read_guard: ReentrancyGuard::default(),
                write_guard: ReentrancyGuard::default(),
            }),
        }
    }

    /// 以客户端身份完成握手与对端证书校验。
    pub async fn authenticate_as_client(
        &self,
        ctx: &CallContext,
        options: SessionOptions,
    ) -> Result<(), TlsSessionError> {
        if options.role() != Role::Client {
            return Err(TlsSessionError::configuration(
                "authenticate_as_client 需要客户端角色的选项",
            ));
        }
        self.authenticate(ctx, Arc::new(options)).await
    }

    /// 以服务端身份完成握手与（可选的）客户端证书校验。
    pub async fn authenticate_as_server(
        &self,
        ctx: &CallContext,
        options: SessionOptions,
    ) -> Result<(), TlsSessionError> {
        if options.role() != Role::Server {
            return Err(TlsSessionError::configuration(
                "authenticate_as_server 需要服务端角色的选项",
            ));
        }
        self.authenticate(ctx, Arc::new(options)).await
    }

    /// 读取热更新容器的当前快照并以服务端身份握手。
    ///
    /// 快照在握手开始时固定，握手期间的替换只影响之后的新会话。
    pub async fn authenticate_as_server_with(
        &self,
        ctx: &CallContext,
        source: &HotReloadingServerOptions,
    ) -> Result<(), TlsSessionError> {
        self.authenticate(ctx, source.snapshot()).await
    }

    async fn authenticate(
        &self,
        ctx: &CallContext,
        options: Arc<SessionOptions>,
    ) -> Result<(), TlsSessionError> {
        options.validate()?;
        self.begin_handshake()?;
        let role = options.role();
        tracing::debug!(%role, target_host = options.target_host(), "开始 TLS 握手");

        if let Err(error) = ctx.check(HANDSHAKE) {
            return Err(self.fault(error));
        }
        *self.inner.engine.lock() = Some(HandshakeEngine::new(
            self.inner.services.clone(),
            Arc::clone(&options),
        ));

        let result = {
            let mut reader = self.inner.reader.lock().await;
            let mut writer = self.inner.writer.lock().await;
            self.run_handshake(ctx, role, false, &mut reader.half, &mut writer)
                .await
        };
        match result {
            Ok(()) => {
                *self.inner.phase.lock() = SessionPhase::Authenticated;
                Ok(())
            }
            Err(error) => Err(self.fault(error)),
        }
    }

    /// 驱动握手循环直到完成，随后校验对端证书。
    async fn run_handshake(
        &self,
        ctx: &CallContext,
        role: Role,
        renegotiating: bool,
        reader: &mut ReadHalf<IO>,
        writer: &mut WriteHalf<IO>,
    ) -> Result<(), TlsSessionError> {
        let pool = self.inner.services.buffer_pool();
        // 首次握手由客户端先发言；重新协商时触发记录已暂存在后端上下文中。
        let mut inbound = if role == Role::Server && !renegotiating {
            self.read_handshake_record(ctx, reader).await?
        } else {
            pool.rent()
        };

        loop {
            let step = self.with_engine(|engine| engine.step(&inbound));
            pool.give_back(inbound);
            let token = step?;
            if !token.payload().is_empty() {
                if let Err(error) = send(ctx, writer, token.payload()).await {
                    if let Some(handshake_error) = token.to_error() {
                        tracing::debug!(%error, "握手失败后发送告警也失败");
                        return Err(handshake_error);
                    }
                    return Err(error);
                }
            }
            match token.outcome() {
                TokenOutcome::Done => break,
                TokenOutcome::Continue | TokenOutcome::Renegotiate => {
                    inbound = self.read_handshake_record(ctx, reader).await?;
                }
                TokenOutcome::Closed | TokenOutcome::Failed => {
                    return Err(token.to_error().unwrap_or_else(|| {
                        TlsSessionError::protocol("handshake_failed", "握手以终止状态结束")
                    }));
                }
            }
        }

        match self.with_engine(|engine| Ok(engine.verify_remote_certificate()))? {
            RemoteVerification::Accepted => Ok(()),
            RemoteVerification::Rejected {
                alert_record,
                error,
            } => {
                if let Some(record) = alert_record {
                    if let Err(send_error) = send(ctx, writer, &record).await {
                        tracing::debug!(error = %send_error, "发送证书拒绝告警失败");
                    }
                }
                Err(error)
            }
        }
    }

    async fn read_handshake_record(
        &self,
        ctx: &CallContext,
        reader: &mut ReadHalf<IO>,
    ) -> Result<BytesMut, TlsSessionError> {
        self.read_record(ctx, reader).await?.ok_or_else(|| {
            TlsSessionError::protocol("unexpected_eof", "对端在握手期间关闭了连接")
        })
    }

    /// 读取一条完整记录；流在记录边界处结束时返回 `None`。
    async fn read_record(
        &self,
        ctx: &CallContext,
        reader: &mut ReadHalf<IO>,
    ) -> Result<Option<BytesMut>, TlsSessionError> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        if !run_with_context(ctx, READ, read_full_or_eof(reader, &mut header)).await? {
            return Ok(None);
        }
        let parsed = RecordHeader::parse(&header)?;
        let mut frame = self.inner.services.buffer_pool().rent();
        frame.extend_from_slice(&header);
        frame.resize(parsed.frame_len(), 0);
        run_with_context(ctx, READ, reader.read_exact(&mut frame[RECORD_HEADER_SIZE..])).await?;
        tracing::trace!(
            content_type = ?parsed.content_type,
            payload = parsed.payload_len,
            "收到记录"
        );
        Ok(Some(frame))
    }

    /// 读取解密后的明文。
    ///
    /// # 契约（What）
    /// - 优先交付上次解密剩余的明文，不触发 I/O；
    /// - 返回 `0` 表示对端发送了 `close_notify` 或底层流在记录边界处结束；
    /// - 对端发起重新协商时，在本次调用内完成嵌套握手后继续读取。
    pub async fn read(&self, ctx: &CallContext, buf: &mut [u8]) -> Result<usize, TlsSessionError> {
        self.ensure_readable()?;
        let _token = self.inner.read_guard.try_enter(StateViolation::ReentrantRead)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let pool = Arc::clone(self.inner.services.buffer_pool());
        let mut reader = self.inner.reader.lock().await;
        if !reader.residue.is_empty() {
            return Ok(reader.residue.copy_to(buf, &pool));
        }
        if self.read_side_finished() {
            return Ok(0);
        }

        loop {
            let frame = match self.read_record(ctx, &mut reader.half).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!("底层流已结束");
                    self.finish_read_side();
                    return Ok(0);
                }
                Err(error) => return Err(self.fault(error)),
            };
            let status = {
                let plaintext = reader.residue.buffer_mut(&pool);
                self.with_engine(|engine| engine.decrypt(&frame, plaintext))
            };
            pool.give_back(frame);

            match status {
                Ok(SecurityStatus::Ok | SecurityStatus::ContinueNeeded) => {
                    if !reader.residue.is_empty() {
                        return Ok(reader.residue.copy_to(buf, &pool));
                    }
                    reader.residue.release(&pool);
                }
                Ok(SecurityStatus::Renegotiate) => {
                    reader.residue.release(&pool);
                    if *self.inner.phase.lock() == SessionPhase::ShutDown {
                        return Err(self.fault(TlsSessionError::protocol(
                            "renegotiate_after_shutdown",
                            "本端已发送 close_notify，不能再重新协商",
                        )));
                    }
                    if let Err(error) = self.renegotiate(ctx, &mut reader.half).await {
                        return Err(self.fault(error));
                    }
                }
                Ok(SecurityStatus::ContextExpired) => {
                    reader.residue.release(&pool);
                    tracing::debug!("对端发送了 close_notify");
                    self.finish_read_side();
                    return Ok(0);
                }
                Ok(other) => {
                    return Err(self.fault(TlsSessionError::protocol(
                        other.label(),
                        format!("解密返回了意外状态: {other}"),
                    )));
                }
                Err(error) => return Err(self.fault(error)),
            }
        }
    }

    async fn renegotiate(
        &self,
        ctx: &CallContext,
        reader: &mut ReadHalf<IO>,
    ) -> Result<(), TlsSessionError> {
        let mut writer = self.inner.writer.lock().await;
        let role = self.with_engine(|engine| {
            engine.begin_renegotiation()?;
            Ok(engine.options().role())
        })?;
        self.run_handshake(ctx, role, true, reader, &mut writer)
            .await
    }

    /// 加密并写出全部明文。
    ///
    /// # 契约（What）
    /// - 明文按协商出的最大明文长度切片，每片生成一条记录，记录顺序与明文顺序一致；
    /// - 空缓冲只有在后端声明能加密空消息时才会生成记录，否则直接返回；
    /// - 返回前刷新底层流。
    pub async fn write(&self, ctx: &CallContext, buf: &[u8]) -> Result<(), TlsSessionError> {
        self.ensure_writable()?;
        let _token = self
            .inner
            .write_guard
            .try_enter(StateViolation::ReentrantWrite)?;
        let (max_plaintext, empty_allowed) = self.with_engine(|engine| {
            let max_plaintext = engine
                .max_plaintext()
                .ok_or(TlsSessionError::state(StateViolation::NotAuthenticated))?;
            Ok((max_plaintext, engine.can_encrypt_empty_message()))
        })?;
        if buf.is_empty() && !empty_allowed {
            return Ok(());
        }

        let pool = self.inner.services.buffer_pool();
        let mut writer = self.inner.writer.lock().await;
        let mut record = pool.rent();
        let result = self
            .write_records(ctx, &mut writer, buf, max_plaintext, &mut record)
            .await;
        pool.give_back(record);
        result.map_err(|error| self.fault(error))
    }

    async fn write_records(
        &self,
        ctx: &CallContext,
        writer: &mut WriteHalf<IO>,
        buf: &[u8],
        max_plaintext: usize,
        record: &mut BytesMut,
    ) -> Result<(), TlsSessionError> {
        if buf.is_empty() {
            self.write_record(ctx, writer, buf, record).await?;
        } else {
            for chunk in buf.chunks(max_plaintext) {
                self.write_record(ctx, writer, chunk, record).await?;
            }
        }
        run_with_context(ctx, FLUSH, writer.flush()).await?;
        tracing::trace!(
            plaintext = buf.len(),
            records = buf.len().div_ceil(max_plaintext).max(1),
            "写出应用数据"
        );
        Ok(())
    }

    async fn write_record(
        &self,
        ctx: &CallContext,
        writer: &mut WriteHalf<IO>,
        chunk: &[u8],
        record: &mut BytesMut,
    ) -> Result<(), TlsSessionError> {
        record.clear();
        self.with_engine(|engine| engine.encrypt(chunk, record))?;
        run_with_context(ctx, WRITE, writer.write_all(&record[..])).await
    }

    /// 发送 `close_notify` 并关闭底层流的写方向；读方向保持可用。
    pub async fn shutdown(&self, ctx: &CallContext) -> Result<(), TlsSessionError> {
        self.ensure_writable()?;
        let _token = self
            .inner
            .write_guard
            .try_enter(StateViolation::ReentrantWrite)?;
        let record = self
            .with_engine(|engine| engine.shutdown_record())
            .map_err(|error| self.fault(error))?;

        let mut writer = self.inner.writer.lock().await;
        let sent = run_with_context(ctx, SHUTDOWN, async {
            writer.write_all(&record).await?;
            writer.flush().await?;
            writer.shutdown().await
        })
        .await;
        match sent {
            Ok(()) => {
                *self.inner.phase.lock() = SessionPhase::ShutDown;
                tracing::debug!("已发送 close_notify，写方向关闭");
                Ok(())
            }
            Err(error) => Err(self.fault(error)),
        }
    }

    fn begin_handshake(&self) -> Result<(), TlsSessionError> {
        let mut phase = self.inner.phase.lock();
        let violation = match &*phase {
            SessionPhase::Created => {
                *phase = SessionPhase::Handshaking;
                return Ok(());
            }
            SessionPhase::Handshaking => StateViolation::HandshakeInProgress,
            SessionPhase::Authenticated => StateViolation::AlreadyAuthenticated,
            SessionPhase::ShutDown => StateViolation::AlreadyShutdown,
            SessionPhase::Faulted { code, detail } => StateViolation::Faulted {
                code,
                detail: detail.clone(),
            },
        };
        Err(TlsSessionError::state(violation))
    }

    fn ensure_readable(&self) -> Result<(), TlsSessionError> {
        self.ensure_phase(true)
    }

    fn ensure_writable(&self) -> Result<(), TlsSessionError> {
        self.ensure_phase(false)
    }

    fn ensure_phase(&self, allow_shut_down: bool) -> Result<(), TlsSessionError> {
        let violation = match &*self.inner.phase.lock() {
            SessionPhase::Authenticated => return Ok(()),
            SessionPhase::ShutDown if allow_shut_down => return Ok(()),
            SessionPhase::Created | SessionPhase::Handshaking => StateViolation::NotAuthenticated,
            SessionPhase::ShutDown => StateViolation::AlreadyShutdown,
            SessionPhase::Faulted { code, detail } => StateViolation::Faulted {
                code,
                detail: detail.clone(),
            },
        };
        Err(TlsSessionError::state(violation))
    }

    /// 读方向已经见到对端关闭且本端也已关闭，安全上下文已释放。
    fn read_side_finished(&self) -> bool {
        self.inspect(|engine| Some(engine.state() == HandshakeState::Closed))
            .unwrap_or(false)
    }

    /// 读方向结束；本端已发送 `close_notify` 时双向都已关闭，释放安全上下文。
    fn finish_read_side(&self) {
        if *self.inner.phase.lock() != SessionPhase::ShutDown {
            return;
        }
        if let Some(engine) = self.inner.engine.lock().as_mut() {
            engine.close();
            tracing::debug!("TLS 会话已关闭");
        }
    }

    /// 记录首个致命错误，使会话失效并释放安全上下文。
    fn fault(&self, error: TlsSessionError) -> TlsSessionError {
        {
            let mut phase = self.inner.phase.lock();
            if !matches!(*phase, SessionPhase::Faulted { .. }) {
                *phase = SessionPhase::Faulted {
                    code: error.code(),
                    detail: error.to_string(),
                };
            }
        }
        if let Some(engine) = self.inner.engine.lock().as_mut() {
            if engine.state() != HandshakeState::Failed {
                engine.fail();
            }
        }
        tracing::warn!(code = error.code(), %error, "TLS 会话失效");
        error
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut HandshakeEngine<B>) -> Result<T, TlsSessionError>,
    ) -> Result<T, TlsSessionError> {
        match self.inner.engine.lock().as_mut() {
            Some(engine) => f(engine),
            None => Err(TlsSessionError::state(StateViolation::NotAuthenticated)),
        }
    }

    fn inspect<T>(&self, f: impl FnOnce(&HandshakeEngine<B>) -> Option<T>) -> Option<T> {
        self.inner.engine.lock().as_ref().and_then(f)
    }

    fn inspect_parameters<T>(&self, f: impl FnOnce(&NegotiatedParameters) -> Option<T>) -> Option<T> {
        self.inspect(|engine| engine.parameters().and_then(f))
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.phase.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.inner.phase.lock() == SessionPhase::Authenticated
    }

    /// 已认证且协商出的密码套件提供加密。
    pub fn is_encrypted(&self) -> bool {
        self.is_authenticated()
            && self
                .negotiated_cipher_suite()
                .is_some_and(|suite| suite != CipherSuite::TLS_NULL_WITH_NULL_NULL)
    }

    /// 本端是否以服务端身份握手；尚未开始握手时为 `false`。
    pub fn is_server(&self) -> bool {
        self.inspect(|engine| Some(engine.options().role().is_server()))
            .unwrap_or(false)
    }

    /// 双方都出示了证书。
    pub fn is_mutually_authenticated(&self) -> bool {
        self.inspect(|engine| {
            let remote = engine.parameters()?.remote_certificate.is_some();
            Some(remote && engine.local_certificate().is_some())
        })
        .unwrap_or(false)
    }

    /// 客户端返回配置的目标主机，服务端返回客户端在 SNI 中给出的主机名。
    pub fn target_host(&self) -> Option<String> {
        self.inspect(|engine| match engine.options().role() {
            Role::Client => Some(engine.options().target_host().to_owned()),
            Role::Server => engine.parameters()?.server_name.clone(),
        })
    }

    pub fn negotiated_parameters(&self) -> Option<NegotiatedParameters> {
        self.inspect_parameters(|parameters| Some(parameters.clone()))
    }

    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.inspect_parameters(|parameters| Some(parameters.cipher_suite))
    }

    pub fn protocol_version(&self) -> Option<SslProtocols> {
        self.inspect_parameters(|parameters| Some(parameters.protocol_version))
    }

    pub fn negotiated_application_protocol(&self) -> Option<Bytes> {
        self.inspect_parameters(|parameters| parameters.application_protocol.clone())
    }

    pub fn local_certificate(&self) -> Option<Certificate> {
        self.inspect(|engine| engine.local_certificate().cloned())
    }

    pub fn remote_certificate(&self) -> Option<Certificate> {
        self.inspect_parameters(|parameters| parameters.remote_certificate.clone())
    }

    /// 是否要求吊销检查。
    pub fn check_certificate_revocation(&self) -> bool {
        self.inspect(|engine| Some(engine.options().revocation_mode() != RevocationMode::NoCheck))
            .unwrap_or(false)
    }
}

impl<IO, B: SecurityProvider> fmt::Debug for TlsStream<IO, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("phase", &*self.inner.phase.lock())
            .finish_non_exhaustive()
    }
}

async fn send<W>(ctx: &CallContext, writer: &mut W, bytes: &[u8]) -> Result<(), TlsSessionError>
where
    W: AsyncWrite + Unpin,
{
    run_with_context(ctx, WRITE, async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
}

/// 填满 `buf`；在读到任何字节之前遇到 EOF 时返回 `false`。
async fn read_full_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "记录头部被截断",
            ));
        }
        filled += n;
    }
    Ok(true)
}
