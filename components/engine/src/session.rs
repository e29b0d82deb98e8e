//! The session state machine: one task per TCP connection, driving
//! GREETING → AUTHORIZATION → TRANSACTION → UPDATE → CLOSED and
//! dispatching every verb according to its state's contract.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::pin::Pin;
use std::process;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;
use tokio_rustls::server::TlsStream;

use crate::adapter::{AccessMode, Adapter, Identity, Mailbox};
use crate::capa::{self, CapaContext, Phase};
use crate::codec::{read_command_line, write_stuffed_body, LineOutcome};
use crate::error::Error;
use crate::lock::{LockGuard, LockRegistry};
use crate::mailbox::MessageView;
use crate::parser;
use crate::proto::{Command, MultiLine, Request, ScanListing};
use crate::settings::{Settings, TlsMode};
use crate::shutdown::ShutdownState;
use crate::throttle::AuthThrottle;
use crate::tls::TlsLayer;

/// One lock scope for the whole server: this engine has no notion of
/// multiple adapter-backed namespaces, only one adapter per listener set.
const LOCK_SCOPE: &str = "default";

/// The session's socket, either still cleartext or upgraded in place by
/// `STLS`/implicit TLS. Both variants are driven identically by the codec.
pub enum Transport<IO> {
    Plain(IO),
    Tls(Box<TlsStream<IO>>),
}

impl<IO: AsyncRead + AsyncWrite + Unpin> AsyncRead for Transport<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(io) => Pin::new(io).poll_read(cx, buf),
            Transport::Tls(io) => Pin::new(io.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<IO: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Transport<IO> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(io) => Pin::new(io).poll_write(cx, buf),
            Transport::Tls(io) => Pin::new(io.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(io) => Pin::new(io).poll_flush(cx),
            Transport::Tls(io) => Pin::new(io.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(io) => Pin::new(io).poll_shutdown(cx),
            Transport::Tls(io) => Pin::new(io.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Reads `prefix` out before falling through to `inner`, so bytes pulled off
/// the wire while probing for a disconnect during the auth-throttle wait
/// aren't lost to whatever command read comes after.
struct PrefixedReader<'a, IO> {
    prefix: &'a mut VecDeque<u8>,
    inner: &'a mut Transport<IO>,
}

impl<'a, IO: AsyncRead + AsyncWrite + Unpin> AsyncRead for PrefixedReader<'a, IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = buf.remaining().min(this.prefix.len());
            let bytes: Vec<u8> = this.prefix.drain(..n).collect();
            buf.put_slice(&bytes);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut *this.inner).poll_read(cx, buf)
    }
}

/// Races the auth-throttle delay against the peer closing the connection, so
/// a client that disconnects mid-delay doesn't leave the session task
/// sleeping to completion for nothing. Any byte read while probing for the
/// close is pushed onto `readahead` rather than discarded.
async fn race_throttle_delay<IO: AsyncRead + AsyncWrite + Unpin>(
    wait: Duration,
    stream: &mut Transport<IO>,
    readahead: &mut VecDeque<u8>,
) -> bool {
    if wait.is_zero() {
        return false;
    }
    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);
    let mut byte = [0u8; 1];
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            result = stream.read(&mut byte) => {
                match result {
                    Ok(0) | Err(_) => return true,
                    Ok(_) => readahead.push_back(byte[0]),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Authorization,
    Transaction,
}

enum Outcome {
    Continue,
    Close,
}

/// Everything a session needs that is shared across the whole server.
pub struct SessionShared {
    pub settings: Arc<Settings>,
    pub adapter: Arc<dyn Adapter>,
    pub lock_registry: Arc<LockRegistry>,
    pub throttle: Arc<AuthThrottle>,
    pub tls_layer: Option<Arc<TlsLayer>>,
    pub listener_tls_mode: TlsMode,
}

/// One POP3 session, generic over its transport so the engine can drive a
/// real `TcpStream` in production and an in-memory `tokio::io::DuplexStream`
/// (or anything else `AsyncRead + AsyncWrite`) in tests.
pub struct Session<IO> {
    shared: Arc<SessionShared>,
    stream: Option<Transport<IO>>,
    remote: SocketAddr,
    shutdown_rx: watch::Receiver<ShutdownState>,
    state: State,
    tls_active: bool,
    utf8_active: bool,
    read_only_requested: bool,
    read_only: bool,
    pending_user: Option<String>,
    identity: Option<Identity>,
    lock_guard: Option<LockGuard>,
    mailbox: Option<Box<dyn Mailbox>>,
    message_view: MessageView,
    greeting: String,
    /// Bytes pulled off the wire while probing for a disconnect during an
    /// auth-throttle wait, to be replayed to the next command read.
    readahead: VecDeque<u8>,
}

impl<IO: AsyncRead + AsyncWrite + Unpin> Session<IO> {
    pub fn new(
        shared: Arc<SessionShared>,
        stream: IO,
        remote: SocketAddr,
        tls_active: bool,
        shutdown_rx: watch::Receiver<ShutdownState>,
    ) -> Self {
        let apop_offered = shared.adapter.capabilities().apop;
        let greeting = if apop_offered {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            format!(
                "+OK POP3SF ready <{}.{}@pop3sf>",
                process::id(),
                now.subsec_nanos()
            )
        } else {
            "+OK POP3SF ready".to_string()
        };

        Session {
            shared,
            stream: Some(Transport::Plain(stream)),
            remote,
            shutdown_rx,
            state: State::Authorization,
            tls_active,
            utf8_active: false,
            read_only_requested: false,
            read_only: false,
            pending_user: None,
            identity: None,
            lock_guard: None,
            mailbox: None,
            message_view: MessageView::default(),
            greeting,
            readahead: VecDeque::new(),
        }
    }

    /// Build a session for a socket that already completed an implicit-TLS
    /// handshake before this constructor is called.
    pub fn from_tls(
        shared: Arc<SessionShared>,
        tls_stream: TlsStream<IO>,
        remote: SocketAddr,
        shutdown_rx: watch::Receiver<ShutdownState>,
    ) -> Self {
        let apop_offered = shared.adapter.capabilities().apop;
        let greeting = if apop_offered {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            format!(
                "+OK POP3SF ready <{}.{}@pop3sf>",
                process::id(),
                now.subsec_nanos()
            )
        } else {
            "+OK POP3SF ready".to_string()
        };

        Session {
            shared,
            stream: Some(Transport::Tls(Box::new(tls_stream))),
            remote,
            shutdown_rx,
            state: State::Authorization,
            tls_active: true,
            utf8_active: false,
            read_only_requested: false,
            read_only: false,
            pending_user: None,
            identity: None,
            lock_guard: None,
            mailbox: None,
            message_view: MessageView::default(),
            greeting,
            readahead: VecDeque::new(),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Transport<IO>, Error> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::InternalBug("session stream missing".to_string()))
    }

    pub async fn run(mut self) {
        let greeting = self.greeting.clone();
        if self.write_line(&greeting).await.is_err() {
            return;
        }
        log::info!("session accepted from {}", self.remote);

        loop {
            if *self.shutdown_rx.borrow() == ShutdownState::Draining {
                let _ = self
                    .write_line("-ERR [SYS/TEMP] server shutting down")
                    .await;
                log::info!("session {} closing for shutdown", self.remote);
                break;
            }

            let idle_timeout = self.shared.settings.idle_timeout();
            let (stream, readahead) = match self.stream.as_mut() {
                Some(s) => (s, &mut self.readahead),
                None => break,
            };
            let mut reader = PrefixedReader {
                prefix: readahead,
                inner: stream,
            };
            let read = tokio::time::timeout(idle_timeout, read_command_line(&mut reader)).await;

            let line = match read {
                Ok(Ok(LineOutcome::Line(bytes))) => bytes,
                Ok(Ok(LineOutcome::Reject)) => {
                    let _ = self.write_line("-ERR line too long").await;
                    break;
                }
                Ok(Ok(LineOutcome::Eof)) => break,
                Ok(Err(_io)) => break,
                Err(_elapsed) => {
                    log::debug!("session {} idle timeout", self.remote);
                    break;
                }
            };

            let request = match parser::parse(&line, self.utf8_active) {
                Ok(r) => r,
                Err(e) => {
                    let _ = self.write_line(&e.wire_line()).await;
                    continue;
                }
            };

            if !self.is_valid_command(request.command()) {
                let _ = self.write_line(&Error::WrongState.wire_line()).await;
                continue;
            }

            match self.dispatch(request).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Close) => break,
                Err(e) => {
                    if e.has_wire_line() {
                        let _ = self.write_line(&e.wire_line()).await;
                    }
                    if e.closes_connection() {
                        break;
                    }
                }
            }
        }

        self.cleanup().await;
    }

    fn is_valid_command(&self, cmd: Command) -> bool {
        match self.state {
            State::Authorization => match cmd {
                Command::CAPA
                | Command::UTF8
                | Command::XPRO
                | Command::USER
                | Command::PASS
                | Command::APOP
                | Command::AUTH
                | Command::QUIT => true,
                Command::STLS => {
                    self.shared.listener_tls_mode == TlsMode::Stls && !self.tls_active
                }
                _ => false,
            },
            State::Transaction => matches!(
                cmd,
                Command::CAPA
                    | Command::STAT
                    | Command::LIST
                    | Command::UIDL
                    | Command::RETR
                    | Command::TOP
                    | Command::DELE
                    | Command::NOOP
                    | Command::RSET
                    | Command::QUIT
            ),
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<Outcome, Error> {
        match request {
            Request::Capa => {
                let phase = match self.state {
                    State::Authorization => Phase::Authorization,
                    State::Transaction => Phase::Transaction,
                };
                let adapter_caps = self.shared.adapter.capabilities();
                let ctx = CapaContext {
                    phase,
                    tls_active: self.tls_active,
                    listener_tls: self.shared.listener_tls_mode,
                    utf8_active: self.utf8_active,
                    read_only_mode_enabled: self.shared.settings.allow_read_only_mode,
                    allow_plaintext_auth_without_tls: self
                        .shared
                        .settings
                        .allow_plaintext_auth_without_tls,
                    adapter: &adapter_caps,
                };
                let lines = capa::capabilities(&ctx);
                self.write_multiline("+OK Capability list follows", lines)
                    .await?;
                Ok(Outcome::Continue)
            }
            Request::Stls => self.handle_stls().await,
            Request::Utf8 => {
                self.utf8_active = true;
                self.write_line("+OK UTF8 enabled").await?;
                Ok(Outcome::Continue)
            }
            Request::Xpro => {
                if !self.shared.settings.allow_read_only_mode {
                    return Err(Error::ReadOnlyRefusal("read-only mode not permitted"));
                }
                self.read_only_requested = true;
                self.write_line("+OK read-only mode requested").await?;
                Ok(Outcome::Continue)
            }
            Request::Auth(mech) => self.handle_auth(mech).await,
            Request::User(name) => {
                self.pending_user = Some(name);
                self.write_line("+OK send PASS").await?;
                Ok(Outcome::Continue)
            }
            Request::Pass(password) => {
                let user = self
                    .pending_user
                    .take()
                    .ok_or(Error::WrongState)?;
                self.attempt_login(user, password).await?;
                Ok(Outcome::Continue)
            }
            Request::Apop { username, digest } => {
                self.attempt_login_apop(username, digest).await?;
                Ok(Outcome::Continue)
            }
            Request::Quit => self.handle_quit().await,
            Request::Stat => {
                let (count, octets) = self.message_view.stat();
                self.write_line(&format!("+OK {} {}", count, octets)).await?;
                Ok(Outcome::Continue)
            }
            Request::List(None) => {
                let entries: Vec<ScanListing> = self
                    .message_view
                    .active()
                    .map(|e| ScanListing {
                        number: e.number,
                        value: e.size.to_string(),
                    })
                    .collect();
                self.write_multiline("+OK scan listing follows", MultiLine::List(entries).lines())
                    .await?;
                Ok(Outcome::Continue)
            }
            Request::List(Some(n)) => {
                self.message_view.active_index(n)?;
                let entry = self.message_view.get(n).ok_or(Error::OutOfRange)?;
                self.write_line(&format!("+OK {} {}", n, entry.size)).await?;
                Ok(Outcome::Continue)
            }
            Request::Uidl(None) => {
                let entries: Vec<ScanListing> = self
                    .message_view
                    .active()
                    .map(|e| ScanListing {
                        number: e.number,
                        value: e.uid.clone(),
                    })
                    .collect();
                self.write_multiline("+OK unique-id listing follows", MultiLine::Uidl(entries).lines())
                    .await?;
                Ok(Outcome::Continue)
            }
            Request::Uidl(Some(n)) => {
                self.message_view.active_index(n)?;
                let entry = self.message_view.get(n).ok_or(Error::OutOfRange)?;
                self.write_line(&format!("+OK {} {}", n, entry.uid)).await?;
                Ok(Outcome::Continue)
            }
            Request::Retr(n) => {
                let index = self.message_view.active_index(n)?;
                let size = self
                    .message_view
                    .get(n)
                    .ok_or(Error::OutOfRange)?
                    .size;
                let mailbox = self
                    .mailbox
                    .as_ref()
                    .ok_or_else(|| Error::InternalBug("no mailbox bound".to_string()))?;
                let mut body = mailbox.fetch_message(index).await?;
                self.write_line(&format!("+OK {} octets", size)).await?;
                let stream = self.stream_mut()?;
                write_stuffed_body(&mut body, stream)
                    .await
                    .map_err(|e| Error::InternalBug(e.to_string()))?;
                Ok(Outcome::Continue)
            }
            Request::Top { id, lines } => {
                let index = self.message_view.active_index(id)?;
                let mailbox = self
                    .mailbox
                    .as_ref()
                    .ok_or_else(|| Error::InternalBug("no mailbox bound".to_string()))?;
                let mut body = mailbox.fetch_top(index, lines).await?;
                self.write_line("+OK top of message follows").await?;
                let stream = self.stream_mut()?;
                write_stuffed_body(&mut body, stream)
                    .await
                    .map_err(|e| Error::InternalBug(e.to_string()))?;
                Ok(Outcome::Continue)
            }
            Request::Dele(n) => {
                if self.read_only {
                    return Err(Error::ReadOnlyRefusal("session is read-only"));
                }
                self.message_view.mark_deleted(n)?;
                self.write_line(&format!("+OK message {} deleted", n)).await?;
                Ok(Outcome::Continue)
            }
            Request::Rset => {
                if self.read_only {
                    return Err(Error::ReadOnlyRefusal("session is read-only"));
                }
                self.message_view.reset_deletions();
                self.write_line("+OK").await?;
                Ok(Outcome::Continue)
            }
            Request::Noop => {
                self.write_line("+OK").await?;
                Ok(Outcome::Continue)
            }
        }
    }

    async fn handle_stls(&mut self) -> Result<Outcome, Error> {
        let tls_layer = self
            .shared
            .tls_layer
            .clone()
            .ok_or(Error::WrongState)?;
        self.write_line("+OK begin TLS negotiation").await?;

        let plain = match self.stream.take() {
            Some(Transport::Plain(tcp)) => tcp,
            other => {
                self.stream = other;
                return Err(Error::TlsFailure("STLS on non-plain transport".to_string()));
            }
        };

        match tls_layer.accept(plain).await {
            Ok(tls_stream) => {
                self.stream = Some(Transport::Tls(Box::new(tls_stream)));
                self.tls_active = true;
                log::debug!("session {} upgraded to TLS", self.remote);
                Ok(Outcome::Continue)
            }
            Err(e) => {
                log::warn!("session {} TLS upgrade failed: {}", self.remote, e);
                Err(e)
            }
        }
    }

    async fn handle_auth(&mut self, mech: Option<String>) -> Result<Outcome, Error> {
        let caps = self.shared.adapter.capabilities();
        match mech {
            None => {
                if caps.sasl_mechanisms.is_empty() {
                    self.write_line("-ERR no mechanisms available").await?;
                } else {
                    self.write_multiline("+OK", MultiLine::Auth(caps.sasl_mechanisms).lines())
                        .await?;
                }
            }
            Some(name) => {
                if caps.sasl_mechanisms.iter().any(|m| m.eq_ignore_ascii_case(&name)) {
                    self.write_line("-ERR SASL exchange not supported by this adapter")
                        .await?;
                } else {
                    self.write_line("-ERR unrecognized mechanism").await?;
                }
            }
        }
        Ok(Outcome::Continue)
    }

    async fn handle_quit(&mut self) -> Result<Outcome, Error> {
        match self.state {
            State::Authorization => {
                self.write_line("+OK POP3SF signing off").await?;
                Ok(Outcome::Close)
            }
            State::Transaction => {
                let indices = self.message_view.deleted_indices();
                let commit = if let Some(mailbox) = &self.mailbox {
                    mailbox.commit_deletions(&indices).await
                } else {
                    Ok(())
                };
                // Lock release is left to `cleanup()`, which abandons the
                // mailbox handle first and only then drops the lock guard,
                // matching the adapter-before-lock release order.
                match commit {
                    Ok(()) => {
                        self.write_line("+OK POP3SF signing off").await?;
                    }
                    Err(e) => {
                        log::warn!("session {} commit failed: {}", self.remote, e);
                        let mapped: Error = e.into();
                        self.write_line(&mapped.wire_line()).await?;
                    }
                }
                Ok(Outcome::Close)
            }
        }
    }

    async fn attempt_login(&mut self, user: String, password: String) -> Result<(), Error> {
        self.wait_for_throttle().await?;
        match self.shared.adapter.authenticate(&user, &password).await {
            Ok(identity) => {
                self.shared.throttle.record_success(self.remote.ip());
                self.complete_login(identity).await
            }
            Err(e) => {
                self.shared.throttle.record_failure(self.remote.ip());
                log::warn!(
                    "session {} authentication failed for user {}",
                    self.remote,
                    user
                );
                Err(e.into())
            }
        }
    }

    async fn attempt_login_apop(&mut self, username: String, digest: String) -> Result<(), Error> {
        self.wait_for_throttle().await?;
        let greeting = self.greeting.clone();
        match self
            .shared
            .adapter
            .authenticate_apop(&username, &digest, &greeting)
            .await
        {
            Ok(identity) => {
                self.shared.throttle.record_success(self.remote.ip());
                self.complete_login(identity).await
            }
            Err(e) => {
                self.shared.throttle.record_failure(self.remote.ip());
                log::warn!(
                    "session {} APOP authentication failed for user {}",
                    self.remote,
                    username
                );
                Err(e.into())
            }
        }
    }

    /// Races the throttle delay against the peer disconnecting, so a client
    /// that gives up mid-delay doesn't leave this task sleeping for nothing.
    async fn wait_for_throttle(&mut self) -> Result<(), Error> {
        let wait = self.shared.throttle.wait_duration(self.remote.ip());
        if wait.is_zero() {
            return Ok(());
        }
        let stream = self.stream.as_mut();
        let stream = match stream {
            Some(s) => s,
            None => return Err(Error::PeerClosed),
        };
        if race_throttle_delay(wait, stream, &mut self.readahead).await {
            Err(Error::PeerClosed)
        } else {
            Ok(())
        }
    }

    async fn complete_login(&mut self, identity: Identity) -> Result<(), Error> {
        let access_mode = if self.read_only_requested {
            AccessMode::ReadOnly
        } else {
            AccessMode::Exclusive
        };

        let guard = self
            .shared
            .lock_registry
            .acquire(LOCK_SCOPE, &identity.0, access_mode)?;

        let read_only = matches!(access_mode, AccessMode::ReadOnly);
        let mailbox = match self.shared.adapter.open_mailbox(&identity, read_only).await {
            Ok(m) => m,
            Err(e) => return Err(e.into()),
        };
        let summaries = match mailbox.list_messages().await {
            Ok(s) => s,
            Err(e) => return Err(e.into()),
        };

        let (count, octets) = {
            let view = MessageView::from_summaries(summaries);
            let stat = view.stat();
            self.message_view = view;
            stat
        };

        self.lock_guard = Some(guard);
        self.mailbox = Some(mailbox);
        self.read_only = read_only;
        self.identity = Some(identity.clone());
        self.state = State::Transaction;

        log::debug!(
            "session {} authenticated as {} ({})",
            self.remote,
            identity,
            if read_only { "read-only" } else { "exclusive" }
        );

        self.write_line(&format!(
            "+OK {}'s maildrop has {} messages ({} octets)",
            identity, count, octets
        ))
        .await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), Error> {
        let stream = self.stream_mut()?;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::InternalBug(e.to_string()))?;
        stream
            .write_all(b"\r\n")
            .await
            .map_err(|e| Error::InternalBug(e.to_string()))?;
        Ok(())
    }

    async fn write_multiline(&mut self, header: &str, lines: Vec<String>) -> Result<(), Error> {
        self.write_line(header).await?;
        for line in lines {
            let stuffed = if line.starts_with('.') {
                format!(".{}", line)
            } else {
                line
            };
            self.write_line(&stuffed).await?;
        }
        self.write_line(".").await
    }

    async fn cleanup(mut self) {
        if let Some(mailbox) = self.mailbox.take() {
            mailbox.abandon().await;
        }
        self.lock_guard.take();
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown().await;
        }
        log::info!("session {} closed", self.remote);
    }
}
