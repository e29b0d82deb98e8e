//! Shared fixtures for the scenario tests in this directory: a scripted
//! in-memory [`Adapter`] and small client-side helpers for driving a
//! [`Session`] over an in-memory duplex pipe.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::watch;

use pop3sf_engine::adapter::{
    Adapter, AdapterCapabilities, AdapterError, Identity, Mailbox, MessageBody, MessageSummary,
};
use pop3sf_engine::lock::LockRegistry;
use pop3sf_engine::session::{Session, SessionShared};
use pop3sf_engine::settings::{ListenerConfig, Settings, TlsMode};
use pop3sf_engine::shutdown::ShutdownState;
use pop3sf_engine::throttle::AuthThrottle;

pub struct FixedBody {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for FixedBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

fn body(content: &str) -> MessageBody {
    Box::pin(FixedBody {
        data: content.as_bytes().to_vec(),
        pos: 0,
    })
}

#[derive(Clone)]
pub struct ScriptedMessage {
    pub uid: &'static str,
    pub content: &'static str,
}

/// A single-user (by default) scripted adapter. Every test configures the
/// mailbox contents it needs; credentials are always `alice` / `secret`
/// unless otherwise noted in the test.
pub struct ScriptedAdapter {
    users: HashMap<&'static str, &'static str>,
    mailboxes: Mutex<HashMap<&'static str, Vec<ScriptedMessage>>>,
    pub committed: Arc<Mutex<Vec<Vec<usize>>>>,
}

impl ScriptedAdapter {
    pub fn new(mailbox: Vec<ScriptedMessage>) -> Arc<Self> {
        let mut users = HashMap::new();
        users.insert("alice", "secret");
        let mut mailboxes = HashMap::new();
        mailboxes.insert("alice", mailbox);
        Arc::new(ScriptedAdapter {
            users,
            mailboxes: Mutex::new(mailboxes),
            committed: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            multi_user: true,
            apop: false,
            sasl_mechanisms: vec![],
        }
    }

    async fn authenticate(&self, user: &str, password: &str) -> Result<Identity, AdapterError> {
        match self.users.get(user) {
            Some(expected) if *expected == password => Ok(Identity(user.to_string())),
            _ => Err(AdapterError::AuthFail),
        }
    }

    async fn open_mailbox(
        &self,
        identity: &Identity,
        _read_only: bool,
    ) -> Result<Box<dyn Mailbox>, AdapterError> {
        let messages = self
            .mailboxes
            .lock()
            .unwrap()
            .get(identity.0.as_str())
            .cloned()
            .ok_or(AdapterError::AuthFail)?;
        Ok(Box::new(ScriptedMailbox {
            messages: Mutex::new(messages),
            committed: Arc::clone(&self.committed),
        }))
    }
}

struct ScriptedMailbox {
    messages: Mutex<Vec<ScriptedMessage>>,
    committed: Arc<Mutex<Vec<Vec<usize>>>>,
}

#[async_trait]
impl Mailbox for ScriptedMailbox {
    async fn list_messages(&self) -> Result<Vec<MessageSummary>, AdapterError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| MessageSummary {
                uid: m.uid.to_string(),
                size: m.content.len() as u64,
            })
            .collect())
    }

    async fn fetch_message(&self, index: usize) -> Result<MessageBody, AdapterError> {
        let messages = self.messages.lock().unwrap();
        let message = messages
            .get(index)
            .ok_or_else(|| AdapterError::Permanent("no such message".to_string()))?;
        Ok(body(message.content))
    }

    async fn fetch_top(&self, index: usize, lines: usize) -> Result<MessageBody, AdapterError> {
        let messages = self.messages.lock().unwrap();
        let message = messages
            .get(index)
            .ok_or_else(|| AdapterError::Permanent("no such message".to_string()))?;
        let mut parts = message.content.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");
        let taken: Vec<&str> = rest.split("\r\n").take(lines).collect();
        Ok(body(&format!("{}\r\n\r\n{}", headers, taken.join("\r\n"))))
    }

    async fn commit_deletions(&self, indices: &[usize]) -> Result<(), AdapterError> {
        self.committed.lock().unwrap().push(indices.to_vec());
        Ok(())
    }

    async fn abandon(&self) {}
}

pub fn test_settings() -> Settings {
    Settings {
        listeners: vec![ListenerConfig {
            address: "127.0.0.1".to_string(),
            port: 0,
            tls: TlsMode::None,
        }],
        tls: None,
        allow_read_only_mode: true,
        allow_plaintext_auth_without_tls: true,
        max_concurrent_sessions: 16,
        idle_timeout_seconds: 30,
        auth_delay_curve: vec![0, 0, 0],
        serialize_adapter_calls: false,
        shutdown_deadline_seconds: 5,
    }
}

pub fn shared_with(adapter: Arc<ScriptedAdapter>) -> Arc<SessionShared> {
    Arc::new(SessionShared {
        settings: Arc::new(test_settings()),
        adapter,
        lock_registry: LockRegistry::new(),
        throttle: Arc::new(AuthThrottle::new(vec![], Duration::from_secs(30))),
        tls_layer: None,
        listener_tls_mode: TlsMode::None,
    })
}

/// Spawn a `Session` driving one end of an in-memory duplex pipe, returning
/// the other end for the test to act as the client.
pub fn spawn_session(shared: Arc<SessionShared>) -> DuplexStream {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (_tx, rx) = watch::channel(ShutdownState::Running);
    let remote: SocketAddr = "127.0.0.1:5555".parse().unwrap();
    let session = Session::new(shared, server, remote, false, rx);
    tokio::spawn(session.run());
    client
}

/// Read lines until `.` CRLF (a multi-line terminator) is seen, returning
/// every line before it, dot-stuffing undone is left to the caller since
/// these tests mostly just assert on presence/shape.
pub async fn read_multiline(client: &mut DuplexStream) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(client).await;
        if line == "." {
            return lines;
        }
        lines.push(line);
    }
}

/// Read one CRLF-terminated line, stripped of its terminator.
pub async fn read_line(client: &mut DuplexStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = client.read(&mut byte).await.expect("read from session");
        assert_ne!(n, 0, "session closed before sending a full line");
        if byte[0] == b'\n' {
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).expect("valid utf8 response line")
}

pub async fn send_line(client: &mut DuplexStream, line: &str) {
    client.write_all(line.as_bytes()).await.unwrap();
    client.write_all(b"\r\n").await.unwrap();
}
