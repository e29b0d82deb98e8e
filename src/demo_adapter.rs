//! An in-memory demo [`Adapter`]: two hardcoded users with a handful of
//! canned RFC 5322 messages each. Stands in for a real directory-/SQL-backed
//! adapter, purely so `pop3sf` is runnable and so the engine's integration
//! tests have something concrete to drive.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::Mutex;

use pop3sf_engine::adapter::{
    Adapter, AdapterCapabilities, AdapterError, Identity, Mailbox, MessageBody, MessageSummary,
};

/// A fixed-content in-memory message body, readable through [`AsyncRead`]
/// like any adapter-supplied stream.
struct InMemoryBody {
    data: Vec<u8>,
    position: usize,
}

impl AsyncRead for InMemoryBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.position..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.position += n;
        Poll::Ready(Ok(()))
    }
}

fn body_of(message: &str) -> MessageBody {
    Box::pin(InMemoryBody {
        data: message.as_bytes().to_vec(),
        position: 0,
    })
}

/// Headers + blank line + the first `lines` body lines, CRLF-joined, mirroring
/// what a real adapter's `fetch_top` would assemble from a parsed message.
fn top_of(message: &str, lines: usize) -> MessageBody {
    let mut parts = message.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("");
    let body = parts.next().unwrap_or("");
    let body_lines: Vec<&str> = body.split("\r\n").collect();
    let taken = body_lines.into_iter().take(lines).collect::<Vec<_>>().join("\r\n");
    let rendered = format!("{}\r\n\r\n{}", headers, taken);
    body_of(&rendered)
}

#[derive(Clone)]
struct DemoMessage {
    uid: String,
    content: String,
}

struct Mailstore {
    users: HashMap<String, (String, Vec<DemoMessage>)>,
}

fn demo_message(id: &str, subject: &str, body: &str) -> DemoMessage {
    DemoMessage {
        uid: id.to_string(),
        content: format!(
            "From: sender@example.com\r\nTo: recipient@example.com\r\nSubject: {}\r\n\r\n{}\r\n",
            subject, body
        ),
    }
}

/// The demo adapter itself: a single shared [`Mailstore`], handed out as
/// [`InMemoryMailbox`] snapshots scoped to one authenticated user.
pub struct InMemoryAdapter {
    store: Arc<Mailstore>,
}

impl InMemoryAdapter {
    pub fn demo() -> Self {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            (
                "hunter2".to_string(),
                vec![
                    demo_message("uid-alice-1", "Welcome", "Hello Alice, welcome aboard."),
                    demo_message("uid-alice-2", "Second message", "Just checking in."),
                ],
            ),
        );
        users.insert(
            "bob".to_string(),
            ("swordfish".to_string(), vec![demo_message("uid-bob-1", "Hi Bob", "One message for Bob.")]),
        );

        InMemoryAdapter {
            store: Arc::new(Mailstore { users }),
        }
    }
}

#[async_trait]
impl Adapter for InMemoryAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            multi_user: true,
            apop: false,
            sasl_mechanisms: vec![],
        }
    }

    async fn authenticate(&self, user: &str, password: &str) -> Result<Identity, AdapterError> {
        match self.store.users.get(user) {
            Some((expected, _)) if expected == password => Ok(Identity(user.to_string())),
            _ => Err(AdapterError::AuthFail),
        }
    }

    async fn open_mailbox(
        &self,
        identity: &Identity,
        _read_only: bool,
    ) -> Result<Box<dyn Mailbox>, AdapterError> {
        let messages = self
            .store
            .users
            .get(&identity.0)
            .map(|(_, messages)| messages.clone())
            .ok_or(AdapterError::AuthFail)?;
        Ok(Box::new(InMemoryMailbox {
            messages: Mutex::new(messages),
        }))
    }
}

struct InMemoryMailbox {
    messages: Mutex<Vec<DemoMessage>>,
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn list_messages(&self) -> Result<Vec<MessageSummary>, AdapterError> {
        let messages = self.messages.lock().await;
        Ok(messages
            .iter()
            .map(|m| MessageSummary {
                uid: m.uid.clone(),
                size: m.content.len() as u64,
            })
            .collect())
    }

    async fn fetch_message(&self, index: usize) -> Result<MessageBody, AdapterError> {
        let messages = self.messages.lock().await;
        let message = messages
            .get(index)
            .ok_or_else(|| AdapterError::Permanent("no such message".to_string()))?;
        Ok(body_of(&message.content))
    }

    async fn fetch_top(&self, index: usize, lines: usize) -> Result<MessageBody, AdapterError> {
        let messages = self.messages.lock().await;
        let message = messages
            .get(index)
            .ok_or_else(|| AdapterError::Permanent("no such message".to_string()))?;
        Ok(top_of(&message.content, lines))
    }

    async fn commit_deletions(&self, indices: &[usize]) -> Result<(), AdapterError> {
        let mut messages = self.messages.lock().await;
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.reverse();
        for index in sorted {
            if index < messages.len() {
                messages.remove(index);
            }
        }
        Ok(())
    }

    async fn abandon(&self) {}
}
