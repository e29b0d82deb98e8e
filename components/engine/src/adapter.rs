//! The adapter contract: the interface the engine consumes to authenticate,
//! list, fetch, and commit deletions against whatever message store sits
//! behind it. Concrete adapters (directory-backed, SQL-backed, ...) are out
//! of scope for this crate; only the contract lives here.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// An authenticated user identity, as handed back by [`Adapter::authenticate`].
///
/// Kept distinct from the raw `USER` argument because an adapter may
/// canonicalize names (case folding, alias resolution) before the identity
/// is used as a lock-registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(pub String);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exclusive,
    ReadOnly,
}

/// What an adapter advertises about itself, consumed by the capability
/// advertiser and by the `APOP`/`AUTH` command handlers.
#[derive(Debug, Clone, Default)]
pub struct AdapterCapabilities {
    /// Whether the adapter can resolve more than one distinct user identity.
    /// A single-mailbox adapter may set this to `false`.
    pub multi_user: bool,
    /// Whether `authenticate_apop` is implemented against a real shared
    /// secret. If `false`, `APOP` is omitted from `CAPA`.
    pub apop: bool,
    /// SASL mechanism names this adapter can negotiate through `AUTH`.
    pub sasl_mechanisms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub uid: String,
    pub size: u64,
}

/// A byte stream yielding an RFC 5322 message. Boxed so adapters can return
/// anything from an in-memory cursor to a file handle to a network stream.
pub type MessageBody = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("authentication failed")]
    AuthFail,
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

/// The engine's view of a backend message store.
///
/// Implementors must be safe to hold behind a shared reference across
/// concurrent sessions, or the embedding service must set
/// `serialize_adapter_calls` and serialize access itself.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn capabilities(&self) -> AdapterCapabilities;

    /// Verify a `USER`/`PASS` credential pair.
    async fn authenticate(&self, user: &str, password: &str) -> Result<Identity, AdapterError>;

    /// Verify an `APOP` digest against the shared secret for `user`, given
    /// the server's greeting banner (including angle brackets) that the
    /// digest was computed over. The default implementation always fails;
    /// adapters that cannot expose a shared secret should leave it as is
    /// and report `apop: false` from [`Adapter::capabilities`] so the engine
    /// omits `APOP` from `CAPA` entirely.
    async fn authenticate_apop(
        &self,
        user: &str,
        digest: &str,
        greeting: &str,
    ) -> Result<Identity, AdapterError> {
        let _ = (user, digest, greeting);
        Err(AdapterError::Permanent(
            "APOP is not supported by this adapter".to_string(),
        ))
    }

    /// Open a snapshot of `identity`'s mailbox. Must be idempotent when
    /// `read_only` is `true`, since multiple read-only sessions may open it
    /// concurrently.
    async fn open_mailbox(
        &self,
        identity: &Identity,
        read_only: bool,
    ) -> Result<Box<dyn Mailbox>, AdapterError>;
}

/// Wraps an [`Adapter`] so every call into it, and into every [`Mailbox`]
/// handle it returns, is serialized behind one shared mutex, for adapters
/// that are not internally safe for concurrent use (`serialize_adapter_calls`).
pub struct SerializedAdapter<A> {
    inner: A,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<A> SerializedAdapter<A> {
    pub fn new(inner: A) -> Self {
        SerializedAdapter {
            inner,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[async_trait]
impl<A: Adapter> Adapter for SerializedAdapter<A> {
    fn capabilities(&self) -> AdapterCapabilities {
        self.inner.capabilities()
    }

    async fn authenticate(&self, user: &str, password: &str) -> Result<Identity, AdapterError> {
        let _permit = self.gate.lock().await;
        self.inner.authenticate(user, password).await
    }

    async fn authenticate_apop(
        &self,
        user: &str,
        digest: &str,
        greeting: &str,
    ) -> Result<Identity, AdapterError> {
        let _permit = self.gate.lock().await;
        self.inner.authenticate_apop(user, digest, greeting).await
    }

    async fn open_mailbox(
        &self,
        identity: &Identity,
        read_only: bool,
    ) -> Result<Box<dyn Mailbox>, AdapterError> {
        let _permit = self.gate.lock().await;
        let mailbox = self.inner.open_mailbox(identity, read_only).await?;
        Ok(Box::new(SerializedMailbox {
            inner: mailbox,
            gate: Arc::clone(&self.gate),
        }))
    }
}

/// A [`Mailbox`] handle wrapped the same way as [`SerializedAdapter`] wraps
/// its adapter, sharing the same gate so a single `serialize_adapter_calls =
/// true` setting covers the login path and every subsequent
/// `RETR`/`TOP`/`DELE`/`QUIT` on the mailbox it opened.
struct SerializedMailbox {
    inner: Box<dyn Mailbox>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

#[async_trait]
impl Mailbox for SerializedMailbox {
    async fn list_messages(&self) -> Result<Vec<MessageSummary>, AdapterError> {
        let _permit = self.gate.lock().await;
        self.inner.list_messages().await
    }

    async fn fetch_message(&self, index: usize) -> Result<MessageBody, AdapterError> {
        let _permit = self.gate.lock().await;
        self.inner.fetch_message(index).await
    }

    async fn fetch_top(&self, index: usize, lines: usize) -> Result<MessageBody, AdapterError> {
        let _permit = self.gate.lock().await;
        self.inner.fetch_top(index, lines).await
    }

    async fn commit_deletions(&self, indices: &[usize]) -> Result<(), AdapterError> {
        let _permit = self.gate.lock().await;
        self.inner.commit_deletions(indices).await
    }

    async fn abandon(&self) {
        let _permit = self.gate.lock().await;
        self.inner.abandon().await
    }
}

/// A snapshot of one user's mailbox, scoped to a single session.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// List messages in this snapshot. Order is the adapter's choice but
    /// must be stable for the lifetime of this handle; the engine numbers
    /// the returned sequence 1..N and that numbering never changes
    /// afterwards, even as indices here stay zero-based.
    async fn list_messages(&self) -> Result<Vec<MessageSummary>, AdapterError>;

    /// Fetch the full RFC 5322 message at zero-based `index` (as returned by
    /// `list_messages`). Called at most once per `RETR`.
    async fn fetch_message(&self, index: usize) -> Result<MessageBody, AdapterError>;

    /// Fetch headers, the blank separator line, and the first `lines` body
    /// lines of the message at zero-based `index`.
    async fn fetch_top(&self, index: usize, lines: usize) -> Result<MessageBody, AdapterError>;

    /// Commit deletions for the zero-based indices marked during the
    /// session. Only called on a clean `QUIT` transition into UPDATE.
    async fn commit_deletions(&self, indices: &[usize]) -> Result<(), AdapterError>;

    /// Release resources without committing anything (any non-UPDATE exit).
    async fn abandon(&self);
}
