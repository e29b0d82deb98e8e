//! Wire types: the command vocabulary (`Command`), parsed commands
//! (`Request`), and rendered replies (`Response`). Adapted from the base
//! RFC 1939 command set with the RFC 2449 (`CAPA`), RFC 2595 (`STLS`),
//! RFC 6856 (`UTF8`) and this server's own `XPRO` extensions folded in.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// APOP is used to do digest auth.
    ///
    /// Only valid in AUTHORIZATION, before a successful login. The client
    /// sends a username and an MD5 digest of the server's greeting
    /// timestamp concatenated with a shared secret; the server verifies it
    /// without ever seeing the password in the clear.
    ///
    /// C: APOP mrose c4c9334bac560ecc979e58001b3e22fb
    /// S: +OK mrose's maildrop has 2 messages (320 octets)
    APOP,
    /// AUTH indicates an authentication mechanism to the server (RFC 5034).
    ///
    /// Bare `AUTH` lists configured mechanisms, multi-line. `AUTH <mech>`
    /// begins a SASL exchange for that mechanism if the server offers it.
    ///
    /// C: AUTH
    /// S: +OK
    /// S: PLAIN
    /// S: .
    AUTH,
    /// CAPA returns the capabilities supported by the server in its current
    /// state (RFC 2449). Available in AUTHORIZATION and TRANSACTION.
    ///
    /// C: CAPA
    /// S: +OK Capability list follows
    /// S: TOP
    /// S: UIDL
    /// S: .
    CAPA,
    /// DELE marks a message deleted. Only in TRANSACTION. The server does
    /// not actually remove it until UPDATE.
    ///
    /// C: DELE 1
    /// S: +OK message 1 deleted
    DELE,
    /// LIST reports scan listings (`<n> <size>`), one message or all
    /// non-deleted messages. Only in TRANSACTION.
    LIST,
    /// NOOP does nothing but reply `+OK`. Only in TRANSACTION.
    NOOP,
    /// QUIT ends the session. From TRANSACTION it enters UPDATE first.
    QUIT,
    /// PASS completes a USER/PASS login. Only immediately after a USER that
    /// got a positive reply.
    PASS,
    /// RETR sends a full message, dot-stuffed. Only in TRANSACTION, and only
    /// for a message that is not marked deleted.
    RETR,
    /// RSET clears all deletion marks for the session. Only in TRANSACTION.
    RSET,
    /// STAT reports `<count> <size>` over non-deleted messages. Only in
    /// TRANSACTION.
    STAT,
    /// STLS requests an in-band TLS upgrade (RFC 2595). Only in
    /// AUTHORIZATION, on a listener configured for it, before any TLS is
    /// already active.
    STLS,
    /// TOP sends headers, the blank separator line, and the first `k`
    /// lines of a message's body. Only in TRANSACTION.
    TOP,
    /// UIDL reports unique-id listings (`<n> <uid>`), analogous to LIST.
    /// Only in TRANSACTION.
    UIDL,
    /// USER begins a USER/PASS login by naming a candidate mailbox. Only in
    /// AUTHORIZATION, at the start of a login attempt.
    USER,
    /// UTF8 enables UTF-8 mode for the session (RFC 6856). Only in
    /// AUTHORIZATION, before login.
    UTF8,
    /// XPRO requests this server's read-only access mode for the login that
    /// follows. Only in AUTHORIZATION, before any successful login.
    XPRO,
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Verbs are case-insensitive; match against the uppercased form.
        Ok(match s.to_ascii_uppercase().as_str() {
            "USER" => Command::USER,
            "PASS" => Command::PASS,
            "STAT" => Command::STAT,
            "UIDL" => Command::UIDL,
            "LIST" => Command::LIST,
            "RETR" => Command::RETR,
            "DELE" => Command::DELE,
            "NOOP" => Command::NOOP,
            "RSET" => Command::RSET,
            "QUIT" => Command::QUIT,
            "APOP" => Command::APOP,
            "TOP" => Command::TOP,
            "AUTH" => Command::AUTH,
            "CAPA" => Command::CAPA,
            "STLS" => Command::STLS,
            "UTF8" => Command::UTF8,
            "XPRO" => Command::XPRO,
            _ => return Err(()),
        })
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = match self {
            Command::USER => "USER",
            Command::PASS => "PASS",
            Command::STAT => "STAT",
            Command::UIDL => "UIDL",
            Command::LIST => "LIST",
            Command::RETR => "RETR",
            Command::DELE => "DELE",
            Command::NOOP => "NOOP",
            Command::RSET => "RSET",
            Command::QUIT => "QUIT",
            Command::APOP => "APOP",
            Command::TOP => "TOP",
            Command::AUTH => "AUTH",
            Command::CAPA => "CAPA",
            Command::STLS => "STLS",
            Command::UTF8 => "UTF8",
            Command::XPRO => "XPRO",
        };
        write!(f, "{}", v)
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    Apop { username: String, digest: String },
    Auth(Option<String>),
    Capa,
    Dele(usize),
    List(Option<usize>),
    Noop,
    Pass(String),
    Quit,
    Retr(usize),
    Rset,
    Stat,
    Stls,
    Top { id: usize, lines: usize },
    Uidl(Option<usize>),
    User(String),
    Utf8,
    Xpro,
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Apop { .. } => Command::APOP,
            Request::Auth(_) => Command::AUTH,
            Request::Capa => Command::CAPA,
            Request::Dele(_) => Command::DELE,
            Request::List(_) => Command::LIST,
            Request::Noop => Command::NOOP,
            Request::Pass(_) => Command::PASS,
            Request::Quit => Command::QUIT,
            Request::Retr(_) => Command::RETR,
            Request::Rset => Command::RSET,
            Request::Stat => Command::STAT,
            Request::Stls => Command::STLS,
            Request::Top { .. } => Command::TOP,
            Request::Uidl(_) => Command::UIDL,
            Request::User(_) => Command::USER,
            Request::Utf8 => Command::UTF8,
            Request::Xpro => Command::XPRO,
        }
    }
}

/// A rendered scan listing entry, shared by `LIST` and `UIDL`.
#[derive(Debug, Clone)]
pub struct ScanListing {
    pub number: usize,
    pub value: String,
}

#[derive(Debug)]
pub enum MultiLine {
    Capa(Vec<String>),
    List(Vec<ScanListing>),
    Uidl(Vec<ScanListing>),
    Auth(Vec<String>),
}

impl MultiLine {
    pub fn lines(&self) -> Vec<String> {
        match self {
            MultiLine::Capa(v) | MultiLine::Auth(v) => v.clone(),
            MultiLine::List(v) | MultiLine::Uidl(v) => {
                v.iter().map(|e| format!("{} {}", e.number, e.value)).collect()
            }
        }
    }
}
