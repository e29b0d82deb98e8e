//! The capability advertiser: renders `CAPA` output that reflects the
//! session's current state, never lying about what it will actually honor
//! (e.g. `STLS` disappears once TLS is already active).

use crate::adapter::AdapterCapabilities;
use crate::settings::TlsMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Authorization,
    Transaction,
}

pub struct CapaContext<'a> {
    pub phase: Phase,
    pub tls_active: bool,
    pub listener_tls: TlsMode,
    pub utf8_active: bool,
    pub read_only_mode_enabled: bool,
    pub allow_plaintext_auth_without_tls: bool,
    pub adapter: &'a AdapterCapabilities,
}

pub fn capabilities(ctx: &CapaContext<'_>) -> Vec<String> {
    let mut caps = vec![
        "TOP".to_string(),
        "UIDL".to_string(),
        "RESP-CODES".to_string(),
        "AUTH-RESP-CODE".to_string(),
        "PIPELINING".to_string(),
        "IMPLEMENTATION POP3SF".to_string(),
    ];

    if ctx.read_only_mode_enabled {
        caps.push("X-POP3SF-READ-ONLY".to_string());
    }

    if ctx.phase == Phase::Authorization
        && ctx.listener_tls == TlsMode::Stls
        && !ctx.tls_active
    {
        caps.push("STLS".to_string());
    }

    // UTF8 is offered unconditionally and stays listed once active so
    // clients can confirm the negotiation succeeded.
    caps.push("UTF8".to_string());

    if ctx.tls_active || ctx.allow_plaintext_auth_without_tls {
        caps.push("USER".to_string());
    }

    if ctx.adapter.apop {
        caps.push("APOP".to_string());
    }

    if !ctx.adapter.sasl_mechanisms.is_empty() {
        caps.push(format!("SASL {}", ctx.adapter.sasl_mechanisms.join(" ")));
    }

    caps
}
