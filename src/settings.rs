// src/settings.rs
//! Configuration values for a handshake run. Built once at startup and handed to
//! the session; nothing below `main` reads the process environment.

use std::time::Duration;

use crate::signing::SIGNING_VERSION_V2;

pub const DEFAULT_GATEWAY_URL: &str = "wss://moltbot-production-50a1.up.railway.app/";
pub const DEFAULT_ORIGIN: &str = "https://moltbot-production-50a1.up.railway.app";
pub const TOKEN_ENV: &str = "CLAWDBOT_GATEWAY_TOKEN";

/// Identity and auth fields that go into the connect request.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub token: Option<String>,
    pub with_device: bool,
    pub signing_version: String,
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client_id: String,
    pub client_version: String,
    pub platform: String,
    pub client_mode: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub user_agent: String,
    pub locale: String,
    pub request_id_prefix: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            token: None,
            with_device: false,
            signing_version: SIGNING_VERSION_V2.into(),
            min_protocol: 3,
            max_protocol: 3,
            // must be one of the gateway's known client ids
            client_id: "moltbot-probe".into(),
            client_version: "dev".into(),
            platform: std::env::consts::OS.into(),
            client_mode: "webchat".into(),
            role: "operator".into(),
            scopes: vec![
                "operator.admin".into(),
                "operator.approvals".into(),
                "operator.pairing".into(),
            ],
            user_agent: format!("gateway-probe/{}", env!("CARGO_PKG_VERSION")),
            locale: "en-US".into(),
            request_id_prefix: "probe".into(),
        }
    }
}

impl HandshakeConfig {
    /// Empty tokens count as absent.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn signed(mut self, with_device: bool) -> Self {
        self.with_device = with_device;
        self
    }
}

/// Deadlines and pacing for the three suspension points of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub open_timeout: Duration,
    pub challenge_timeout: Duration,
    pub response_timeout: Duration,
    /// Pause between receiving the challenge and sending connect.
    pub send_delay: Duration,
    /// How long to keep the channel open after the outcome is known.
    pub linger: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            challenge_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            send_delay: Duration::from_millis(100),
            linger: Duration::from_millis(500),
        }
    }
}

impl SessionSettings {
    /// Same deadline for every phase.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self.challenge_timeout = timeout;
        self.response_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub url: String,
    pub origin: String,
    pub handshake: HandshakeConfig,
    pub session: SessionSettings,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.into(),
            origin: DEFAULT_ORIGIN.into(),
            handshake: HandshakeConfig::default(),
            session: SessionSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_absent() {
        assert_eq!(HandshakeConfig::default().with_token(Some(String::new())).token, None);
        assert_eq!(
            HandshakeConfig::default().with_token(Some("t".into())).token.as_deref(),
            Some("t")
        );
    }

    #[test]
    fn defaults_match_gateway_expectations() {
        let cfg = HandshakeConfig::default();
        assert_eq!(cfg.signing_version, "v2");
        assert_eq!((cfg.min_protocol, cfg.max_protocol), (3, 3));
        assert_eq!(cfg.scopes.len(), 3);
        assert!(!cfg.with_device);
    }

    #[test]
    fn with_timeout_sets_every_phase() {
        let s = SessionSettings::default().with_timeout(Duration::from_millis(7));
        assert_eq!(s.open_timeout, Duration::from_millis(7));
        assert_eq!(s.challenge_timeout, Duration::from_millis(7));
        assert_eq!(s.response_timeout, Duration::from_millis(7));
    }
}
