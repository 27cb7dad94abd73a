// src/handshake.rs
//! Connect handshake state machine.
//!
//! ```text
//! Idle ─start─> Connecting ─open─> AwaitingChallenge ─challenge─> SigningAndSending
//!                                                                      │ send connect
//!                                                                      v
//!                         Completed(ok | failed) <─response─ AwaitingResponse
//! ```
//!
//! The machine does no I/O. Every input returns the actions the driver must
//! perform; close, error, timeout and abort move any live state straight to
//! `Completed(failed)`. Frames that do not fit the current state are logged
//! and dropped.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::mask_token;
use crate::correlation::RequestIds;
use crate::error::HandshakeError;
use crate::identity::Identity;
use crate::settings::HandshakeConfig;
use crate::signing::{build_signing_string, sign, verify, SigningFields};
use crate::types::{
    AuthBlock, ClientInfo, ConnectParams, DeviceBlock, Event, Inbound, Request, Response,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Response),
    Failed(HandshakeError),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn error(&self) -> Option<&HandshakeError> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Failed(e) => Some(e),
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Outcome::Ok(_) => "handshake completed".into(),
            Outcome::Failed(e) => e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeState {
    Idle,
    Connecting,
    AwaitingChallenge,
    SigningAndSending,
    AwaitingResponse,
    Completed(Outcome),
}

impl HandshakeState {
    /// Human-readable name of the wait this state represents.
    pub fn phase(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::Connecting => "opening channel",
            HandshakeState::AwaitingChallenge => "awaiting challenge",
            HandshakeState::SigningAndSending => "signing",
            HandshakeState::AwaitingResponse => "awaiting response",
            HandshakeState::Completed(_) => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    /// Transmit this text frame.
    Send(String),
    /// The session reached a terminal state.
    Finish(Outcome),
}

pub type IdentityProvider = fn() -> Result<Identity, HandshakeError>;

pub struct Handshake {
    config: HandshakeConfig,
    state: HandshakeState,
    ids: RequestIds,
    nonce: Option<String>,
    identity: Option<Identity>,
    identity_provider: IdentityProvider,
    pending_id: Option<String>,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        let ids = RequestIds::new(config.request_id_prefix.clone());
        Self {
            config,
            state: HandshakeState::Idle,
            ids,
            nonce: None,
            identity: None,
            identity_provider: Identity::generate,
            pending_id: None,
        }
    }

    /// Uses a caller-supplied identity instead of generating one on demand.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_identity_provider(mut self, provider: IdentityProvider) -> Self {
        self.identity_provider = provider;
        self
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn pending_request_id(&self) -> Option<&str> {
        self.pending_id.as_deref()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.state {
            HandshakeState::Completed(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn start(&mut self) {
        if self.state == HandshakeState::Idle {
            info!(
                mode = if self.config.with_device { "device" } else { "token" },
                token = %mask_token(self.config.token.as_deref()),
                "starting handshake"
            );
            self.state = HandshakeState::Connecting;
        }
    }

    pub fn on_open(&mut self) {
        match self.state {
            HandshakeState::Connecting => {
                info!("channel open, awaiting challenge");
                self.state = HandshakeState::AwaitingChallenge;
            }
            ref s => warn!(state = s.phase(), "open signal ignored"),
        }
    }

    pub fn on_message(&mut self, text: &str, now_ms: i64) -> Vec<HandshakeAction> {
        if self.is_complete() {
            debug!("frame after completion dropped");
            return Vec::new();
        }
        debug!(frame = %text, "received");
        match Inbound::parse(text) {
            Inbound::Event(ev) => self.on_event(ev, now_ms),
            Inbound::Response(res) => self.on_response(res),
            Inbound::Unrecognized { reason } => {
                let err = HandshakeError::Protocol(reason);
                warn!(error = %err, "ignoring frame");
                Vec::new()
            }
        }
    }

    pub fn on_close(&mut self, code: Option<u16>, reason: &str) -> Vec<HandshakeAction> {
        let reason = if reason.is_empty() { "No reason" } else { reason };
        let detail = match code {
            Some(code) => format!("channel closed during {}: {code} - {reason}", self.state.phase()),
            None => format!("channel closed during {}: {reason}", self.state.phase()),
        };
        self.fail(HandshakeError::Transport(detail))
    }

    pub fn on_error(&mut self, detail: &str) -> Vec<HandshakeAction> {
        self.fail(HandshakeError::Transport(detail.to_string()))
    }

    pub fn on_timeout(&mut self) -> Vec<HandshakeAction> {
        let phase = self.state.phase();
        self.fail(HandshakeError::HandshakeTimeout { phase })
    }

    pub fn on_abort(&mut self) -> Vec<HandshakeAction> {
        self.fail(HandshakeError::Aborted)
    }

    fn on_event(&mut self, ev: Event, now_ms: i64) -> Vec<HandshakeAction> {
        let Some(challenge) = ev.challenge() else {
            debug!(event = %ev.event, "ignoring event");
            return Vec::new();
        };
        info!(nonce = challenge.nonce.as_deref().unwrap_or("<none>"), "challenge received");
        match self.state {
            HandshakeState::AwaitingChallenge => {
                if self.config.with_device && challenge.nonce.is_none() {
                    let err = HandshakeError::Protocol("challenge carries no nonce to sign".into());
                    warn!(error = %err, "ignoring frame");
                    return Vec::new();
                }
                self.nonce = challenge.nonce;
                self.state = HandshakeState::SigningAndSending;
                match self.build_request(now_ms) {
                    Ok(request) => self.send(request),
                    Err(err) => self.fail(err),
                }
            }
            HandshakeState::AwaitingResponse => {
                // only the latest nonce is kept; the request already sent is not replayed
                warn!("challenge repeated after connect was sent; keeping latest nonce");
                if challenge.nonce.is_some() {
                    self.nonce = challenge.nonce;
                }
                Vec::new()
            }
            ref s => {
                warn!(state = s.phase(), "challenge ignored");
                Vec::new()
            }
        }
    }

    fn on_response(&mut self, res: Response) -> Vec<HandshakeAction> {
        if self.state != HandshakeState::AwaitingResponse
            || self.pending_id.as_deref() != Some(res.id.as_str())
        {
            warn!(id = %res.id, "uncorrelated response ignored");
            return Vec::new();
        }
        let outcome = if res.ok {
            info!(id = %res.id, "connect accepted");
            Outcome::Ok(res)
        } else {
            let message = res.error_message();
            info!(id = %res.id, error = %message, "connect rejected");
            Outcome::Failed(HandshakeError::AuthRejected(message))
        };
        self.finish(outcome)
    }

    fn send(&mut self, request: Request) -> Vec<HandshakeAction> {
        let text = match serde_json::to_string(&request) {
            Ok(t) => t,
            Err(e) => return self.fail(HandshakeError::Protocol(format!("encode connect: {e}"))),
        };
        match serde_json::to_string_pretty(&request.redacted()) {
            Ok(logged) => info!("sending connect request:\n{logged}"),
            Err(_) => info!(id = %request.id, "sending connect request"),
        }
        self.pending_id = Some(request.id);
        self.state = HandshakeState::AwaitingResponse;
        vec![HandshakeAction::Send(text)]
    }

    fn build_request(&mut self, now_ms: i64) -> Result<Request, HandshakeError> {
        let cfg = &self.config;
        let mut params = ConnectParams {
            min_protocol: cfg.min_protocol,
            max_protocol: cfg.max_protocol,
            client: ClientInfo {
                id: cfg.client_id.clone(),
                version: cfg.client_version.clone(),
                platform: cfg.platform.clone(),
                mode: cfg.client_mode.clone(),
                instance_id: Uuid::new_v4().to_string(),
            },
            role: cfg.role.clone(),
            scopes: cfg.scopes.clone(),
            auth: cfg.token.clone().map(|token| AuthBlock { token }),
            device: None,
            user_agent: cfg.user_agent.clone(),
            locale: cfg.locale.clone(),
        };

        if self.config.with_device {
            params.device = Some(self.device_block(now_ms)?);
        }

        let id = self.ids.next_id(now_ms);
        Ok(Request::connect(id, params))
    }

    fn device_block(&mut self, now_ms: i64) -> Result<DeviceBlock, HandshakeError> {
        let nonce = match self.nonce.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(HandshakeError::Signing("no challenge nonce to sign".into())),
        };
        if self.identity.is_none() {
            let identity = (self.identity_provider)()?;
            info!(device_id = %identity.device_id(), "generated device identity");
            self.identity = Some(identity);
        }
        let Some(identity) = self.identity.as_ref() else {
            return Err(HandshakeError::KeyGeneration("identity unavailable".into()));
        };

        let cfg = &self.config;
        let message = build_signing_string(&SigningFields {
            version: &cfg.signing_version,
            device_id: identity.device_id(),
            client_id: &cfg.client_id,
            client_mode: &cfg.client_mode,
            role: &cfg.role,
            scopes: &cfg.scopes,
            signed_at_ms: now_ms,
            token: cfg.token.as_deref(),
            nonce: Some(&nonce),
        })
        .map_err(|e| HandshakeError::Signing(e.to_string()))?;

        let signature = sign(&message, identity.private_key())?;
        let public_key = identity.public_key_base64url();
        verify(&message, &signature, &public_key)
            .map_err(|e| HandshakeError::Signing(format!("self-check failed: {e}")))?;
        debug!(fields = message.split('|').count(), "signed connect payload");

        Ok(DeviceBlock {
            id: identity.device_id().to_string(),
            public_key,
            signature,
            signed_at: now_ms,
            nonce,
        })
    }

    fn fail(&mut self, err: HandshakeError) -> Vec<HandshakeAction> {
        if self.is_complete() {
            return Vec::new();
        }
        warn!(phase = self.state.phase(), error = %err, "handshake failed");
        self.finish(Outcome::Failed(err))
    }

    fn finish(&mut self, outcome: Outcome) -> Vec<HandshakeAction> {
        self.state = HandshakeState::Completed(outcome.clone());
        vec![HandshakeAction::Finish(outcome)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const NOW: i64 = 1_700_000_000_000;

    fn challenge(nonce: &str) -> String {
        json!({"type":"event","event":"connect.challenge","payload":{"nonce":nonce}}).to_string()
    }

    fn open(config: HandshakeConfig) -> Handshake {
        let mut hs = Handshake::new(config);
        hs.start();
        hs.on_open();
        hs
    }

    fn sent(actions: &[HandshakeAction]) -> Value {
        match actions {
            [HandshakeAction::Send(text)] => serde_json::from_str(text).unwrap(),
            other => panic!("expected one send, got {other:?}"),
        }
    }

    fn signed_config() -> HandshakeConfig {
        HandshakeConfig::default().with_token(Some("secret-token-value".into())).signed(true)
    }

    #[test]
    fn walks_states_in_order() {
        let mut hs = Handshake::new(HandshakeConfig::default());
        assert_eq!(*hs.state(), HandshakeState::Idle);
        hs.start();
        assert_eq!(*hs.state(), HandshakeState::Connecting);
        hs.on_open();
        assert_eq!(*hs.state(), HandshakeState::AwaitingChallenge);
        let req = sent(&hs.on_message(&challenge("n1"), NOW));
        assert_eq!(*hs.state(), HandshakeState::AwaitingResponse);
        let res = json!({"type":"res","id":req["id"],"ok":true}).to_string();
        let actions = hs.on_message(&res, NOW);
        assert!(matches!(&actions[..], [HandshakeAction::Finish(Outcome::Ok(_))]));
        assert!(hs.outcome().unwrap().is_ok());
    }

    #[test]
    fn signed_request_carries_verifiable_device_block() {
        let mut hs = open(signed_config()).with_identity(Identity::from_seed([5u8; 32]));
        let req = sent(&hs.on_message(&challenge("abc123"), NOW));

        assert_eq!(req["method"], "connect");
        let device = &req["params"]["device"];
        assert_eq!(device["nonce"], "abc123");
        assert_eq!(device["signedAt"], NOW);
        let identity = hs.identity().unwrap();
        assert_eq!(device["id"], identity.device_id());
        assert_eq!(device["publicKey"], identity.public_key_base64url());

        let cfg = signed_config();
        let message = build_signing_string(&SigningFields {
            version: "v2",
            device_id: identity.device_id(),
            client_id: &cfg.client_id,
            client_mode: &cfg.client_mode,
            role: &cfg.role,
            scopes: &cfg.scopes,
            signed_at_ms: NOW,
            token: cfg.token.as_deref(),
            nonce: Some("abc123"),
        })
        .unwrap();
        verify(
            &message,
            device["signature"].as_str().unwrap(),
            device["publicKey"].as_str().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn token_mode_never_attaches_device() {
        let mut hs = open(HandshakeConfig::default().with_token(Some("tok".into())));
        let req = sent(&hs.on_message(&challenge("abc123"), NOW));
        assert!(req["params"].get("device").is_none());
        assert_eq!(req["params"]["auth"]["token"], "tok");
        assert!(hs.identity().is_none());
    }

    #[test]
    fn no_token_means_no_auth_block() {
        let mut hs = open(HandshakeConfig::default());
        let req = sent(&hs.on_message(&challenge("n"), NOW));
        assert!(req["params"].get("auth").is_none());
        assert!(req["params"]["client"]["instanceId"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn signed_mode_waits_for_nonce() {
        let mut hs = open(signed_config());
        let no_nonce = json!({"type":"event","event":"connect.challenge","payload":{}}).to_string();
        assert!(hs.on_message(&no_nonce, NOW).is_empty());
        let other = json!({"type":"event","event":"presence","payload":{}}).to_string();
        assert!(hs.on_message(&other, NOW).is_empty());
        assert_eq!(*hs.state(), HandshakeState::AwaitingChallenge);
        assert!(hs.pending_request_id().is_none());
    }

    #[test]
    fn signed_mode_drops_empty_nonce_and_keeps_waiting() {
        let mut hs = open(signed_config()).with_identity(Identity::from_seed([4u8; 32]));
        let empty = json!({"type":"event","event":"connect.challenge","payload":{"nonce":""}});
        assert!(hs.on_message(&empty.to_string(), NOW).is_empty());
        assert_eq!(*hs.state(), HandshakeState::AwaitingChallenge);
        assert!(hs.outcome().is_none());

        let req = sent(&hs.on_message(&challenge("real"), NOW));
        assert_eq!(req["params"]["device"]["nonce"], "real");
    }

    #[test]
    fn token_mode_connects_on_challenge_without_nonce() {
        let mut hs = open(HandshakeConfig::default().with_token(Some("tok".into())));
        let bare = json!({"type":"event","event":"connect.challenge","payload":{}});
        let req = sent(&hs.on_message(&bare.to_string(), NOW));
        assert_eq!(req["method"], "connect");
        assert!(req["params"].get("device").is_none());
        assert_eq!(hs.nonce(), None);
        assert_eq!(*hs.state(), HandshakeState::AwaitingResponse);
    }

    #[test]
    fn rejection_preserves_server_message() {
        let mut hs = open(HandshakeConfig::default());
        let req = sent(&hs.on_message(&challenge("n"), NOW));
        let res = json!({"type":"res","id":req["id"],"ok":false,"error":{"message":"bad token"}});
        hs.on_message(&res.to_string(), NOW);
        let outcome = hs.outcome().unwrap();
        assert_eq!(outcome.error(), Some(&HandshakeError::AuthRejected("bad token".into())));
        assert_eq!(outcome.detail(), "bad token");
    }

    #[test]
    fn uncorrelated_and_garbage_frames_are_ignored() {
        let mut hs = open(HandshakeConfig::default());
        sent(&hs.on_message(&challenge("n"), NOW));
        assert!(hs.on_message("garbage", NOW).is_empty());
        assert!(hs.on_message(r#"{"type":"mystery"}"#, NOW).is_empty());
        assert!(hs.on_message(r#"{"type":"res","id":"other","ok":true}"#, NOW).is_empty());
        assert_eq!(*hs.state(), HandshakeState::AwaitingResponse);
    }

    #[test]
    fn repeated_challenge_keeps_latest_nonce_without_resending() {
        let mut hs = open(HandshakeConfig::default());
        sent(&hs.on_message(&challenge("first"), NOW));
        assert!(hs.on_message(&challenge("second"), NOW).is_empty());
        assert_eq!(hs.nonce(), Some("second"));
    }

    #[test]
    fn timeout_names_phase() {
        let mut hs = open(HandshakeConfig::default());
        let actions = hs.on_timeout();
        assert_eq!(
            actions,
            vec![HandshakeAction::Finish(Outcome::Failed(HandshakeError::HandshakeTimeout {
                phase: "awaiting challenge"
            }))]
        );
        // terminal: later inputs change nothing
        assert!(hs.on_close(Some(1000), "").is_empty());
        assert!(hs.on_message(&challenge("late"), NOW).is_empty());
    }

    #[test]
    fn close_before_response_is_transport_failure() {
        let mut hs = open(HandshakeConfig::default());
        sent(&hs.on_message(&challenge("n"), NOW));
        hs.on_close(Some(1008), "policy");
        let err = hs.outcome().unwrap().error().unwrap().clone();
        assert_eq!(
            err,
            HandshakeError::Transport("channel closed during awaiting response: 1008 - policy".into())
        );
    }

    #[test]
    fn key_generation_failure_aborts_without_sending() {
        fn broken() -> Result<Identity, HandshakeError> {
            Err(HandshakeError::KeyGeneration("no provider".into()))
        }
        let mut hs = open(signed_config()).with_identity_provider(broken);
        let actions = hs.on_message(&challenge("n"), NOW);
        assert!(actions.iter().all(|a| !matches!(a, HandshakeAction::Send(_))));
        assert!(matches!(
            hs.outcome().unwrap().error(),
            Some(HandshakeError::KeyGeneration(_))
        ));
    }

    #[test]
    fn delimiter_in_token_is_signing_failure() {
        let cfg = HandshakeConfig::default().with_token(Some("a|b".into())).signed(true);
        let mut hs = open(cfg).with_identity(Identity::from_seed([1u8; 32]));
        let actions = hs.on_message(&challenge("n"), NOW);
        assert!(matches!(
            &actions[..],
            [HandshakeAction::Finish(Outcome::Failed(HandshakeError::Signing(_)))]
        ));
    }
}
