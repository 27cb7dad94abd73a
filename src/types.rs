// src/types.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONNECT_METHOD: &str = "connect";
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Payload of `connect.challenge`. Gateways may omit the nonce; a missing,
/// non-string or empty nonce reads as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBlock {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBlock {
    pub id: String,
    pub public_key: String,
    pub signature: String,
    pub signed_at: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceBlock>,
    pub user_agent: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub method: String,
    pub params: ConnectParams,
}

impl Request {
    pub fn connect(id: String, params: ConnectParams) -> Self {
        Self {
            kind: "req".into(),
            id,
            method: CONNECT_METHOD.into(),
            params,
        }
    }

    /// Copy safe to log: the auth token is replaced by its masked form.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if let Some(auth) = out.params.auth.as_mut() {
            auth.token = crate::codec::mask_token(Some(&auth.token));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Response {
    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "Unknown error".into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn challenge(&self) -> Option<ChallengeEvent> {
        if self.event != CHALLENGE_EVENT {
            return None;
        }
        let nonce = self
            .payload
            .get("nonce")
            .and_then(|v| v.as_str())
            .filter(|n| !n.is_empty())
            .map(str::to_owned);
        Some(ChallengeEvent { nonce })
    }
}

/// Inbound frame, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(Event),
    Response(Response),
    Unrecognized { reason: String },
}

impl Inbound {
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Inbound::Unrecognized { reason: format!("invalid json: {e}") },
        };
        let kind = value.get("type").and_then(|v| v.as_str()).map(str::to_owned);
        match kind.as_deref() {
            Some("event") => match serde_json::from_value(value) {
                Ok(ev) => Inbound::Event(ev),
                Err(e) => Inbound::Unrecognized { reason: format!("malformed event: {e}") },
            },
            Some("res") => match serde_json::from_value(value) {
                Ok(res) => Inbound::Response(res),
                Err(e) => Inbound::Unrecognized { reason: format!("malformed response: {e}") },
            },
            Some(other) => Inbound::Unrecognized { reason: format!("unknown type {other:?}") },
            None => Inbound::Unrecognized { reason: "missing type".into() },
        }
    }
}
