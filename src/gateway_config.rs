// src/gateway_config.rs
//! Gateway configuration document generated from deployment environment
//! variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/data/moltbot.json";
const DEFAULT_PORT: u16 = 18789;

/// Raw inputs. Empty variables count as unset.
#[derive(Debug, Clone, Default)]
pub struct GatewayEnv {
    pub port: Option<String>,
    pub gateway_auth_token: Option<String>,
    pub whatsapp_allowlist: Option<String>,
    pub whatsapp_message_prefix: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub ai_model: Option<String>,
    pub ai_provider: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub config_file: Option<String>,
}

impl GatewayEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        Self {
            port: get("PORT"),
            gateway_auth_token: get("GATEWAY_AUTH_TOKEN"),
            whatsapp_allowlist: get("WHATSAPP_ALLOWLIST"),
            whatsapp_message_prefix: get("WHATSAPP_MESSAGE_PREFIX"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            ai_model: get("AI_MODEL"),
            ai_provider: get("AI_PROVIDER"),
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            config_file: get("CONFIG_FILE"),
        }
    }

    pub fn config_path(&self) -> &str {
        self.config_file.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub gateway: GatewaySection,
    pub channels: Channels,
    pub agents: Agents,
    pub auth: Auth,
    pub messages: Messages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySection {
    pub port: u16,
    pub mode: String,
    pub bind: String,
    pub auth: GatewayAuth,
    pub trusted_proxies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAuth {
    pub mode: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channels {
    pub whatsapp: WhatsApp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram: Option<Telegram>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsApp {
    pub send_read_receipts: bool,
    pub dm_policy: String,
    pub message_prefix: String,
    pub allow_from: Vec<String>,
    pub group_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telegram {
    pub dm_policy: String,
    pub bot_token: String,
    pub group_policy: String,
    pub stream_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agents {
    pub defaults: AgentDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    pub model: Model,
    pub max_concurrent: u32,
    pub subagents: Subagents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub primary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subagents {
    pub max_concurrent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub profiles: Profiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profiles {
    pub default: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub provider: String,
    pub openai: OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAi {
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Messages {
    pub ack_reaction_scope: String,
}

impl GatewayConfig {
    pub fn from_env(env: &GatewayEnv) -> Result<Self, ConfigError> {
        let port = match env.port.as_deref() {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "PORT",
                value: raw.to_string(),
            })?,
        };

        let telegram = env.telegram_bot_token.as_ref().map(|token| Telegram {
            dm_policy: "pairing".into(),
            bot_token: token.clone(),
            group_policy: "allowlist".into(),
            stream_mode: "partial".into(),
        });

        Ok(Self {
            gateway: GatewaySection {
                port,
                mode: "local".into(),
                bind: "0.0.0.0".into(),
                auth: GatewayAuth {
                    mode: "token".into(),
                    token: value_or(&env.gateway_auth_token, "changeme"),
                },
                // carrier-grade NAT range used by the hosting proxy, plus private 10/8
                trusted_proxies: vec!["100.64.0.0/10".into(), "10.0.0.0/8".into()],
            },
            channels: Channels {
                whatsapp: WhatsApp {
                    send_read_receipts: true,
                    dm_policy: "pairing".into(),
                    message_prefix: value_or(&env.whatsapp_message_prefix, "[Bot]"),
                    allow_from: parse_allow_list(env.whatsapp_allowlist.as_deref()),
                    group_policy: "disabled".into(),
                },
                telegram,
            },
            agents: Agents {
                defaults: AgentDefaults {
                    model: Model { primary: value_or(&env.ai_model, "openai/gpt-4o") },
                    max_concurrent: 4,
                    subagents: Subagents { max_concurrent: 8 },
                },
            },
            auth: Auth {
                profiles: Profiles {
                    default: Profile {
                        provider: value_or(&env.ai_provider, "openai"),
                        openai: OpenAi {
                            api_key: env
                                .openai_api_key
                                .clone()
                                .or_else(|| env.anthropic_api_key.clone())
                                .unwrap_or_default(),
                        },
                    },
                },
            },
            messages: Messages { ack_reaction_scope: "group-mentions".into() },
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<String, ConfigError> {
        let path = path.as_ref();
        let text = self.to_json_pretty()?;
        std::fs::write(path, &text).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "config generated");
        Ok(text)
    }
}

fn value_or(value: &Option<String>, default: &str) -> String {
    value.clone().unwrap_or_else(|| default.to_string())
}

/// `["*"]` when unset, the parsed list for a JSON array of strings, and the
/// raw value as a single entry otherwise.
pub fn parse_allow_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.filter(|v| !v.is_empty()) else {
        return vec!["*".into()];
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => list,
        Err(_) => {
            warn!(value = %raw, "failed to parse allow list, treating as single entry");
            vec![raw.to_string()]
        }
    }
}
