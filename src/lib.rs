// src/lib.rs
pub mod channel;
pub mod codec;
pub mod correlation;
pub mod error;
pub mod gateway_config;
pub mod handshake;
pub mod identity;
pub mod session;
pub mod settings;
pub mod signing;
pub mod types;

pub use error::HandshakeError;
pub use handshake::{Handshake, Outcome};
pub use session::Session;
pub use settings::{HandshakeConfig, ProbeSettings, SessionSettings};
