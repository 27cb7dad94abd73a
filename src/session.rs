// src/session.rs
//! Async driver: feeds channel signals into [`Handshake`] and performs the
//! actions it returns. The session waits while the channel opens, while it
//! waits for the challenge, and while it waits for the response; each wait
//! has its own deadline. Every wait, including the optional send delay and
//! post-answer linger, races the abort future.

use std::future::Future;

use chrono::Utc;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info};

use crate::channel::{Channel, ChannelEvent, Connector};
use crate::error::HandshakeError;
use crate::handshake::{Handshake, HandshakeAction, HandshakeState, Outcome};
use crate::settings::{HandshakeConfig, SessionSettings};

pub struct Session {
    handshake: Handshake,
    settings: SessionSettings,
}

impl Session {
    pub fn new(config: HandshakeConfig, settings: SessionSettings) -> Self {
        Self { handshake: Handshake::new(config), settings }
    }

    /// Wraps a prepared state machine, e.g. one carrying a fixed identity.
    pub fn with_handshake(handshake: Handshake, settings: SessionSettings) -> Self {
        Self { handshake, settings }
    }

    /// Runs one connect attempt to completion. Never retries.
    pub async fn run<C, A>(mut self, connector: &C, abort: A) -> Outcome
    where
        C: Connector,
        A: Future<Output = ()>,
    {
        tokio::pin!(abort);
        let hs = &mut self.handshake;
        hs.start();

        let deadline = Instant::now() + self.settings.open_timeout;
        let opened = tokio::select! {
            _ = &mut abort => Err(hs.on_abort()),
            r = timeout_at(deadline, connector.open()) => match r {
                Err(_) => Err(hs.on_timeout()),
                Ok(Err(e)) => Err(hs.on_error(&e.to_string())),
                Ok(Ok(channel)) => Ok(channel),
            },
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(actions) => return finished(actions, hs),
        };
        hs.on_open();

        let mut deadline = Instant::now() + self.settings.challenge_timeout;
        let outcome = loop {
            let actions = tokio::select! {
                _ = &mut abort => hs.on_abort(),
                r = timeout_at(deadline, channel.recv()) => match r {
                    Err(_) => hs.on_timeout(),
                    Ok(ChannelEvent::Message(text)) => hs.on_message(&text, Utc::now().timestamp_millis()),
                    Ok(ChannelEvent::Error(detail)) => hs.on_error(&detail),
                    Ok(ChannelEvent::Closed { code, reason }) => hs.on_close(code, &reason),
                },
            };

            let mut done = None;
            for action in actions {
                match action {
                    HandshakeAction::Send(text) => {
                        if !self.settings.send_delay.is_zero() {
                            let aborted = tokio::select! {
                                _ = &mut abort => true,
                                _ = sleep(self.settings.send_delay) => false,
                            };
                            if aborted {
                                done = finish_of(hs.on_abort());
                                break;
                            }
                        }
                        if let Err(e) = channel.send(text).await {
                            done = finish_of(hs.on_error(&e.to_string()));
                            break;
                        }
                        deadline = Instant::now() + self.settings.response_timeout;
                    }
                    HandshakeAction::Finish(outcome) => done = Some(outcome),
                }
            }
            if let Some(outcome) = done {
                break outcome;
            }
        };

        let answered = matches!(
            outcome,
            Outcome::Ok(_) | Outcome::Failed(HandshakeError::AuthRejected(_))
        );
        if answered && !self.settings.linger.is_zero() {
            tokio::select! {
                _ = &mut abort => debug!("linger cut short by abort"),
                _ = sleep(self.settings.linger) => {}
            }
        }
        debug!("releasing channel");
        channel.close().await;
        info!(ok = outcome.is_ok(), detail = %outcome.detail(), "session finished");
        outcome
    }
}

fn finish_of(actions: Vec<HandshakeAction>) -> Option<Outcome> {
    actions.into_iter().find_map(|a| match a {
        HandshakeAction::Finish(o) => Some(o),
        HandshakeAction::Send(_) => None,
    })
}

fn finished(actions: Vec<HandshakeAction>, hs: &Handshake) -> Outcome {
    match finish_of(actions) {
        Some(outcome) => outcome,
        None => match hs.state() {
            HandshakeState::Completed(o) => o.clone(),
            s => Outcome::Failed(HandshakeError::Transport(format!(
                "session stopped while {}",
                s.phase()
            ))),
        },
    }
}
