// src/main.rs
use std::time::Duration;

use clap::Parser;
use gateway_probe::channel::WsConnector;
use gateway_probe::codec::mask_token;
use gateway_probe::settings::{DEFAULT_GATEWAY_URL, DEFAULT_ORIGIN, TOKEN_ENV};
use gateway_probe::{HandshakeConfig, Outcome, ProbeSettings, Session, SessionSettings};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gateway-probe", about = "Scripted peer for the gateway connect handshake")]
struct Cli {
    /// Sign the connect request with an ephemeral Ed25519 device key
    #[arg(long)]
    with_device: bool,

    #[arg(long, default_value = DEFAULT_GATEWAY_URL)]
    url: String,

    #[arg(long, default_value = DEFAULT_ORIGIN)]
    origin: String,

    /// Deadline for each handshake phase
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let token = std::env::var(TOKEN_ENV).ok();
    let settings = ProbeSettings {
        url: cli.url,
        origin: cli.origin,
        handshake: HandshakeConfig::default().with_token(token).signed(cli.with_device),
        session: SessionSettings::default().with_timeout(Duration::from_millis(cli.timeout_ms)),
    };

    info!(
        url = %settings.url,
        token = %mask_token(settings.handshake.token.as_deref()),
        mode = if cli.with_device { "B (with device signature)" } else { "A (token only)" },
        "gateway handshake check"
    );
    if settings.handshake.token.is_none() && cli.with_device {
        warn!("{TOKEN_ENV} not set, device signature will use an empty token");
    }

    let connector = WsConnector::new(settings.url.clone(), Some(settings.origin.clone()));
    let session = Session::new(settings.handshake, settings.session);
    let outcome = session
        .run(&connector, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    report(&outcome)
}

/// Prints the outcome. Fatal failures become the process error (logged once,
/// by anyhow); everything else is a completed run.
fn report(outcome: &Outcome) -> anyhow::Result<()> {
    match outcome {
        Outcome::Ok(res) => {
            info!("SUCCESS! Handshake completed.");
            if let Ok(body) = serde_json::to_string_pretty(res) {
                info!("connect response:\n{body}");
            }
        }
        Outcome::Failed(e) if e.is_fatal() => {
            return Err(anyhow::Error::new(e.clone()).context("handshake aborted"));
        }
        Outcome::Failed(e) => info!("FAILED: {e}"),
    }
    Ok(())
}
