// src/bin/generate_config.rs
use anyhow::Context;
use gateway_probe::gateway_config::{GatewayConfig, GatewayEnv};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let env = GatewayEnv::from_env();
    let config = GatewayConfig::from_env(&env).context("failed to generate config")?;
    let text = config
        .write_to(env.config_path())
        .context("failed to generate config")?;
    println!("{text}");
    Ok(())
}
