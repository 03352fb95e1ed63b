//! HTTP server for the EVA decision validator.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use eva_runtime::{runner_from_config, RuntimeConfig};
use tracing::info;

use crate::routes::{router, AppState};

#[derive(Debug, Parser)]
#[command(name = "eva-server", about = "HTTP API for the EVA decision validator")]
struct Args {
    /// Runtime configuration file (YAML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8321")]
    bind: SocketAddr,

    /// Bearer token required for audit reads; open when omitted
    #[arg(long, env = "EVA_AUDIT_TOKEN")]
    audit_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eva_server=info,eva_runtime=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let runner = Arc::new(runner_from_config(config).context("initializing runner")?);
    let app = router(AppState {
        runner,
        audit_token: args.audit_token,
    });

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, "eva-server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
