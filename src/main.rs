// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use toolshim::config;
use toolshim::engine;
use toolshim::proxy;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "toolshim",
    about = "LLM gateway that turns XML tool calls in model text into structured tool calls"
)]
struct Cli {
    /// Path to the toolshim.yaml config file
    #[arg(long, default_value = "toolshim.yaml", env = "TOOLSHIM_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = 11434, env = "TOOLSHIM_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "TOOLSHIM_HOST")]
    host: IpAddr,
}

/// JSON logs on stderr. `RUST_LOG` wins over the config's `debug` flag.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let source = config::FileSource::new(&cli.config);
    let config = match config::load_config(&source) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            init_tracing(false);
            tracing::error!(path = %cli.config, "failed to load config: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(config.debug);

    tracing::info!(
        version = %config.version,
        backend_url = %config.backend.base_url,
        backend_format = %config.backend.format,
        suppress_preface = config.tools.suppress_preface,
        reinjection = config.tools.reinjection.enabled,
        "config loaded"
    );

    let upstream: Arc<dyn proxy::UpstreamClient> =
        Arc::new(engine::build_engine_client(config));

    let app = proxy::build_router(upstream);

    let addr = SocketAddr::new(cli.host, cli.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "toolshim listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
