// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use goofydeck_ha::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing();

    if let Err(e) = goofydeck_ha::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

/// `RUST_LOG`-driven filtering, defaulting to info.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
