// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Home Assistant bridge daemon for goofydeck.
#[derive(Debug, Clone, Parser)]
#[command(name = "goofydeck-ha", version, about)]
pub struct Config {
    /// Filesystem socket path for local clients.
    #[arg(long, env = "GOOFYDECK_HA_SOCKET", default_value = "/tmp/goofydeck_ha.sock")]
    pub socket: PathBuf,

    /// Delay between upstream reconnect attempts, in milliseconds.
    #[arg(long, env = "GOOFYDECK_HA_RECONNECT_MS", default_value_t = 1000)]
    pub reconnect_ms: u64,
}

impl Config {
    /// Reconnect delay with a 100 ms floor.
    pub fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_ms.max(100))
    }
}
