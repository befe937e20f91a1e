// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Process configuration for a gate node: its listeners, the backends it
/// tunnels to, and runtime pool/timeout knobs.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub gate: GateConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GateConfig {
    #[serde(rename = "AgentID")]
    /// This node's server id, announced on freshly dialed backend links.
    pub agent_id: u32,

    #[serde(rename = "Listeners")]
    pub listeners: Vec<ListenerConfig>,

    #[serde(default, rename = "Backends")]
    /// Server id → `ip:port` of every reachable backend.
    pub backends: HashMap<u32, String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ListenerConfig {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(default = "default_network", rename = "Network")]
    /// `tcp` or `unix`.
    pub network: String,

    #[serde(rename = "Address")]
    /// `ip:port` for tcp, socket path for unix.
    pub address: String,

    #[serde(default, rename = "MaxConn")]
    /// Simultaneous-connection cap; 0 disables the limit.
    pub max_conn: usize,

    #[serde(default, rename = "ReadSynced")]
    /// Stop connection reads as soon as shutdown begins.
    pub read_synced: bool,

    #[serde(default, rename = "Chmod")]
    /// Octal file mode for unix sockets.
    pub chmod: Option<u32>,
}

fn default_network() -> String {
    "tcp".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "ExitTimeout", with = "serde_secs")]
    /// How long shutdown waits for in-flight handlers.
    pub exit_timeout: Duration,

    #[serde(default, rename = "TokenResetHour")]
    /// Local-clock hour when issued tokens are shortened to a common
    /// expiry boundary.
    pub token_reset_hour: Option<u32>,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.gate.listeners.is_empty(),
            "at least one listener is required"
        );
        let mut seen = std::collections::HashSet::new();
        for l in &self.gate.listeners {
            ensure!(!l.name.is_empty(), "listener name must not be empty");
            ensure!(
                seen.insert(l.name.as_str()),
                "repeated listener name: {}",
                l.name
            );
            ensure!(
                matches!(l.network.as_str(), "tcp" | "unix"),
                "listener {}: unsupported network {}",
                l.name,
                l.network
            );
            ensure!(
                !l.address.is_empty(),
                "listener {}: address must not be empty",
                l.name
            );
        }
        for (id, host) in &self.gate.backends {
            ensure!(*id > 0, "backend id 0 is reserved");
            ensure!(!host.is_empty(), "backend {id}: host must not be empty");
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
