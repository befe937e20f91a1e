// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Module-lifecycle host.
//!
//! Modules register explicitly at startup (no import-time side effects)
//! and are driven through a fixed order:
//! `load_config → init → load_related_modules → pre_ticker`, then each
//! module's ticker runs in its own task until it stops or asks for a
//! process shutdown; `pre_shut → shut` unwinds everything.

use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// What a module's ticker wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerAction {
    /// Sleep the returned duration and tick again.
    Continue,
    /// Stop this module's ticker.
    Stop,
    /// Ask the whole process to shut down.
    Shutdown,
}

/// Lifecycle hooks every hosted module implements; all default to no-ops
/// so modules opt into only what they need.
pub trait HostModule: Send + Sync {
    fn name(&self) -> &str;

    fn load_config(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn load_related_modules(&self) -> Result<()> {
        Ok(())
    }

    fn pre_ticker(&self) -> Result<()> {
        Ok(())
    }

    fn ticker(&self) -> (Duration, TickerAction) {
        (Duration::ZERO, TickerAction::Stop)
    }

    fn pre_shut(&self) -> Result<()> {
        Ok(())
    }

    fn shut(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-scoped module registry, built explicitly at startup and
/// passed by reference.
#[derive(Default)]
pub struct ModuleHost {
    modules: Vec<Arc<dyn HostModule>>,
    by_name: HashMap<String, usize>,
    shutdown: CancellationToken,
}

impl ModuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module; duplicate names are a wiring error.
    pub fn register(&mut self, module: Arc<dyn HostModule>) -> Result<()> {
        let name = module.name().to_string();
        if self.by_name.contains_key(&name) {
            bail!("repeated module name: {name}");
        }
        self.by_name.insert(name, self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn HostModule>> {
        self.by_name.get(name).map(|&i| &self.modules[i])
    }

    /// Cancelled when any module's ticker asks for a shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Feeds each module its config file from `conf`, keyed by module
    /// name; modules without an entry are skipped.
    pub fn load_configs(&self, conf: &HashMap<String, std::path::PathBuf>) -> Result<()> {
        for module in &self.modules {
            if let Some(path) = conf.get(module.name()) {
                module
                    .load_config(path)
                    .inspect_err(|err| {
                        error!(module = module.name(), "load config: {:#}", err);
                    })?;
            }
        }
        Ok(())
    }

    /// Runs the startup chain in registration order; the first error
    /// aborts the start.
    pub fn start(&self) -> Result<()> {
        for module in &self.modules {
            debug!(module = module.name(), "register module");
        }
        for module in &self.modules {
            module.init()?;
        }
        for module in &self.modules {
            module.load_related_modules()?;
        }
        for module in &self.modules {
            module.pre_ticker().inspect_err(|err| {
                error!(module = module.name(), "pre-ticker: {:#}", err);
            })?;
        }
        Ok(())
    }

    /// Spawns every module's ticker loop.
    pub fn spawn_tickers(&self) {
        for module in &self.modules {
            let module = Arc::clone(module);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let (delay, action) = module.ticker();
                    match action {
                        TickerAction::Continue => {
                            tokio::select! {
                                _ = shutdown.cancelled() => return,
                                _ = tokio::time::sleep(delay) => {},
                            }
                        },
                        TickerAction::Stop => {
                            debug!(module = module.name(), "module stops ticker");
                            return;
                        },
                        TickerAction::Shutdown => {
                            debug!(module = module.name(), "module shuts down server");
                            shutdown.cancel();
                            return;
                        },
                    }
                }
            });
        }
    }

    /// Unwinds all modules; errors are reported but do not stop the
    /// remaining hooks.
    pub fn stop(&self) {
        for module in &self.modules {
            if let Err(err) = module.pre_shut() {
                error!(module = module.name(), "pre-shut: {:#}", err);
            }
        }
        for module in &self.modules {
            if let Err(err) = module.shut() {
                error!(module = module.name(), "shut: {:#}", err);
            }
        }
    }
}
