//! Configuration management for the eventstream service.
//!
//! This module provides configuration handling through multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/eventstream/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `EVENTSTREAM_`)
//! 5. Command-line arguments
//!
//! Configuration options are loaded in order of precedence, with later
//! sources overriding earlier ones.
//!
//! # Environment Variables
//!
//! Upstream credentials are provided via environment variables only:
//! - `EVENTSTREAM_UPSTREAM_USERNAME` - Upstream login user
//! - `EVENTSTREAM_UPSTREAM_PASSWORD` - Upstream login password

use crate::error::Result;
use crate::ingest::UpstreamCredentials;
use crate::sync::SyncSettings;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Database file path (`:memory:` for a transient store)
    #[clap(long)]
    pub database: Option<String>,

    /// Base URL of the upstream event-management system
    #[clap(long)]
    pub upstream_url: Option<String>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Upstream system access
    pub upstream: UpstreamConfig,
    /// Local store location
    pub storage: StorageConfig,
    /// Sync pacing and freshness
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Upstream system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream REST API
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path
    pub database: String,
}

/// Sync orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Occurrences per concurrent sample-fetch batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between sample fetches during backfills, in milliseconds
    #[serde(default = "default_backfill_delay_ms")]
    pub backfill_delay_ms: u64,
    /// Watermark age in seconds beyond which startup re-syncs
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            backfill_delay_ms: default_backfill_delay_ms(),
            freshness_secs: default_freshness_secs(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/eventstream/config.toml").required(false));

        // Load user config if specified
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        // Add environment variables
        builder = builder.add_source(config::Environment::with_prefix("EVENTSTREAM").separator("__"));

        // Build config
        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;

        // Override with command line args
        if let Some(database) = &args.database {
            config.storage.database = database.clone();
        }
        if let Some(base_url) = &args.upstream_url {
            config.upstream.base_url = base_url.clone();
        }

        Ok(config)
    }

    /// Get upstream credentials from environment
    pub fn get_credentials(&self) -> Option<UpstreamCredentials> {
        let username = env::var("EVENTSTREAM_UPSTREAM_USERNAME").ok()?;
        let password = env::var("EVENTSTREAM_UPSTREAM_PASSWORD").ok()?;
        Some(UpstreamCredentials { username, password })
    }

    /// Upstream request timeout
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    /// Convert sync settings to the orchestrator's representation
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            sample_batch_size: self.sync.batch_size,
            backfill_delay: Duration::from_millis(self.sync.backfill_delay_ms),
            startup_freshness: Duration::from_secs(self.sync.freshness_secs),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    crate::constants::sync::SAMPLE_BATCH_SIZE
}

fn default_backfill_delay_ms() -> u64 {
    crate::constants::sync::BACKFILL_REQUEST_DELAY.as_millis() as u64
}

fn default_freshness_secs() -> u64 {
    crate::constants::sync::STARTUP_FRESHNESS.as_secs()
}
