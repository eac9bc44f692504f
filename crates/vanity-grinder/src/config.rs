use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use vanity_core::{GrindPattern, DEFAULT_PATTERN};

use crate::worker::{GrindRequest, DEFAULT_KEYGEN_BIN};

pub const DEFAULT_LOG_PREVIEW_LINES: usize = 20;

#[derive(Parser, Debug, Clone)]
#[command(name = "vanity-grinder")]
#[command(about = "Grind vanity keypairs and record every match", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Suffix pattern in SUFFIX:COUNT form
    #[arg(long, env = "VANITY_PATTERN", default_value = DEFAULT_PATTERN)]
    pub pattern: GrindPattern,
    /// Thread hint for the worker; omitted means the worker default
    #[arg(long, env = "VANITY_THREADS", value_parser = clap::value_parser!(u32).range(1..))]
    pub threads: Option<u32>,
    #[arg(long, env = "VANITY_PAUSE_SECS", default_value_t = 0)]
    pub pause_secs: u64,
    /// Let the worker prompt for a BIP39 passphrase (VANITY_USE_PASSPHRASE)
    #[arg(long, default_value_t = false)]
    pub use_passphrase: bool,
    /// Case-insensitive suffix match (VANITY_IGNORE_CASE)
    #[arg(long, default_value_t = false)]
    pub ignore_case: bool,
    #[arg(long, env = "DATABASE_URL", default_value = "", hide_env_values = true)]
    pub database_url: String,
    #[arg(long, env = "VANITY_KEYGEN_BIN", default_value = DEFAULT_KEYGEN_BIN)]
    pub keygen_bin: String,
    #[arg(long, env = "VANITY_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,
    #[arg(long, env = "VANITY_LOG_PREVIEW_LINES", default_value_t = DEFAULT_LOG_PREVIEW_LINES)]
    pub log_preview_lines: usize,
    /// Stop after this many iterations instead of running until interrupted
    #[arg(long, env = "VANITY_MAX_ITERATIONS")]
    pub max_iterations: Option<u64>,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Grind until interrupted (default)
    Run,
    /// Re-insert the artifacts of a retained workspace
    Recover { workspace: PathBuf },
}

/// Resolved settings, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrindConfig {
    pub pattern: GrindPattern,
    pub threads: Option<u32>,
    pub pause: Duration,
    pub use_passphrase: bool,
    pub ignore_case: bool,
    pub database_url: String,
    pub keygen_bin: String,
    pub workspace_root: PathBuf,
    pub log_preview_lines: usize,
    pub max_iterations: Option<u64>,
    pub debug: bool,
}

impl GrindConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            pattern: args.pattern.clone(),
            threads: args.threads,
            pause: Duration::from_secs(args.pause_secs),
            use_passphrase: args.use_passphrase || env_true("VANITY_USE_PASSPHRASE"),
            ignore_case: args.ignore_case || env_true("VANITY_IGNORE_CASE"),
            database_url: args.database_url.clone(),
            keygen_bin: args.keygen_bin.clone(),
            workspace_root: args
                .workspace_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            log_preview_lines: args.log_preview_lines,
            max_iterations: args.max_iterations,
            debug: args.debug || env_true("VANITY_DEBUG"),
        }
    }

    pub fn grind_request(&self) -> GrindRequest {
        GrindRequest {
            pattern: self.pattern.clone(),
            threads: self.threads,
            ignore_case: self.ignore_case,
            use_passphrase: self.use_passphrase,
        }
    }
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
