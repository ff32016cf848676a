use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use hubmirror_core::{CancelPolicy, MirrorConfig};

/// Log output format.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hubmirror",
    version,
    about = "Caching mirror for a remote model repository"
)]
pub struct Cli {
    /// Root of the on-disk cache
    #[arg(long, env = "CACHE_DIR", default_value = "/cache")]
    pub cache_dir: PathBuf,

    /// Bearer token sent to the upstream
    #[arg(long, env = "HUGGINGFACE_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Upstream base URL
    #[arg(long, env = "HUBMIRROR_UPSTREAM_URL", default_value = "https://huggingface.co")]
    pub upstream: String,

    /// Listen address
    #[arg(long, env = "HUBMIRROR_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// Upstream read timeout in seconds
    #[arg(long, env = "HUBMIRROR_TIMEOUT", default_value_t = 300)]
    pub timeout_secs: u64,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "HUBMIRROR_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Abort upstream fetches once every waiting client has disconnected
    #[arg(
        long,
        env = "HUBMIRROR_CANCEL_ORPHANED",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub cancel_orphaned: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t, env = "HUBMIRROR_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn mirror_config(&self) -> MirrorConfig {
        let policy = if self.cancel_orphaned {
            CancelPolicy::Abort
        } else {
            CancelPolicy::Complete
        };

        let mut config = MirrorConfig::default()
            .with_cache_dir(&self.cache_dir)
            .with_upstream_url(&self.upstream)
            .with_cancel_policy(policy);
        config.timeout_secs = self.timeout_secs;
        config.connect_timeout_secs = self.connect_timeout_secs;

        // An empty token is the same as no token.
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => config.with_token(token),
            _ => config,
        }
    }
}
