use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use mediatranslation_client::{CallOptions, Retry};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("expected KEY=VALUE, got `{0}`")]
    MissingSeparator(String),

    #[error("metadata key must not be empty")]
    EmptyKey,

    #[error("invalid number of seconds: `{0}`")]
    InvalidSeconds(String),
}

/// Translate speech from the microphone or a WAV file.
#[derive(Debug, Parser)]
#[command(name = "mediatranslate", version)]
pub struct Args {
    /// Profile from the config file.
    #[arg(short, long, default_value = "default")]
    pub profile: String,

    /// Config file; defaults to ~/.config/mediatranslation.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Replay a PCM WAV file instead of recording.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Overrides the profile's API endpoint.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Call timeout in seconds.
    #[arg(long, value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Retry the call while the service is unavailable.
    #[arg(long)]
    pub retry: bool,

    /// Extra request metadata, repeatable.
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_metadata)]
    pub metadata: Vec<(String, String)>,
}

impl Args {
    #[must_use]
    pub fn call_options(&self) -> CallOptions {
        let mut options = CallOptions::default();
        if let Some(timeout) = self.timeout {
            options = options.with_timeout(timeout);
        }
        if self.retry {
            options = options.with_retry(Retry::default());
        }
        for (key, value) in &self.metadata {
            options = options.with_metadata(key.clone(), value.clone());
        }
        options
    }
}

fn parse_metadata(s: &str) -> Result<(String, String), ArgError> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| ArgError::MissingSeparator(s.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ArgError::EmptyKey);
    }
    Ok((key.to_ascii_lowercase(), value.to_string()))
}

fn parse_seconds(s: &str) -> Result<Duration, ArgError> {
    s.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ArgError::InvalidSeconds(s.to_string()))
}
