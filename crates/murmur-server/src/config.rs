use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use murmur_gateway::session::FailurePolicy;

/// Server settings, read from `MURMUR_*` environment variables (a `.env` file
/// is loaded first if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Undelivered notifications buffered per stream before it is dropped.
    pub channel_capacity: usize,
    pub keep_alive: Duration,
    pub failure_policy: FailurePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into());
        let host = lookup("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "MURMUR_PORT", 8000u16)?;
        let channel_capacity = parse_or(&lookup, "MURMUR_CHANNEL_CAPACITY", 1024usize)?;
        let keep_alive_secs = parse_or(&lookup, "MURMUR_KEEPALIVE_SECS", 15u64)?;

        if channel_capacity == 0 {
            bail!("MURMUR_CHANNEL_CAPACITY must be at least 1");
        }
        if keep_alive_secs == 0 {
            bail!("MURMUR_KEEPALIVE_SECS must be at least 1");
        }

        let failure_policy = match lookup("MURMUR_MAX_CONSECUTIVE_SKIPS") {
            None => FailurePolicy::Tolerate,
            Some(raw) => {
                let limit: u32 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("MURMUR_MAX_CONSECUTIVE_SKIPS: invalid value '{}'", raw))?;
                if limit == 0 {
                    bail!("MURMUR_MAX_CONSECUTIVE_SKIPS must be at least 1");
                }
                FailurePolicy::CloseAfter(limit)
            }
        };

        Ok(Self {
            db_path: db_path.into(),
            host,
            port,
            channel_capacity,
            keep_alive: Duration::from_secs(keep_alive_secs),
            failure_policy,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{}: invalid value '{}'", key, raw)),
    }
}
