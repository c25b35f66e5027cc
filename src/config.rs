//! Process configuration
//!
//! Loaded once at start-up from a toml file,
//! environment variables prefixed with `DRIVE_SYNC_` take precedence.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};
use serde::Deserialize;

/// Upload chunks must be multiples of this size
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

/// Longest accepted interval, one year
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Synchronization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Source directory used when no directory was persisted yet
    #[serde(default)]
    pub source_directory: Option<PathBuf>,
    /// Case-insensitive file name suffix of files to upload
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    /// Id of the remote folder uploads go to
    pub remote_container_id: String,
    /// Seconds between the start of two cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// JSON record remembering the selected source directory
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// OAuth client secrets
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    /// Cached OAuth token
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    /// Bytes per upload request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Config {
    /// Try loading the configuration from a toml file and the environment
    pub fn try_load(toml: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(toml))
            .merge(Env::prefixed("DRIVE_SYNC_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the cycle cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.file_suffix.is_empty() {
            bail!("file_suffix must not be empty");
        }
        if self.remote_container_id.trim().is_empty() {
            bail!("remote_container_id must not be empty");
        }
        if !(1..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            bail!(
                "interval_secs must be between 1 and {MAX_INTERVAL_SECS} but got {}",
                self.interval_secs
            );
        }
        if self.chunk_size == 0 || self.chunk_size % CHUNK_GRANULARITY != 0 {
            bail!(
                "chunk_size must be a positive multiple of {CHUNK_GRANULARITY} but got {}",
                self.chunk_size
            );
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_file_suffix() -> String {
    ".dcm".into()
}

fn default_interval_secs() -> u64 {
    60 * 60
}

fn default_state_file() -> PathBuf {
    "config.json".into()
}

fn default_credentials_file() -> PathBuf {
    "credentials.json".into()
}

fn default_token_file() -> PathBuf {
    "token.json".into()
}

fn default_chunk_size() -> usize {
    32 * CHUNK_GRANULARITY
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_apply() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", r#"remote_container_id = "folder-1""#)?;

            let config = Config::try_load("config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.remote_container_id, "folder-1");
            assert_eq!(config.file_suffix, ".dcm");
            assert_eq!(config.interval(), Duration::from_secs(3600));
            assert_eq!(config.state_file, PathBuf::from("config.json"));
            assert_eq!(config.chunk_size, 8 * 1024 * 1024);
            assert!(config.source_directory.is_none());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                remote_container_id = "folder-1"
                interval_secs = 60
                "#,
            )?;
            jail.set_env("DRIVE_SYNC_INTERVAL_SECS", 5);
            jail.set_env("DRIVE_SYNC_SOURCE_DIRECTORY", "/srv/pacs");

            let config = Config::try_load("config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.interval_secs, 5);
            assert_eq!(config.source_directory, Some(PathBuf::from("/srv/pacs")));
            Ok(())
        });
    }

    #[test]
    fn missing_container_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", r#"file_suffix = ".dcm""#)?;
            assert!(Config::try_load("config.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "zero.toml",
                r#"
                remote_container_id = "folder-1"
                interval_secs = 0
                "#,
            )?;
            jail.create_file(
                "huge.toml",
                r#"
                remote_container_id = "folder-1"
                interval_secs = 31536001
                "#,
            )?;
            jail.create_file(
                "chunk.toml",
                r#"
                remote_container_id = "folder-1"
                chunk_size = 1000
                "#,
            )?;
            jail.create_file(
                "suffix.toml",
                r#"
                remote_container_id = "folder-1"
                file_suffix = ""
                "#,
            )?;

            for file in ["zero.toml", "huge.toml", "chunk.toml", "suffix.toml"] {
                assert!(Config::try_load(file).is_err(), "{file} should be rejected");
            }
            Ok(())
        });
    }
}
