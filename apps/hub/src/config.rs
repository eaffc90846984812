use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateSettings;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config file")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config file")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no usable config directory")]
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub network: Network,
    pub scheduler: Scheduler,
    pub payouts: Payouts,
    pub database: DatabaseConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Network {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Scheduler {
    /// Seconds between dispatch rounds.
    pub tick_seconds: u64,
    /// How long to wait for a probe reply before abandoning it.
    pub probe_timeout_seconds: u64,
    /// Sessions silent for longer than this get evicted.
    pub heartbeat_timeout_seconds: u64,
    /// A reply slower than this marks the site degraded.
    pub degraded_threshold_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Payouts {
    pub lamports_per_validation: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptide/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uptide/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network { bind: "0.0.0.0".into(), port: 8081 },
            scheduler: Scheduler {
                tick_seconds: 60,
                probe_timeout_seconds: 10,
                heartbeat_timeout_seconds: 300,
                degraded_threshold_ms: 1000,
            },
            payouts: Payouts { lamports_per_validation: 100 },
            database: DatabaseConfig { path: "uptide-hub.db".into() },
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Network")?;
        write_1(f, "Bind Address", &self.network.bind)?;
        write_1(f, "Port", &self.network.port)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick Interval (s)", &self.scheduler.tick_seconds)?;
        write_1(f, "Probe Timeout (s)", &self.scheduler.probe_timeout_seconds)?;
        write_1(f, "Heartbeat Timeout (s)", &self.scheduler.heartbeat_timeout_seconds)?;
        write_1(f, "Degraded Threshold (ms)", &self.scheduler.degraded_threshold_ms)?;
        write_title_1(f, "Payouts")?;
        write_1(f, "Lamports per Validation", &self.payouts.lamports_per_validation)?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptide/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    pub fn aggregate_settings(&self) -> AggregateSettings {
        AggregateSettings {
            degraded_threshold_ms: self.scheduler.degraded_threshold_ms,
            window: Duration::from_secs(24 * 3600),
            lamports_per_validation: self.payouts.lamports_per_validation,
        }
    }
}
