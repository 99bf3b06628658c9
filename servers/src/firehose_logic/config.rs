use anyhow::{Context, Result};
use clap::Parser;
use lib_firehose::configs::{AppConfig, NotificationPlugin};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "server_firehose.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Filtered stream consumer with notifier fan-out", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FIREHOSE_PORT", help = "Port for the control API.")]
    pub port: Option<u16>,

    #[clap(long, env = "FIREHOSE_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FIREHOSE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FIREHOSE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FIREHOSE_NOTIFICATION_PLUGIN", help = "Notifier to use: http or resque.")]
    pub notification_plugin: Option<NotificationPlugin>,

    #[clap(
        long,
        env = "FIREHOSE_RECONNECT_AFTER_MAX_SECS",
        help = "Seconds to wait after the transport gives up before forcing a reconnect."
    )]
    pub reconnect_after_max_secs: Option<u64>,
}

/// Shape of the config file: the server section plus the pipeline sections.
#[derive(Deserialize, Default)]
struct FileSections {
    #[serde(default)]
    server: Option<Config>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            notification_plugin: other.notification_plugin.or(self.notification_plugin),
            reconnect_after_max_secs: other.reconnect_after_max_secs.or(self.reconnect_after_max_secs),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(7337),
            config_path: Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            notification_plugin: None,
            reconnect_after_max_secs: Some(300),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(7337)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn reconnect_after_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_after_max_secs.unwrap_or(300))
    }
}

/// Defaults, then the file's `server` section, then env/CLI.
pub fn load_config() -> Config {
    resolve(Config::parse())
}

fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut current_config = Config::defaults();

    // Logging is not set up yet at this point, so problems go to stderr.
    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match json5::from_str::<FileSections>(&config_str) {
                Ok(FileSections { server: Some(file_config) }) => {
                    current_config = current_config.merge(file_config);
                }
                Ok(_) => {}
                Err(e) => eprintln!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => eprintln!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    current_config.merge(cli)
}

/// Loads the pipeline sections from the same file and applies overrides.
pub fn load_app_config(config: &Config) -> Result<AppConfig> {
    let path = config.config_path();
    let mut app_config = read_app_config(&path)?;
    if let Some(plugin) = config.notification_plugin {
        app_config.client_app.notification_plugin = plugin;
    }
    app_config.validate().context("Invalid configuration")?;
    Ok(app_config)
}

fn read_app_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}
