use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::{
    exporters::ExportFormat,
    runtime::{
        cli::Cli,
        conf::{conf_serde::level, flow::FlowConf},
    },
};

pub mod conf_serde;
pub mod flow;

/// Where released flow records go.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExporterConf {
    /// `json`, `json-compact`, `pretty`, `debug`, or `none` to disable export.
    /// - Default: `json-compact`
    #[serde(default)]
    pub format: ExportFormat,
}

/// Application configuration.
///
/// Sources are layered with increasing priority:
/// Defaults < Configuration File < `EDDY_` Environment Variables < CLI Arguments.
/// Nested keys are addressed in the environment with a double underscore,
/// e.g. `EDDY_FLOW__MAX_FLOWS=1024`.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Path of the file the configuration was read from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(with = "level")]
    pub log_level: Level,

    /// ERF capture file to replay.
    #[serde(default)]
    pub input: Option<PathBuf>,

    /// Number of packet worker threads.
    /// - Default: 2
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,

    /// Capacity of the channel between the capture reader and the workers.
    /// The reader blocks when it is full.
    /// - Default: 1024
    #[serde(default = "defaults::packet_channel_capacity")]
    pub packet_channel_capacity: usize,

    #[serde(default)]
    pub flow: FlowConf,

    #[serde(default)]
    pub exporter: ExporterConf,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            config_path: None,
            log_level: Level::INFO,
            input: None,
            worker_count: defaults::worker_count(),
            packet_channel_capacity: defaults::packet_channel_capacity(),
            flow: FlowConf::default(),
            exporter: ExporterConf::default(),
        }
    }
}

mod defaults {
    pub fn worker_count() -> usize {
        2
    }

    pub fn packet_channel_capacity() -> usize {
        1024
    }
}

impl Conf {
    /// Builds the configuration from defaults, the optional config file named
    /// by `cli`, the `EDDY_` environment and finally `cli` itself.
    ///
    /// # Errors
    /// * `ConfError::NoConfigFile` - the config file does not exist.
    /// * `ConfError::InvalidConfigPath` - the config path is not a regular file.
    /// * `ConfError::InvalidExtension` - the config file is not YAML.
    /// * `ConfError::Extraction` - a layer holds a value of the wrong shape.
    /// * `ConfError::Invalid` - the merged values are out of range.
    pub fn new(cli: &Cli) -> Result<Self, ConfError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path = match &cli.config {
            Some(path) => {
                validate_config_path(path)?;
                figment = figment.merge(Yaml::file(path));
                Some(path.clone())
            }
            None => None,
        };

        figment = figment
            .merge(Env::prefixed("EDDY_").split("__"))
            .merge(Serialized::defaults(cli));

        let mut conf: Conf = figment.extract()?;
        conf.config_path = config_path;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> Result<(), ConfError> {
        if self.worker_count == 0 {
            return Err(ConfError::Invalid {
                field: "worker_count",
                reason: "must be at least 1",
            });
        }
        if self.packet_channel_capacity == 0 {
            return Err(ConfError::Invalid {
                field: "packet_channel_capacity",
                reason: "must be at least 1",
            });
        }
        if self.flow.max_flows == 0 || self.flow.max_flows >= u32::MAX as usize {
            return Err(ConfError::Invalid {
                field: "flow.max_flows",
                reason: "must be between 1 and 4294967294",
            });
        }
        if self.flow.manager_interval.is_zero() {
            return Err(ConfError::Invalid {
                field: "flow.manager_interval",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Checks that `path` is an existing regular file with a YAML extension.
fn validate_config_path(path: &Path) -> Result<(), ConfError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        }
        return Err(ConfError::NoConfigFile(path.to_path_buf()));
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfError::InvalidExtension(ext.to_string())),
        None => Err(ConfError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("config file {} does not exist", .0.display())]
    NoConfigFile(PathBuf),

    #[error("path '{0}' is not a valid file")]
    InvalidConfigPath(String),

    #[error("invalid file extension '.{0}', expected 'yaml' or 'yml'")]
    InvalidExtension(String),

    #[error("configuration error: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl From<figment::Error> for ConfError {
    fn from(e: figment::Error) -> Self {
        ConfError::Extraction(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use clap::Parser;
    use figment::Jail;
    use tracing::Level;

    use super::{Conf, ConfError};
    use crate::{exporters::ExportFormat, runtime::cli::Cli};

    #[test]
    fn default_impl_values() {
        let cfg = Conf::default();
        assert_eq!(cfg.config_path, None);
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.input, None);
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.packet_channel_capacity, 1024);
        assert_eq!(cfg.flow.max_flows, 65536);
        assert_eq!(cfg.flow.manager_interval, Duration::from_secs(1));
        assert_eq!(cfg.flow.new_timeout, Duration::from_secs(30));
        assert_eq!(cfg.flow.established_timeout, Duration::from_secs(300));
        assert_eq!(cfg.flow.closed_timeout, Duration::from_secs(10));
        assert_eq!(cfg.flow.wait_timeout, Duration::from_millis(100));
        assert_eq!(cfg.exporter.format, ExportFormat::JsonCompact);
    }

    #[test]
    fn new_succeeds_without_config_path() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from(["eddy"]);
            let cfg = Conf::new(&cli).expect("config should load without path");
            assert_eq!(cfg.config_path, None);
            assert_eq!(cfg.log_level, Level::INFO);

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_nonexistent_config_file() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from(["eddy", "--config", "nonexistent.yaml"]);
            let err = Conf::new(&cli).expect_err("expected error with nonexistent file");
            assert!(matches!(err, ConfError::NoConfigFile(_)), "unexpected error: {err}");

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_directory_as_config_path() {
        Jail::expect_with(|jail| {
            let path = "a_directory";
            jail.create_dir(path)?;

            let cli = Cli::parse_from(["eddy", "--config", path]);
            let err = Conf::new(&cli).expect_err("expected error with directory path");
            let msg = err.to_string();
            assert!(msg.contains("is not a valid file"), "unexpected error: {msg}");

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_invalid_config_extension() {
        Jail::expect_with(|jail| {
            let path = "eddy.toml";
            jail.create_file(path, "")?;

            let cli = Cli::parse_from(["eddy", "--config", path]);
            let err = Conf::new(&cli).expect_err("expected error with invalid extension");
            let msg = err.to_string();
            assert!(
                msg.contains("invalid file extension '.toml'"),
                "unexpected error: {msg}"
            );

            Ok(())
        })
    }

    #[test]
    fn loads_from_yaml_file_with_cli_override() {
        Jail::expect_with(|jail| {
            let path = "eddy.yaml";
            jail.create_file(
                path,
                r#"
log_level: warn
input: from_file.erf
worker_count: 4
flow:
  max_flows: 128
  established_timeout: 2m
exporter:
  format: pretty
                "#,
            )?;

            let cli = Cli::parse_from(["eddy", "--config", path, "--log-level", "debug"]);
            let cfg = Conf::new(&cli).expect("config loads from cli file");
            assert_eq!(cfg.config_path, Some(PathBuf::from(path)));
            assert_eq!(cfg.log_level, Level::DEBUG);
            assert_eq!(cfg.input, Some(PathBuf::from("from_file.erf")));
            assert_eq!(cfg.worker_count, 4);
            assert_eq!(cfg.flow.max_flows, 128);
            assert_eq!(cfg.flow.established_timeout, Duration::from_secs(120));
            assert_eq!(cfg.flow.new_timeout, Duration::from_secs(30));
            assert_eq!(cfg.exporter.format, ExportFormat::Pretty);

            Ok(())
        });
    }

    #[test]
    fn env_overrides_file_and_cli_overrides_env() {
        Jail::expect_with(|jail| {
            let path = "eddy.yml";
            jail.create_file(
                path,
                r#"
worker_count: 4
input: from_file.erf
flow:
  closed_timeout: 20s
                "#,
            )?;
            jail.set_env("EDDY_CONFIG_PATH", path);
            jail.set_env("EDDY_WORKER_COUNT", "8");
            jail.set_env("EDDY_FLOW__CLOSED_TIMEOUT", "3s");
            jail.set_env("EDDY_INPUT", "from_env.erf");

            let cli = Cli::parse_from(["eddy", "--input", "from_cli.erf"]);
            let cfg = Conf::new(&cli).expect("config loads from env file");
            assert_eq!(cfg.worker_count, 8);
            assert_eq!(cfg.flow.closed_timeout, Duration::from_secs(3));
            assert_eq!(cfg.input, Some(PathBuf::from("from_cli.erf")));

            Ok(())
        });
    }

    #[test]
    fn rejects_out_of_range_values() {
        Jail::expect_with(|jail| {
            jail.set_env("EDDY_WORKER_COUNT", "0");
            let cli = Cli::parse_from(["eddy"]);
            let err = Conf::new(&cli).expect_err("zero workers must be rejected");
            assert!(
                matches!(err, ConfError::Invalid { field: "worker_count", .. }),
                "unexpected error: {err}"
            );

            jail.set_env("EDDY_WORKER_COUNT", "1");
            jail.set_env("EDDY_FLOW__MAX_FLOWS", "0");
            let err = Conf::new(&cli).expect_err("empty flow table must be rejected");
            assert!(
                matches!(err, ConfError::Invalid { field: "flow.max_flows", .. }),
                "unexpected error: {err}"
            );

            Ok(())
        });
    }

    #[test]
    fn rejects_unparsable_duration() {
        Jail::expect_with(|jail| {
            jail.set_env("EDDY_FLOW__MANAGER_INTERVAL", "soon");
            let cli = Cli::parse_from(["eddy"]);
            let err = Conf::new(&cli).expect_err("bad duration must be rejected");
            assert!(matches!(err, ConfError::Extraction(_)), "unexpected error: {err}");

            Ok(())
        });
    }
}
