use bazaar_cache::CacheConfig;
use bazaar_seckill::SeckillConfig;
use bazaar_store::RedisConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Shared store; disabled means a single-instance in-memory store
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.redis.validate()?;
        self.cache.validate()?;
        self.seckill.validate()?;

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        if self.metrics.enabled && self.metrics.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "metrics.listen must be a socket address, got {:?}",
                self.metrics.listen
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics over HTTP
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9000".into()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "bazaar.toml";

    /// Environment overrides, e.g. `BAZAAR__REDIS__ENABLED=true`.
    pub fn environment() -> Environment {
        Environment::with_prefix("BAZAAR")
            .prefix_separator("__")
            .try_parsing(true)
            .separator("__")
    }

    /// Config file to load: the value after `--config`, else a non-empty
    /// `BAZAAR_CONFIG`, else [`DEFAULT_CONFIG_PATH`].
    pub fn config_path(args: impl IntoIterator<Item = String>, from_env: Option<String>) -> String {
        let mut after_flag = args.into_iter().skip_while(|arg| arg != "--config").skip(1);
        after_flag
            .next()
            .or(from_env.filter(|path| !path.is_empty()))
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        load_config_with(path, environment())
    }

    /// Loads the optional TOML file at `path` (default `bazaar.toml`), then
    /// applies `env` on top and validates the result.
    pub fn load_config_with(path: Option<&str>, env: Environment) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(env);

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::loader::{DEFAULT_CONFIG_PATH, config_path, environment, load_config_with};
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = load_config_with(Some("/nonexistent/bazaar.toml"), env(&[])).unwrap();
        assert!(!cfg.redis.enabled);
        assert_eq!(cfg.seckill.group, "g1");
        assert_eq!(cfg.cache.rebuild_workers, 10);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[redis]
url = "redis://cache.internal:6379"
pool_size = 4

[seckill]
consumer = "worker-a"
max_attempts = 7

[logging]
level = "debug"
"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let cfg = load_config_with(
            Some(&path),
            env(&[
                ("BAZAAR__SECKILL__MAX_ATTEMPTS", "9"),
                ("BAZAAR__CACHE__NULL_TTL_SECS", "30"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.redis.url, "redis://cache.internal:6379");
        assert_eq!(cfg.redis.pool_size, 4);
        assert_eq!(cfg.seckill.consumer.as_deref(), Some("worker-a"));
        assert_eq!(cfg.seckill.max_attempts, 9);
        assert_eq!(cfg.cache.null_ttl_secs, 30);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = load_config_with(None, env(&[("BAZAAR__LOGGING__LEVEL", "loud")])).unwrap_err();
        assert!(err.contains("logging.level"), "{err}");

        let err = load_config_with(None, env(&[("BAZAAR__SECKILL__MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(err.contains("max_attempts"), "{err}");
    }

    #[test]
    fn test_metrics_listen_must_parse_when_enabled() {
        let cfg = AppConfig {
            metrics: MetricsConfig {
                enabled: true,
                listen: "not-an-address".into(),
            },
            ..AppConfig::default()
        };
        assert!(cfg.validate().unwrap_err().contains("metrics.listen"));
    }

    #[test]
    fn test_config_path_prefers_flag_then_env() {
        let args = |list: &[&str]| list.iter().map(|a| a.to_string()).collect::<Vec<_>>();

        assert_eq!(
            config_path(args(&["--config", "cli.toml"]), Some("env.toml".into())),
            "cli.toml"
        );
        assert_eq!(config_path(args(&[]), Some("env.toml".into())), "env.toml");
        assert_eq!(config_path(args(&["--config"]), Some(String::new())), DEFAULT_CONFIG_PATH);
        assert_eq!(config_path(args(&["--verbose"]), None), DEFAULT_CONFIG_PATH);
    }
}
