use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub corpus: CorpusConfig,
    pub converter: ConverterConfig,
    pub validator: ValidatorConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusConfig {
    /// Directory holding per-partition slots, ledger tables and identity
    /// assignments.
    pub data_dir: String,
    /// The read-only master input table.
    pub master_path: String,
    /// Optional rewrite-rule file; missing means no rewrites.
    pub rules_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    pub endpoint_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("corpus.data_dir", "./output")?
            .set_default("corpus.master_path", "./data/master.csv")?
            .set_default("corpus.rules_path", "./data/rules.json")?
            .set_default("converter.gateway_url", "")?
            .set_default("converter.model", "default")?
            .set_default("validator.endpoint_url", "http://localhost:1729/validate")?
            .set_default("validator.timeout_secs", 30)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.backoff_ms", 500)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(data_dir) = env::var("DATA_DIR") {
            builder = builder.set_override("corpus.data_dir", data_dir)?;
        }

        if let Ok(master_path) = env::var("MASTER_INPUT") {
            builder = builder.set_override("corpus.master_path", master_path)?;
        }

        if let Ok(rules_path) = env::var("REWRITE_RULES") {
            builder = builder.set_override("corpus.rules_path", rules_path)?;
        }

        if let Ok(gateway_url) = env::var("CONVERTER_GATEWAY_URL") {
            builder = builder.set_override("converter.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("CONVERTER_API_KEY") {
            builder = builder.set_override("converter.api_key", Some(api_key))?;
        }

        if let Ok(model) = env::var("CONVERTER_MODEL") {
            builder = builder.set_override("converter.model", model)?;
        }

        if let Ok(endpoint_url) = env::var("VALIDATOR_URL") {
            builder = builder.set_override("validator.endpoint_url", endpoint_url)?;
        }

        if let Ok(timeout) = env::var("VALIDATOR_TIMEOUT_SECS") {
            builder =
                builder.set_override("validator.timeout_secs", timeout.parse::<u64>().unwrap_or(30))?;
        }

        if let Ok(max_attempts) = env::var("RETRY_MAX_ATTEMPTS") {
            builder = builder
                .set_override("retry.max_attempts", max_attempts.parse::<u32>().unwrap_or(3))?;
        }

        if let Ok(backoff) = env::var("RETRY_BACKOFF_MS") {
            builder =
                builder.set_override("retry.backoff_ms", backoff.parse::<u64>().unwrap_or(500))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        // Try to load from .env file
        let _ = dotenv::dotenv();

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            corpus: CorpusConfig {
                data_dir: "./output".to_string(),
                master_path: "./data/master.csv".to_string(),
                rules_path: "./data/rules.json".to_string(),
            },
            converter: ConverterConfig {
                gateway_url: "http://localhost:8080".to_string(),
                api_key: None,
                model: "default".to_string(),
            },
            validator: ValidatorConfig {
                endpoint_url: "http://localhost:1729/validate".to_string(),
                timeout_secs: 30,
            },
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 0,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("RETRY_MAX_ATTEMPTS");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.validator.timeout_secs, 30);
    }
}
