use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::database::TransactionOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub transaction: TransactionConfig,
    pub languages: Vec<String>,
    pub schema: SchemaConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub database: String,
    pub app_name: String,
    pub max_pool_size: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    pub max_retries: u32,
    pub max_commit_time_ms: Option<u64>,
    pub hook_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub dir: PathBuf,
    pub enforce: bool,
    pub timestamps: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub enable_cors: bool,
    pub max_request_size_bytes: usize,
    pub max_read_limit: Option<i64>,
}

impl TransactionConfig {
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions {
            max_retries: self.max_retries,
            max_commit_time: self.max_commit_time_ms.map(Duration::from_millis),
            ..TransactionOptions::default()
        }
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_ms.map(Duration::from_millis)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Preset first, then individual overrides
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("MONGODB_URI") {
            self.database.uri = v;
        }
        if let Ok(v) = env::var("MONGODB_DATABASE") {
            self.database.database = v;
        }
        if let Ok(v) = env::var("MONGODB_APP_NAME") {
            self.database.app_name = v;
        }
        if let Ok(v) = env::var("MONGODB_MAX_POOL_SIZE") {
            self.database.max_pool_size = v.parse().unwrap_or(self.database.max_pool_size);
        }
        if let Ok(v) = env::var("MONGODB_CONNECT_TIMEOUT") {
            self.database.connect_timeout_secs = v.parse().unwrap_or(self.database.connect_timeout_secs);
        }

        // Transaction overrides
        if let Ok(v) = env::var("TRANSACTION_MAX_RETRIES") {
            self.transaction.max_retries = v.parse().unwrap_or(self.transaction.max_retries);
        }
        if let Ok(v) = env::var("TRANSACTION_MAX_COMMIT_TIME_MS") {
            self.transaction.max_commit_time_ms = v.parse().ok();
        }
        if let Ok(v) = env::var("HOOK_TIMEOUT_MS") {
            self.transaction.hook_timeout_ms = v.parse().ok();
        }

        if let Ok(v) = env::var("APP_LANGUAGES") {
            let languages: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !languages.is_empty() {
                self.languages = languages;
            }
        }

        // Schema overrides
        if let Ok(v) = env::var("SCHEMA_DIR") {
            self.schema.dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SCHEMA_ENFORCE") {
            self.schema.enforce = v.parse().unwrap_or(self.schema.enforce);
        }
        if let Ok(v) = env::var("SCHEMA_TIMESTAMPS") {
            self.schema.timestamps = v.parse().unwrap_or(self.schema.timestamps);
        }

        // API overrides
        if let Ok(v) = env::var("PORT") {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_ENABLE_CORS") {
            self.api.enable_cors = v.parse().unwrap_or(self.api.enable_cors);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }
        if let Ok(v) = env::var("API_MAX_READ_LIMIT") {
            self.api.max_read_limit = v.parse().ok();
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
                database: "docstack_dev".to_string(),
                app_name: "docstack".to_string(),
                max_pool_size: 10,
                connect_timeout_secs: 30,
            },
            transaction: TransactionConfig {
                max_retries: 3,
                max_commit_time_ms: None,
                hook_timeout_ms: None,
            },
            languages: vec!["en".to_string()],
            schema: SchemaConfig {
                dir: PathBuf::from("schemas"),
                enforce: false,
                timestamps: true,
            },
            api: ApiConfig {
                port: 9001,
                enable_request_logging: true,
                enable_cors: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
                max_read_limit: Some(1000),
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
                database: "docstack_staging".to_string(),
                app_name: "docstack".to_string(),
                max_pool_size: 20,
                connect_timeout_secs: 10,
            },
            transaction: TransactionConfig {
                max_retries: 3,
                max_commit_time_ms: Some(10_000),
                hook_timeout_ms: Some(5_000),
            },
            languages: vec!["en".to_string()],
            schema: SchemaConfig {
                dir: PathBuf::from("schemas"),
                enforce: true,
                timestamps: true,
            },
            api: ApiConfig {
                port: 9001,
                enable_request_logging: true,
                enable_cors: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
                max_read_limit: Some(500),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
                database: "docstack".to_string(),
                app_name: "docstack".to_string(),
                max_pool_size: 50,
                connect_timeout_secs: 5,
            },
            transaction: TransactionConfig {
                max_retries: 5,
                max_commit_time_ms: Some(5_000),
                hook_timeout_ms: Some(2_000),
            },
            languages: vec!["en".to_string()],
            schema: SchemaConfig {
                dir: PathBuf::from("schemas"),
                enforce: true,
                timestamps: true,
            },
            api: ApiConfig {
                port: 9001,
                enable_request_logging: false,
                enable_cors: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
                max_read_limit: Some(100),
            },
        }
    }
}

// Global config for the binary; library components take settings by injection
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(!config.schema.enforce);
        assert_eq!(config.languages, vec!["en".to_string()]);
        assert_eq!(config.api.max_read_limit, Some(1000));
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(config.schema.enforce);
        assert_eq!(config.api.max_read_limit, Some(100));
        let options = config.transaction.options();
        assert_eq!(options.max_retries, 5);
        assert_eq!(options.max_commit_time, Some(Duration::from_secs(5)));
    }
}
