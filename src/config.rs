// Runtime configuration - assembled from the environment once at startup and
// validated before the HTTP Edge binds its listener.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_INDEXER_BIN: &str = "graphrag";
const DEFAULT_INDEX_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 300;

/// Resolved, validated configuration for one backend process.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub settings_path: PathBuf,
    pub port: u16,
    pub cors_origin: String,
    pub indexer_bin: String,
    pub index_timeout: Duration,
    pub search_timeout: Duration,
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// `GRAPHRAG_DATA_DIR` is required; everything else defaults.
    pub fn from_env() -> Result<Self, AppError> {
        // GRAPHRAG_DATA_DIR is the backend root passed to the indexer as
        // `--root` (§6.3): it contains `input/`, `output/`, and the settings
        // document, rather than being the output directory alone.
        let data_dir = std::env::var("GRAPHRAG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        let settings_path = std::env::var("GRAPHRAG_SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("settings.yaml"));

        let port = std::env::var("PORT")
            .ok()
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| AppError::internal(format!("invalid PORT: {e}")))?
            .unwrap_or(DEFAULT_PORT);

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string());

        let indexer_bin = std::env::var("GRAPHRAG_INDEXER_BIN")
            .unwrap_or_else(|_| DEFAULT_INDEXER_BIN.to_string());

        let index_timeout = std::env::var("GRAPHRAG_INDEX_TIMEOUT_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| AppError::internal(format!("invalid GRAPHRAG_INDEX_TIMEOUT_SECS: {e}")))?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_INDEX_TIMEOUT_SECS));

        let search_timeout = std::env::var("GRAPHRAG_SEARCH_TIMEOUT_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| {
                AppError::internal(format!("invalid GRAPHRAG_SEARCH_TIMEOUT_SECS: {e}"))
            })?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS));

        let config = Config {
            data_dir,
            settings_path,
            port,
            cors_origin,
            indexer_bin,
            index_timeout,
            search_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        std::fs::create_dir_all(self.input_dir())
            .map_err(|e| AppError::internal(format!("cannot create input directory: {e}")))?;
        std::fs::create_dir_all(self.output_dir())
            .map_err(|e| AppError::internal(format!("cannot create output directory: {e}")))?;
        if self.port == 0 {
            return Err(AppError::internal("PORT must be nonzero"));
        }
        Ok(())
    }

    pub fn input_dir(&self) -> PathBuf {
        self.data_dir.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.output_dir().join(".lock")
    }
}
