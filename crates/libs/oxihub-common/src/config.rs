use config::{Config, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub lfs: LfsConfig,
    pub quota: QuotaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL clients can reach this server at; used when building
    /// absolute hrefs in transfer-protocol responses.
    pub public_base_url: String,
    /// Server-wide pepper mixed into token and password digests.
    pub token_pepper: String,
    /// Root directory for the SQLite database and per-repo git trees.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// "s3" or "memory".
    pub backend: String,
    pub bucket: String,
    pub region: String,
    /// Endpoint the server itself talks to (e.g. in-cluster MinIO).
    pub endpoint: Option<String>,
    /// Endpoint reachable from clients; presigned URLs are signed against
    /// this one. Falls back to `endpoint` when unset.
    pub public_endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_put_ttl")]
    pub presign_put_ttl_secs: u64,
    #[serde(default = "default_get_ttl")]
    pub presign_get_ttl_secs: u64,
}

fn default_put_ttl() -> u64 {
    3600
}

/// Long enough for a realistic large download over a slow link.
fn default_get_ttl() -> u64 {
    6 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LfsConfig {
    /// Commit-time threshold: files at or above this size go external.
    #[serde(default = "default_threshold")]
    pub default_threshold_bytes: u64,
    /// Objects above this size get a multipart plan (when the client
    /// advertised the multipart transfer).
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    #[serde(default = "default_part_size")]
    pub multipart_part_size_bytes: u64,
    /// Hard per-object cap. 0 disables the cap.
    #[serde(default)]
    pub max_object_bytes: u64,
    /// How many superseding commits before an old external blob becomes
    /// eligible for reclamation.
    #[serde(default = "default_keep_versions")]
    pub default_keep_versions: u32,
    #[serde(default = "default_staging_ttl")]
    pub staging_ttl_hours: u64,
}

fn default_threshold() -> u64 {
    10 * 1024 * 1024
}

fn default_multipart_threshold() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_part_size() -> u64 {
    512 * 1024 * 1024
}

fn default_keep_versions() -> u32 {
    3
}

fn default_staging_ttl() -> u64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    /// Default per-namespace budgets. 0 means unlimited.
    #[serde(default)]
    pub default_public_quota_bytes: u64,
    #[serde(default)]
    pub default_private_quota_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 28080,
                public_base_url: "http://localhost:28080".to_string(),
                token_pepper: "dev-pepper-change-me".to_string(),
                data_dir: "data".to_string(),
            },
            storage: StorageConfig {
                backend: "memory".to_string(),
                bucket: "oxihub".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                public_endpoint: None,
                access_key: None,
                secret_key: None,
                presign_put_ttl_secs: default_put_ttl(),
                presign_get_ttl_secs: default_get_ttl(),
            },
            lfs: LfsConfig {
                default_threshold_bytes: default_threshold(),
                multipart_threshold_bytes: default_multipart_threshold(),
                multipart_part_size_bytes: default_part_size(),
                max_object_bytes: 0,
                default_keep_versions: default_keep_versions(),
                staging_ttl_hours: default_staging_ttl(),
            },
            quota: QuotaConfig {
                default_public_quota_bytes: 0,
                default_private_quota_bytes: 0,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration with 12-factor app compliant env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. `PORT` / `HOST` / `PUBLIC_BASE_URL` / `STORAGE_PUBLIC_ENDPOINT` env vars
    /// 2. Config files (`config/default.toml`, `config/{run_mode}.toml`)
    /// 3. Hardcoded defaults
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 28080)?
            .set_default("server.public_base_url", "http://localhost:28080")?
            .set_default("server.token_pepper", "dev-pepper-change-me")?
            .set_default("server.data_dir", "data")?
            .set_default("storage.backend", "memory")?
            .set_default("storage.bucket", "oxihub")?
            .set_default("storage.region", "us-east-1")?
            .set_default("quota.default_public_quota_bytes", 0)?
            .set_default("quota.default_private_quota_bytes", 0)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        if let Ok(port) = env::var("PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder.set_override("server.port", p)?;
            }
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(base) = env::var("PUBLIC_BASE_URL") {
            builder = builder.set_override("server.public_base_url", base)?;
        }
        if let Ok(ep) = env::var("STORAGE_PUBLIC_ENDPOINT") {
            builder = builder.set_override("storage.public_endpoint", ep)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Endpoint presigned URLs should be signed against.
    pub fn signing_endpoint(&self) -> Option<&str> {
        self.storage
            .public_endpoint
            .as_deref()
            .or(self.storage.endpoint.as_deref())
    }
}
