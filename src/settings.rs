//! Application settings objects and initialization
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

static PREFIX: &str = "sync";

static KILOBYTE: u32 = 1024;
static MEGABYTE: u32 = KILOBYTE * KILOBYTE;
static DEFAULT_MAX_POST_BYTES: u32 = 2 * MEGABYTE;
static DEFAULT_MAX_POST_RECORDS: u32 = 100;
static DEFAULT_MAX_RECORD_PAYLOAD_BYTES: u32 = 256 * KILOBYTE;
static DEFAULT_MAX_REQUEST_BYTES: u32 = 2 * MEGABYTE;
static DEFAULT_MAX_TOTAL_BYTES: u32 = 10 * DEFAULT_MAX_POST_BYTES;
static DEFAULT_MAX_TOTAL_RECORDS: u32 = 1_000;
static DEFAULT_MAX_BSO_GET_LIMIT: u32 = 1_000;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub host: String,
    pub actix_keep_alive: Option<u32>,

    pub human_logs: bool,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,
    pub statsd_label: String,

    /// Cors Settings
    pub cors_allowed_origin: Option<String>,
    pub cors_max_age: Option<usize>,
    pub cors_allowed_methods: Option<Vec<String>>,
    pub cors_allowed_headers: Option<Vec<String>>,

    /// The per-user store pool.
    pub storage: StorageSettings,

    /// Server-enforced limits for request payloads.
    pub limits: ServerLimits,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            port: 8000,
            host: "127.0.0.1".to_string(),
            actix_keep_alive: None,
            human_logs: false,
            statsd_host: None,
            statsd_port: 8125,
            statsd_label: "syncshard".to_string(),
            cors_allowed_origin: None,
            cors_max_age: None,
            cors_allowed_methods: None,
            cors_allowed_headers: None,
            storage: StorageSettings::default(),
            limits: ServerLimits::default(),
        }
    }
}

impl Settings {
    /// Load the settings from the config file if supplied, then the environment.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        // Merge the config file if supplied
        if let Some(config_filename) = filename {
            s.merge(File::with_name(config_filename))?;
        }

        // Merge the environment overrides
        // While the prefix is currently case insensitive, it's traditional
        // that environment vars be UPPERCASE. This will accept environment
        // variables specified as `SYNC_STORAGE__DATABASE_PATH="/data"` as
        // `storage.database_path = "/data"`
        s.merge(Environment::with_prefix(&PREFIX.to_uppercase()).separator("__"))?;

        match s.try_into::<Self>() {
            Ok(s) => Ok(s),
            // Configuration errors are not very sysop friendly. Try to make
            // them a bit more 3AM useful.
            Err(ConfigError::Message(v)) => {
                println!("Bad configuration: {:?}", &v);
                println!("Please set in config file or environment variable.");
                println!("For example to set `database_path` use env var `SYNC_STORAGE__DATABASE_PATH`\n");
                error!("Configuration error: Value undefined {:?}", &v);
                Err(ConfigError::NotFound(v))
            }
            Err(e) => {
                error!("Configuration error: Other: {:?}", &e);
                Err(e)
            }
        }
    }

    pub fn banner(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Settings for the sharded pool of per-user stores.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Base directory for the per-user database files, or ":memory:".
    pub database_path: String,

    /// Number of independent partitions the pool is sharded over.
    /// 0 means one per CPU.
    pub num_partitions: u32,

    /// Max number of open stores per partition before the LRU tail is shed.
    pub partition_size: u32,

    /// How long an element may sit idle before its store is closed. Also the
    /// period of the partition maintenance tick.
    pub element_ttl_secs: u64,

    /// Vacuum a store once this percentage of its file is free pages.
    pub vacuum_free_percent: u32,

    /// Bounds for the randomized per-user purge interval.
    pub min_purge_secs: u64,
    pub max_purge_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> StorageSettings {
        StorageSettings {
            database_path: "./data".to_string(),
            num_partitions: 0,
            partition_size: 100,
            element_ttl_secs: 60,
            vacuum_free_percent: 10,
            min_purge_secs: 6 * 60 * 60,
            max_purge_secs: 24 * 60 * 60,
        }
    }
}

/// Server-enforced limits for request payloads.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerLimits {
    /// Maximum combined size of BSO payloads for a single request, in bytes.
    pub max_post_bytes: u32,

    /// Maximum BSO count for a single request.
    pub max_post_records: u32,

    /// Maximum size of an individual BSO payload, in bytes.
    pub max_record_payload_bytes: u32,

    /// Maximum `Content-Length` for all incoming requests, in bytes.
    pub max_request_bytes: u32,

    /// Maximum combined size of BSO payloads across a batch upload, in bytes.
    pub max_total_bytes: u32,

    /// Maximum BSO count across a batch upload.
    pub max_total_records: u32,

    /// Upper bound on the page size of collection reads. Not part of the
    /// advertised configuration object.
    #[serde(skip_serializing)]
    pub max_bso_get_limit: u32,
}

impl Default for ServerLimits {
    /// Create a default `ServerLimits` instance.
    fn default() -> Self {
        Self {
            max_post_bytes: DEFAULT_MAX_POST_BYTES,
            max_post_records: DEFAULT_MAX_POST_RECORDS,
            max_record_payload_bytes: DEFAULT_MAX_RECORD_PAYLOAD_BYTES,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_total_records: DEFAULT_MAX_TOTAL_RECORDS,
            max_bso_get_limit: DEFAULT_MAX_BSO_GET_LIMIT,
        }
    }
}
