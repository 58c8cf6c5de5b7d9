/// Service configuration loaded from a JSON file at startup
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine plus its engine-specific settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub engine: String,

    #[serde(rename = "engine-config", default)]
    pub engine_config: Value,
}

/// One auxiliary store serving a data type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryConfig {
    pub instance: String,

    pub engine: String,

    #[serde(rename = "engine-config", default)]
    pub engine_config: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServiceConfig {
    /// Name of the main store's engine
    pub engine: String,

    pub engine_config: Value,

    /// Further primary stores owning disjoint datasets
    #[serde(alias = "mainstore-alternatives")]
    pub alternate_stores: Vec<StoreConfig>,

    /// Data type to the stores serving it
    #[serde(alias = "datatypes")]
    pub auxiliary_datatypes: BTreeMap<String, Vec<AuxiliaryConfig>>,

    /// Base URL of the identity service
    #[serde(alias = "dsg-url")]
    pub identity_service: Option<String>,

    /// Seconds a validated identity stays cached
    #[serde(alias = "dsg-cache-ttl")]
    pub identity_cache_ttl: u64,

    /// Dataset name to identity-service slug
    pub dataset_map: HashMap<String, String>,

    /// Backend timeout (seconds)
    pub timeout: u64,

    pub pool_size: usize,

    pub ssl_cert: Option<PathBuf>,

    pub ssl_key: Option<PathBuf>,

    pub static_dir: Option<PathBuf>,

    /// Revoked credentials, one per line
    pub token_blocklist: Option<PathBuf>,

    /// Email to role file used instead of identity-service permissions
    pub auth_file: Option<PathBuf>,

    pub disable_auth: bool,

    pub log_file: Option<PathBuf>,

    pub hostname: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: String::new(),
            engine_config: Value::Null,
            alternate_stores: Vec::new(),
            auxiliary_datatypes: BTreeMap::new(),
            identity_service: None,
            identity_cache_ttl: 300,
            dataset_map: HashMap::new(),
            timeout: 60,
            pool_size: 50,
            ssl_cert: None,
            ssl_key: None,
            static_dir: None,
            token_blocklist: None,
            auth_file: None,
            disable_auth: false,
            log_file: None,
            hostname: None,
        }
    }
}

impl ServiceConfig {
    /// Reads and validates a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("{} cannot be read", path.display()))?;
        let config = Self::from_json(&raw)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: ServiceConfig = serde_json::from_str(raw).context("malformed JSON")?;
        if config.timeout == 0 {
            config.timeout = 60;
        }
        if config.identity_cache_ttl == 0 {
            config.identity_cache_ttl = 300;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.trim().is_empty() {
            bail!("engine must be specified");
        }
        if self.ssl_cert.is_some() != self.ssl_key.is_some() {
            bail!("ssl-cert and ssl-key must be given together");
        }
        if !self.disable_auth && self.identity_service.as_deref().map_or(true, str::is_empty) {
            bail!("identity-service is required unless disable-auth is set");
        }
        for (type_tag, entries) in &self.auxiliary_datatypes {
            for entry in entries {
                if entry.instance.is_empty() {
                    bail!("auxiliary store for {} has no instance name", type_tag);
                }
            }
        }
        Ok(())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_cache_ttl)
    }

    pub fn tls_enabled(&self) -> bool {
        self.ssl_cert.is_some() && self.ssl_key.is_some()
    }
}
