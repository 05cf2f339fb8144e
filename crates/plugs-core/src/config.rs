//! Configuration: TOML file + env var overrides + defaults.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{PlugError, Result};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "plugs.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlugsConfig {
    pub selection: SelectionConfig,
    pub ledger: LedgerConfig,
    pub assets: AssetsConfig,
    pub backends: BackendsConfig,
    /// Directory groups whose members may moderate plugs.
    pub admin_groups: Vec<String>,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for PlugsConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            ledger: LedgerConfig::default(),
            assets: AssetsConfig::default(),
            backends: BackendsConfig::default(),
            admin_groups: vec!["drink".into(), "rtp".into(), "eboard".into()],
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectionConfig {
    /// Share of draws (out of 100) reserved for house plugs.
    pub house_percent: u8,
    /// Restarts allowed after lost races before giving up. Retirements are not counted.
    pub max_restarts: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            house_percent: 5,
            max_restarts: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Views bought by one credit.
    pub views_per_credit: i32,
    /// Compare-and-swap attempts per debit.
    pub max_debit_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            views_per_credit: 1000,
            max_debit_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssetsConfig {
    pub bucket: String,
    pub presign_ttl_secs: u64,
    pub public_base_url: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            bucket: "plugs".into(),
            presign_ttl_secs: 60,
            public_base_url: "http://localhost:9000".into(),
        }
    }
}

/// Backend endpoints and credentials.
///
/// An empty endpoint means the in-memory stand-in is used by the binary.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendsConfig {
    pub database_uri: String,
    pub database_max_connections: u32,
    /// `ldaps://host[:port]`; a bare host name implies `ldaps://`.
    pub directory_host: String,
    pub directory_bind_dn: String,
    pub directory_bind_password: String,
    /// Parent of `uid=<user>` entries.
    pub directory_users_base: String,
    /// Parent of `cn=<group>` entries named in `admin_groups`.
    pub directory_groups_base: String,
    /// Integer attribute holding a user's credits.
    pub directory_balance_attribute: String,
    pub object_store_host: String,
    pub object_store_region: String,
    pub object_store_access_id: String,
    pub object_store_secret_key: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            database_uri: String::new(),
            database_max_connections: 8,
            directory_host: String::new(),
            directory_bind_dn: String::new(),
            directory_bind_password: String::new(),
            directory_users_base: "cn=users,cn=accounts,dc=csh,dc=rit,dc=edu".into(),
            directory_groups_base: "cn=groups,cn=accounts,dc=csh,dc=rit,dc=edu".into(),
            directory_balance_attribute: "drinkBalance".into(),
            object_store_host: String::new(),
            object_store_region: "us-east-1".into(),
            object_store_access_id: String::new(),
            object_store_secret_key: String::new(),
        }
    }
}

impl fmt::Debug for BackendsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &str) -> &'static str {
            if value.is_empty() { "<unset>" } else { "<redacted>" }
        }
        f.debug_struct("BackendsConfig")
            .field("database_uri", &redact(&self.database_uri))
            .field("database_max_connections", &self.database_max_connections)
            .field("directory_host", &self.directory_host)
            .field("directory_bind_dn", &self.directory_bind_dn)
            .field("directory_bind_password", &redact(&self.directory_bind_password))
            .field("directory_users_base", &self.directory_users_base)
            .field("directory_groups_base", &self.directory_groups_base)
            .field("directory_balance_attribute", &self.directory_balance_attribute)
            .field("object_store_host", &self.object_store_host)
            .field("object_store_region", &self.object_store_region)
            .field("object_store_access_id", &self.object_store_access_id)
            .field("object_store_secret_key", &redact(&self.object_store_secret_key))
            .finish()
    }
}

impl PlugsConfig {
    /// Load from `path` (or [`DEFAULT_CONFIG_PATH`]), then apply env overrides.
    ///
    /// A missing default file yields defaults; a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|e| PlugError::Config(format!("{}: {e}", path_buf.display())))?;
            Self::from_toml(&raw)?
        } else if path.is_some() {
            return Err(PlugError::Config(format!(
                "missing configuration file: {}",
                path_buf.display()
            )));
        } else {
            Self::default()
        };

        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PlugError::Config(e.to_string()))
    }

    /// Apply overrides from `lookup` (the process environment in [`Self::load`]).
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let strings: [(&str, &mut String); 8] = [
            ("DB_URI", &mut self.backends.database_uri),
            ("LDAP_HOST", &mut self.backends.directory_host),
            ("LDAP_BIND_DN", &mut self.backends.directory_bind_dn),
            ("LDAP_BIND_PW", &mut self.backends.directory_bind_password),
            ("S3_HOST", &mut self.backends.object_store_host),
            ("S3_ACCESS_ID", &mut self.backends.object_store_access_id),
            ("S3_SECRET_KEY", &mut self.backends.object_store_secret_key),
            ("PLUGS_LOG_FILTER", &mut self.log_filter),
        ];
        for (name, slot) in strings {
            if let Some(value) = get(name) {
                *slot = value;
            }
        }

        if let Some(raw) = get("PLUGS_HOUSE_PERCENT") {
            self.selection.house_percent = parse_env("PLUGS_HOUSE_PERCENT", &raw)?;
        }
        if let Some(raw) = get("PLUGS_PRESIGN_TTL_SECS") {
            self.assets.presign_ttl_secs = parse_env("PLUGS_PRESIGN_TTL_SECS", &raw)?;
        }
        if let Some(raw) = get("PLUGS_VIEWS_PER_CREDIT") {
            self.ledger.views_per_credit = parse_env("PLUGS_VIEWS_PER_CREDIT", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.selection.house_percent > 100 {
            return Err(PlugError::Config(format!(
                "selection.house_percent must be in [0,100], got {}",
                self.selection.house_percent
            )));
        }
        if self.selection.max_restarts == 0 {
            return Err(PlugError::Config("selection.max_restarts must be positive".into()));
        }
        if self.ledger.views_per_credit <= 0 {
            return Err(PlugError::Config(format!(
                "ledger.views_per_credit must be positive, got {}",
                self.ledger.views_per_credit
            )));
        }
        if self.ledger.max_debit_attempts == 0 {
            return Err(PlugError::Config("ledger.max_debit_attempts must be positive".into()));
        }
        if self.assets.presign_ttl_secs == 0 {
            return Err(PlugError::Config("assets.presign_ttl_secs must be positive".into()));
        }
        if self.assets.bucket.is_empty() {
            return Err(PlugError::Config("assets.bucket must not be empty".into()));
        }
        if self.backends.database_max_connections == 0 {
            return Err(PlugError::Config(
                "backends.database_max_connections must be positive".into(),
            ));
        }
        if !self.backends.directory_host.is_empty() {
            let b = &self.backends;
            if b.directory_users_base.is_empty()
                || b.directory_groups_base.is_empty()
                || b.directory_balance_attribute.is_empty()
            {
                return Err(PlugError::Config(
                    "directory bases and balance attribute are required with backends.directory_host"
                        .into(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| PlugError::Config(format!("{name}={raw:?}: {e}")))
}
