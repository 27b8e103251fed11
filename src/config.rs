//! Process configuration.
//!
//! Credentials and header text come from the environment, read once at
//! startup through an [`Environment`] (any `name -> value` lookup, so tests
//! don't touch the real process environment). Each collaborator gets its own
//! typed section; a missing or malformed variable is a [`ConfigError`] naming
//! the variable. Empty values count as missing.
//!
//! ## Variables
//!
//! | Section | Variables |
//! |---------|-----------|
//! | [`HeaderConfig`] | `HEADER_AUTHOR`, `HEADER_DISCLOSURE`, `HEADER_LICENSE_URL` |
//! | [`DatabaseConfig`] | `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`, optional `DB_CA_CERT` |
//! | [`SpacesConfig`] (per scope) | `SPACES_REGION_{SCOPE}`, `SPACES_KEY_{SCOPE}`, `SPACES_SECRET_{SCOPE}`, `SPACES_BUCKET_{SCOPE}` |
//! | [`GhostConfig`] | `GHOST_ADMIN_API_URL`, `GHOST_ADMIN_API_KEY` (`<id>:<secret>`), optional `GHOST_ADMIN_API_VERSION` |
//!
//! The public scope also accepts the unscoped legacy names `SPACES_REGION`,
//! `SPACES_KEY`, `SPACES_SECRET` and `SPACES_BUCKET`. A scope with none of its
//! variables set is simply unconfigured; a scope with only some of them set
//! is an error.
//!
//! Sections are loaded on demand: a dry run with `--out-dir` never asks for
//! Spaces credentials, and `--no-patch` never asks for Ghost's.

use crate::store::Scope;
use thiserror::Error;

pub const DEFAULT_GHOST_VERSION: &str = "v5";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Text stamped into every published envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderConfig {
    pub author: String,
    pub disclosure: String,
    pub license_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// PEM certificate to verify the server against.
    pub ca_cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacesConfig {
    pub region: String,
    pub key: String,
    pub secret: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub public: Option<SpacesConfig>,
    pub private: Option<SpacesConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostConfig {
    pub admin_url: String,
    pub key_id: String,
    /// Hex-encoded signing secret.
    pub secret: String,
    pub version: String,
}

/// Which optional sections a command needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Needs {
    pub storage: bool,
    pub ghost: bool,
}

/// Everything a publish run needs, loaded once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub header: HeaderConfig,
    pub database: DatabaseConfig,
    pub storage: Option<StorageConfig>,
    pub ghost: Option<GhostConfig>,
}

impl AppConfig {
    pub fn load(env: &Environment<'_>, needs: Needs) -> Result<Self, ConfigError> {
        Ok(Self {
            header: env.header()?,
            database: env.database()?,
            storage: needs.storage.then(|| env.storage()).transpose()?,
            ghost: needs.ghost.then(|| env.ghost()).transpose()?,
        })
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// A source of named settings.
pub struct Environment<'a> {
    lookup: &'a (dyn Fn(&str) -> Option<String> + Send + Sync),
}

impl Environment<'static> {
    /// The real process environment.
    pub fn process() -> Self {
        Self {
            lookup: &process_env,
        }
    }
}

impl<'a> Environment<'a> {
    pub fn new(lookup: &'a (dyn Fn(&str) -> Option<String> + Send + Sync)) -> Self {
        Self { lookup }
    }

    /// Non-empty value of `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    pub fn require(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    pub fn header(&self) -> Result<HeaderConfig, ConfigError> {
        Ok(HeaderConfig {
            author: self.require("HEADER_AUTHOR")?,
            disclosure: self.require("HEADER_DISCLOSURE")?,
            license_url: self.require("HEADER_LICENSE_URL")?,
        })
    }

    pub fn database(&self) -> Result<DatabaseConfig, ConfigError> {
        let port = self.require("DB_PORT")?;
        Ok(DatabaseConfig {
            host: self.require("DB_HOST")?,
            port: port.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "DB_PORT".to_string(),
                reason: format!("\"{port}\" is not a port number"),
            })?,
            user: self.require("DB_USER")?,
            password: self.require("DB_PASSWORD")?,
            name: self.require("DB_NAME")?,
            ca_cert: self.get("DB_CA_CERT"),
        })
    }

    pub fn storage(&self) -> Result<StorageConfig, ConfigError> {
        Ok(StorageConfig {
            public: self.spaces(Scope::Public)?,
            private: self.spaces(Scope::Private)?,
        })
    }

    /// Spaces settings for one scope, `None` when none are set.
    pub fn spaces(&self, scope: Scope) -> Result<Option<SpacesConfig>, ConfigError> {
        let legacy = scope == Scope::Public;
        let names = ["REGION", "KEY", "SECRET", "BUCKET"].map(|base| {
            let scoped = format!("SPACES_{base}_{}", scope.as_str().to_ascii_uppercase());
            let fallback = legacy.then(|| format!("SPACES_{base}"));
            (scoped, fallback)
        });
        let values = names.clone().map(|(scoped, fallback)| {
            self.get(&scoped)
                .or_else(|| fallback.and_then(|name| self.get(&name)))
        });

        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let missing: Vec<String> = names
            .iter()
            .zip(&values)
            .filter(|(_, value)| value.is_none())
            .map(|((scoped, fallback), _)| match fallback {
                Some(name) => format!("{scoped} (or {name})"),
                None => scoped.clone(),
            })
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(format!(
                "Spaces {scope} scope needs {}",
                missing.join(", ")
            )));
        }

        let [region, key, secret, bucket] = values.map(Option::unwrap_or_default);
        Ok(Some(SpacesConfig {
            region,
            key,
            secret,
            bucket,
        }))
    }

    pub fn ghost(&self) -> Result<GhostConfig, ConfigError> {
        let admin_url = self.require("GHOST_ADMIN_API_URL")?;
        let key = self.require("GHOST_ADMIN_API_KEY")?;
        let (key_id, secret) = key
            .split_once(':')
            .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
            .ok_or_else(|| ConfigError::Invalid {
                name: "GHOST_ADMIN_API_KEY".to_string(),
                reason: "must be in the format <id>:<secret>".to_string(),
            })?;
        Ok(GhostConfig {
            admin_url,
            key_id: key_id.to_string(),
            secret: secret.to_string(),
            version: self
                .get("GHOST_ADMIN_API_VERSION")
                .unwrap_or_else(|| DEFAULT_GHOST_VERSION.to_string()),
        })
    }
}
