//! Configuration schema and loading.
//!
//! Configuration lives in a TOML file selected by the `VAULTRC`
//! environment variable, falling back to `~/.vaultrc` and `/etc/vaultrc`
//! in that order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, IoContext, Result};

/// Environment variable selecting the configuration file.
pub const CONFIG_ENV: &str = "VAULTRC";

/// No warning checkpoint may exceed 90 days.
const MAX_WARNING_HOURS: u64 = 2160;

const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 86400;

fn default_ldap_port() -> u16 {
    389
}

fn default_smtp_port() -> u16 {
    25
}

fn default_mail_command() -> PathBuf {
    PathBuf::from("sendmail")
}

fn default_min_group_owners() -> usize {
    1
}

fn default_run_interval() -> u64 {
    24
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AttributeMap {
    pub uid: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub gid: Option<String>,
    pub owners: Option<String>,
    pub members: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LdapEntity {
    pub dn: Option<String>,
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ldap {
    pub host: Option<String>,
    pub port: u16,
}

impl Default for Ldap {
    fn default() -> Self {
        Self {
            host: None,
            port: default_ldap_port(),
        }
    }
}

/// Directory service settings.
///
/// Recognised for operational compatibility; the directory client itself
/// is an external collaborator and these settings are not consumed by the
/// OS-database identity manager.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Identity {
    pub ldap: Ldap,
    pub users: LdapEntity,
    pub groups: LdapEntity,
}

/// Recognised for compatibility with PostgreSQL-backed deployments.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Postgres {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Persistence {
    /// Path of the SQLite database file.
    pub database: PathBuf,

    #[serde(default)]
    pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Smtp {
    pub host: Option<String>,
    pub port: u16,
    pub tls: bool,
}

impl Default for Smtp {
    fn default() -> Self {
        Self {
            host: None,
            port: default_smtp_port(),
            tls: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Email {
    /// Sender address for notification e-mails.
    pub sender: String,

    /// Sendmail-compatible delivery command.
    #[serde(default = "default_mail_command")]
    pub command: PathBuf,

    #[serde(default)]
    pub smtp: Smtp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deletion {
    /// Days an untracked file may go unmodified before soft deletion.
    pub threshold: u64,

    /// Days a soft-deleted file is recoverable from limbo.
    pub limbo: u64,

    /// Warning checkpoints, in hours before deletion.
    #[serde(default)]
    pub warnings: Vec<u64>,

    /// Days before files in the keep branch are untracked, if set.
    pub keep: Option<u64>,
}

impl Deletion {
    pub fn threshold_duration(&self) -> Duration {
        Duration::from_secs(self.threshold * DAY_SECS)
    }

    pub fn limbo_duration(&self) -> Duration {
        Duration::from_secs(self.limbo * DAY_SECS)
    }

    pub fn keep_duration(&self) -> Option<Duration> {
        self.keep.map(|days| Duration::from_secs(days * DAY_SECS))
    }

    pub fn warning_duration(hours: u64) -> Duration {
        Duration::from_secs(hours * HOUR_SECS)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Archive {
    /// Minimum number of staged files before a drain happens on its own.
    pub threshold: usize,

    /// Path of the downstream handler executable.
    pub handler: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: Identity,

    pub persistence: Persistence,
    pub email: Email,
    pub deletion: Deletion,
    pub archive: Archive,

    /// Groups with fewer owners are ineligible for vault operations.
    #[serde(default = "default_min_group_owners")]
    pub min_group_owners: usize,

    /// Expected sweep cadence, in hours.
    ///
    /// Recognised for operational compatibility; the sweep itself acts
    /// only on the `deletion.warnings` checkpoints.
    #[serde(default = "default_run_interval")]
    pub sandman_run_interval: u64,
}

impl Config {
    /// Load from an explicit file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .io_context(|| format!("Failed to read config file at {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$VAULTRC`, `~/.vaultrc` or `/etc/vaultrc`, whichever
    /// exists first.
    pub fn load() -> Result<Self> {
        for candidate in Self::candidates() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        Err(Error::config("no configuration file found"))
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(Path::new(&home).join(".vaultrc"));
        }
        paths.push(PathBuf::from("/etc/vaultrc"));
        paths
    }

    fn validate(&mut self) -> Result<()> {
        if let Some(&excessive) = self
            .deletion
            .warnings
            .iter()
            .find(|&&h| h > MAX_WARNING_HOURS)
        {
            return Err(Error::config(format!(
                "warning checkpoint of {excessive} hours exceeds the {MAX_WARNING_HOURS} hour limit"
            )));
        }

        // Checkpoints are consumed smallest-first
        self.deletion.warnings.sort_unstable();
        self.deletion.warnings.dedup();

        if self.archive.threshold == 0 {
            return Err(Error::config("archive.threshold must be at least 1"));
        }

        Ok(())
    }
}
