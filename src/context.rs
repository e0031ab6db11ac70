// ABOUTME: Host-level configuration and context object for berth.
// ABOUTME: Constructed once at startup and passed into every component.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "berth.yml";
pub const CONFIG_FILENAME_ALT: &str = "berth.yaml";
pub const CONFIG_FILENAME_ETC: &str = "/etc/berth/config.yml";

/// Timestamp format used in meta records and startup banners.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Overlay repository provider backing branch/merge-request queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Plain local bare repository, no server API.
    #[default]
    None,
    Gitlab,
    Bitbucket,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Per-request timeout for health-check probes.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Skip TLS certificate verification when probing https checks.
    #[serde(default = "default_probe_insecure")]
    pub insecure: bool,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_insecure() -> bool {
    true
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            timeout: default_probe_timeout(),
            insecure: default_probe_insecure(),
        }
    }
}

/// Host configuration plus derived filesystem areas.
///
/// Everything that used to be ambient process state lives here; components
/// receive a `&HostContext` at construction instead of reading globals.
#[derive(Debug, Clone, Deserialize)]
pub struct HostContext {
    /// Root under which `apps/` and `transactions/` live.
    pub basedir: PathBuf,

    /// Deployment environment name, e.g. `test` or `production`.
    pub stage: String,

    /// If set, only this OS user may start applications.
    #[serde(default)]
    pub force_user: Option<String>,

    /// Staging area for indoubt transactions.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default)]
    pub provider: Provider,

    #[serde(default)]
    pub probe: ProbeConfig,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

impl HostContext {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Locate the host configuration, preferring the working directory over
    /// the system-wide file.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            PathBuf::from(CONFIG_FILENAME_ETC),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Directory holding deployed applications and their namespaced siblings.
    pub fn apps_dir(&self) -> PathBuf {
        self.basedir.join("apps")
    }

    /// Directory holding persisted transactions.
    pub fn transactions_dir(&self) -> PathBuf {
        self.basedir.join("transactions")
    }

    /// Base directory of a deployed application.
    pub fn app_basedir(&self, name: &str) -> PathBuf {
        self.apps_dir().join(name)
    }

    /// Base directory of a persisted transaction.
    pub fn tx_basedir(&self, id: &str) -> PathBuf {
        self.transactions_dir().join(id)
    }

    /// Current local time rendered with [`TIME_FORMAT`].
    pub fn timestamp(&self) -> String {
        chrono::Local::now().format(TIME_FORMAT).to_string()
    }

    /// Login name of the invoking user.
    pub fn login_user(&self) -> String {
        if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
            return user.name;
        }
        std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
    }
}
