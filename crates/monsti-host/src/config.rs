//! `monsti.yaml`, per-site `site.yaml` and runtime knobs.

use crate::error::{HostError, HostResult, io_error};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

pub const SETTINGS_FILE: &str = "monsti.yaml";
pub const SITE_FILE: &str = "site.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Directories {
    pub data: PathBuf,
    pub share: PathBuf,
    #[serde(default)]
    pub locale: PathBuf,
    pub run: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    /// Log mails instead of delivering them.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_sendmail")]
    pub sendmail: PathBuf,
}

impl Default for MailSettings {
    fn default() -> Self {
        MailSettings {
            debug: false,
            sendmail: default_sendmail(),
        }
    }
}

fn default_sendmail() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

/// Contents of `<config>/monsti.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct MonstiSettings {
    pub directories: Directories,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub mail: MailSettings,
    /// Directory holding `monsti-<module>` executables; `PATH` if unset.
    #[serde(default)]
    pub module_path: Option<PathBuf>,
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl MonstiSettings {
    /// Read the settings, resolving relative directories against the
    /// config directory.
    pub fn load(config_dir: &Path) -> HostResult<Self> {
        let path = config_dir.join(SETTINGS_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        let mut settings: MonstiSettings =
            serde_yaml::from_str(&raw).map_err(|source| HostError::Yaml { path, source })?;
        settings.config_dir = config_dir.to_path_buf();
        let dirs = &mut settings.directories;
        for dir in [&mut dirs.data, &mut dirs.share, &mut dirs.locale, &mut dirs.run] {
            make_absolute(dir, config_dir);
        }
        if let Some(module_path) = settings.module_path.as_mut() {
            make_absolute(module_path, config_dir);
        }
        Ok(settings)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.directories.run.join(monsti_rpc::SOCKET_NAME)
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.config_dir.join("sites")
    }

    pub fn site_data_dir(&self, site: &str) -> PathBuf {
        self.directories.data.join(site)
    }

    pub fn site_templates_dir(&self, site: &str) -> PathBuf {
        self.site_data_dir(site).join("templates")
    }

    pub fn site_static_dir(&self, site: &str) -> PathBuf {
        self.site_data_dir(site).join("site-static")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.directories.share.join("templates")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.directories.share.join("static")
    }

    /// Every `sites/<name>/site.yaml` below the config directory.
    pub fn load_sites(&self) -> HostResult<BTreeMap<String, SiteConfig>> {
        let dir = self.sites_dir();
        let mut sites = BTreeMap::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(sites),
            Err(err) => return Err(io_error(dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let file = entry.path().join(SITE_FILE);
            if !file.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let site = SiteConfig::load(&name, &file)?;
            sites.insert(name, site);
        }
        Ok(sites)
    }
}

fn make_absolute(path: &mut PathBuf, root: &Path) {
    if path.is_relative() {
        *path = root.join(&*path);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Contents of `sites/<site>/site.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub email_name: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub session_auth_key: String,
    #[serde(default)]
    pub password_token_key: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Node type id to the template used instead of `ns/Name-view`.
    #[serde(default)]
    pub template_overwrites: BTreeMap<String, String>,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl SiteConfig {
    pub fn load(name: &str, path: &Path) -> HostResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        let mut site: SiteConfig = serde_yaml::from_str(&raw).map_err(|source| HostError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        site.name = name.to_string();
        Ok(site)
    }

    /// Whether `host` (as sent in the `Host` header) addresses this site.
    pub fn serves(&self, host: &str) -> bool {
        let bare = host.rsplit_once(':').map_or(host, |(name, _)| name);
        self.hosts.iter().any(|h| h == host || h == bare)
    }
}

/// Runtime knobs of the daemon.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub listen: SocketAddr,
    pub socket_path: PathBuf,
    /// How often a blocked signal emission logs that it is still waiting.
    pub signal_log_interval: Duration,
    /// How long to wait for modules to report their initialization.
    pub module_init_timeout: Duration,
    pub session_pool_capacity: usize,
    pub bcrypt_cost: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            socket_path: PathBuf::from(monsti_rpc::SOCKET_NAME),
            signal_log_interval: Duration::from_secs(30),
            module_init_timeout: Duration::from_secs(60),
            session_pool_capacity: 10,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl HostConfig {
    pub fn from_settings(settings: &MonstiSettings) -> HostResult<Self> {
        let listen = settings
            .listen
            .parse()
            .map_err(|e| HostError::Config(format!("invalid listen address {}: {e}", settings.listen)))?;
        Ok(Self {
            listen,
            socket_path: settings.socket_path(),
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn settings_resolve_directories_against_config_dir() {
        let dir = TempDir::new().expect("tmp");
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "directories:\n  data: data\n  share: /usr/share/monsti\n  run: run\nmodules: [example]\nmail:\n  debug: true\n",
        )
        .expect("write");
        let site_dir = dir.path().join("sites/example");
        std::fs::create_dir_all(&site_dir).expect("mkdir");
        std::fs::write(
            site_dir.join(SITE_FILE),
            "title: Example\nhosts: [\"example.com\", \"localhost:8080\"]\nowner:\n  name: Owner\n  email: owner@example.com\n",
        )
        .expect("write");

        let settings = MonstiSettings::load(dir.path()).expect("settings");
        assert_eq!(settings.directories.data, dir.path().join("data"));
        assert_eq!(settings.directories.share, PathBuf::from("/usr/share/monsti"));
        assert_eq!(settings.socket_path(), dir.path().join("run/monsti.socket"));
        assert_eq!(settings.modules, vec!["example".to_string()]);
        assert!(settings.mail.debug);
        assert_eq!(settings.listen, "127.0.0.1:8080");

        let sites = settings.load_sites().expect("sites");
        let site = &sites["example"];
        assert_eq!(site.name, "example");
        assert_eq!(site.locale, "en");
        assert_eq!(site.timezone, "UTC");
        assert_eq!(site.owner.email, "owner@example.com");
        assert!(site.serves("example.com:8080"));
        assert!(site.serves("localhost:8080"));
        assert!(!site.serves("other.org"));

        let config = HostConfig::from_settings(&settings).expect("host config");
        assert_eq!(config.listen.port(), 8080);
    }
}
