use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths;

pub const DEFAULT_NEW_RELIC_URL: &str = "https://rpm.newrelic.com/deployments.xml";
pub const DEFAULT_COMPARE_URL: &str =
    "https://github.com/mozilla/mozillians/compare/{{oldrev}}...{{newrev}}";

/// Settings for one deployment target, read from rollout.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub src_dir: String,

    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_update_ref")]
    pub update_ref: String,

    #[serde(default)]
    pub web_hostgroup: Option<HostGroup>,

    #[serde(default)]
    pub celery_hostgroup: Option<HostGroup>,

    #[serde(default)]
    pub ssh_key: Option<String>,

    #[serde(default)]
    pub remote_update_script: Option<String>,

    #[serde(default)]
    pub remote_wsgi: Option<String>,

    #[serde(default)]
    pub remote_hostname: Option<String>,

    #[serde(default)]
    pub celery_service: Option<String>,

    #[serde(default)]
    pub deploy_script: Option<String>,

    #[serde(default = "default_prime_ports")]
    pub prime_ports: Vec<u16>,

    #[serde(default = "default_prime_requests")]
    pub prime_requests: u32,

    #[serde(default)]
    pub new_relic: NewRelicSettings,

    #[serde(default = "default_compare_url")]
    pub compare_url: String,

    #[serde(default = "default_revision_file")]
    pub revision_file: String,

    #[serde(default = "default_prev_revision_file")]
    pub prev_revision_file: String,
}

/// A named set of hosts that receive the same remote commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<String>,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelicSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default = "default_new_relic_url")]
    pub url: String,
}

impl Default for NewRelicSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            app_id: None,
            url: default_new_relic_url(),
        }
    }
}

impl NewRelicSettings {
    /// Both the API key and the app id are set and non-empty.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.api_key) && present(&self.app_id)
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_python() -> String {
    "python".to_string()
}

fn default_update_ref() -> String {
    "origin/master".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_prime_ports() -> Vec<u16> {
    vec![80, 81]
}

fn default_prime_requests() -> u32 {
    10
}

fn default_new_relic_url() -> String {
    DEFAULT_NEW_RELIC_URL.to_string()
}

fn default_compare_url() -> String {
    DEFAULT_COMPARE_URL.to_string()
}

fn default_revision_file() -> String {
    "media/revision.txt".to_string()
}

fn default_prev_revision_file() -> String {
    "media/prev-revision.txt".to_string()
}

// =============================================================================
// Accessors for settings that only some tasks need
// =============================================================================

impl Settings {
    /// Settings with defaults for everything except the source directory.
    pub fn new(src_dir: impl Into<String>) -> Self {
        Self {
            src_dir: src_dir.into(),
            python: default_python(),
            update_ref: default_update_ref(),
            web_hostgroup: None,
            celery_hostgroup: None,
            ssh_key: None,
            remote_update_script: None,
            remote_wsgi: None,
            remote_hostname: None,
            celery_service: None,
            deploy_script: None,
            prime_ports: default_prime_ports(),
            prime_requests: default_prime_requests(),
            new_relic: NewRelicSettings::default(),
            compare_url: default_compare_url(),
            revision_file: default_revision_file(),
            prev_revision_file: default_prev_revision_file(),
        }
    }

    pub fn web_hostgroup(&self) -> Result<&HostGroup> {
        require_group(self.web_hostgroup.as_ref(), "webHostgroup")
    }

    pub fn celery_hostgroup(&self) -> Result<&HostGroup> {
        require_group(self.celery_hostgroup.as_ref(), "celeryHostgroup")
    }

    pub fn remote_update_script(&self) -> Result<&str> {
        require_str(self.remote_update_script.as_deref(), "remoteUpdateScript")
    }

    pub fn remote_wsgi(&self) -> Result<&str> {
        require_str(self.remote_wsgi.as_deref(), "remoteWsgi")
    }

    pub fn remote_hostname(&self) -> Result<&str> {
        require_str(self.remote_hostname.as_deref(), "remoteHostname")
    }

    pub fn celery_service(&self) -> Result<&str> {
        require_str(self.celery_service.as_deref(), "celeryService")
    }

    pub fn deploy_script(&self) -> Result<&str> {
        require_str(self.deploy_script.as_deref(), "deployScript")
    }

    /// Expanded identity file path, if one is configured.
    pub fn ssh_key_path(&self) -> Option<String> {
        self.ssh_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| shellexpand::tilde(k).to_string())
    }

    /// `manage.py` invocation with the configured interpreter.
    pub fn manage(&self, args: &str) -> String {
        format!("{} manage.py {}", self.python, args)
    }

    fn validate(&self, path: &str) -> Result<()> {
        if self.src_dir.trim().is_empty() {
            return Err(Error::config_missing_key("srcDir", Some(path.to_string())));
        }

        for group in [&self.web_hostgroup, &self.celery_hostgroup]
            .into_iter()
            .flatten()
        {
            if group.hosts.is_empty() {
                return Err(Error::config_invalid_value(
                    group.name.clone(),
                    None,
                    format!("host group '{}' has no hosts", group.name),
                ));
            }
            if group.user.is_empty() {
                return Err(Error::config_invalid_value(
                    group.name.clone(),
                    None,
                    format!("host group '{}' has no user", group.name),
                ));
            }
        }

        if self.prime_ports.is_empty() {
            return Err(Error::config_invalid_value(
                "primePorts",
                None,
                "at least one port is required",
            ));
        }

        Ok(())
    }
}

fn require_group<'a>(group: Option<&'a HostGroup>, key: &str) -> Result<&'a HostGroup> {
    group.ok_or_else(|| Error::config_missing_key(key, None))
}

fn require_str<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::config_missing_key(key, None))
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load settings from an explicit path, $ROLLOUT_CONFIG, or the default location.
pub fn load(explicit: Option<&str>) -> Result<Settings> {
    let path = paths::settings_file(explicit)?;
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Settings> {
    let display = path.display().to_string();

    if !path.exists() {
        return Err(Error::config_not_found(display.clone())
            .with_hint(format!("Create {} or pass --config <path>", display)));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", display))))?;

    parse(&content, &display)
}

/// Parse settings JSON. `origin` names the source in error details.
pub fn parse(content: &str, origin: &str) -> Result<Settings> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))?;

    if value.get("srcDir").is_none() {
        return Err(Error::config_missing_key("srcDir", Some(origin.to_string())));
    }

    let settings: Settings =
        serde_json::from_value(value).map_err(|e| Error::config_invalid_json(origin, e))?;

    settings.validate(origin)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parse_applies_defaults() {
        let settings = parse(r#"{"srcDir": "/srv/app"}"#, "test").unwrap();

        assert_eq!(settings.src_dir, "/srv/app");
        assert_eq!(settings.python, "python");
        assert_eq!(settings.prime_ports, vec![80, 81]);
        assert_eq!(settings.prime_requests, 10);
        assert_eq!(settings.revision_file, "media/revision.txt");
        assert_eq!(settings.prev_revision_file, "media/prev-revision.txt");
        assert_eq!(settings.new_relic.url, DEFAULT_NEW_RELIC_URL);
        assert!(!settings.new_relic.is_configured());
    }

    #[test]
    fn parse_reads_host_groups() {
        let settings = parse(
            r#"{
                "srcDir": "/srv/app",
                "webHostgroup": {"name": "web", "hosts": ["web1", "web2"], "user": "deploy"},
                "celeryHostgroup": {"name": "celery", "hosts": ["worker1"], "user": "deploy", "port": 2222}
            }"#,
            "test",
        )
        .unwrap();

        let web = settings.web_hostgroup().unwrap();
        assert_eq!(web.hosts, vec!["web1", "web2"]);
        assert_eq!(web.port, 22);
        assert_eq!(settings.celery_hostgroup().unwrap().port, 2222);
    }

    #[test]
    fn parse_rejects_missing_src_dir() {
        let err = parse(r#"{"python": "python2.6"}"#, "test").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissingKey);
        assert_eq!(err.details["key"], "srcDir");
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let err = parse("{not json", "test").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidJson);
    }

    #[test]
    fn parse_rejects_empty_host_group() {
        let err = parse(
            r#"{"srcDir": "/srv/app", "webHostgroup": {"name": "web", "hosts": [], "user": "deploy"}}"#,
            "test",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
    }

    #[test]
    fn missing_optional_setting_is_reported_on_access() {
        let settings = Settings::new("/srv/app");
        let err = settings.remote_update_script().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissingKey);
        assert_eq!(err.details["key"], "remoteUpdateScript");
    }

    #[test]
    fn new_relic_requires_key_and_app_id() {
        let mut nr = NewRelicSettings::default();
        nr.api_key = Some("secret".to_string());
        assert!(!nr.is_configured());
        nr.app_id = Some(String::new());
        assert!(!nr.is_configured());
        nr.app_id = Some("1234".to_string());
        assert!(nr.is_configured());
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.json");
        fs::write(&path, r#"{"srcDir": "/srv/app", "python": "python2.6"}"#).unwrap();

        let settings = load_from_path(&path).unwrap();
        assert_eq!(settings.manage("migrate"), "python2.6 manage.py migrate");
    }

    #[test]
    fn load_from_missing_path_hints_at_config_flag() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_path(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigNotFound);
        assert!(err.details["path"].as_str().unwrap().ends_with("absent.json"));
        assert!(err.hints.iter().any(|h| h.message.contains("--config")));
    }
}
