use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::GatewayConfig;
use shared::domain::ProjectId;
use tracing::warn;

const KEYS: &[&str] = &["server_url", "api_token", "project_id", "request_timeout_secs"];

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub api_token: Option<String>,
    pub project_id: Option<i64>,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            api_token: None,
            project_id: None,
            request_timeout_secs: 30,
        }
    }
}

/// Defaults, then `path` if it exists, then `LABELER_*` and `APP__*`
/// environment variables.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        settings.apply_file(&raw);
    }
    settings.apply_env(|name| std::env::var(name).ok());

    settings
}

impl Settings {
    fn apply_file(&mut self, raw: &str) {
        let file_cfg = match toml::from_str::<HashMap<String, toml::Value>>(raw) {
            Ok(file_cfg) => file_cfg,
            Err(err) => {
                warn!(error = %err, "config: ignoring unreadable settings file");
                return;
            }
        };
        for key in KEYS {
            let value = match file_cfg.get(*key) {
                Some(toml::Value::String(v)) => v.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            self.set(key, value);
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in KEYS {
            let upper = key.to_uppercase();
            if let Some(v) = lookup(&format!("LABELER_{upper}")) {
                self.set(key, v);
            }
            if let Some(v) = lookup(&format!("APP__{upper}")) {
                self.set(key, v);
            }
        }
    }

    fn set(&mut self, key: &str, value: String) {
        match key {
            "server_url" => self.server_url = value,
            "api_token" => self.api_token = Some(value).filter(|token| !token.is_empty()),
            "project_id" => match value.parse::<i64>() {
                Ok(parsed) => self.project_id = Some(parsed),
                Err(_) => warn!(key, %value, "config: project id is not a number"),
            },
            "request_timeout_secs" => match value.parse::<u64>() {
                Ok(parsed) => self.request_timeout_secs = parsed,
                Err(_) => warn!(key, %value, "config: timeout is not a number of seconds"),
            },
            _ => {}
        }
    }

    /// Command-line flags win over everything else.
    pub fn apply_overrides(
        &mut self,
        server_url: Option<String>,
        api_token: Option<String>,
        project_id: Option<i64>,
    ) {
        if let Some(v) = server_url {
            self.server_url = v;
        }
        if let Some(v) = api_token {
            self.api_token = Some(v);
        }
        if let Some(v) = project_id {
            self.project_id = Some(v);
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.server_url.clone(),
            api_token: self.api_token.clone(),
            project_id: self.project_id.map(ProjectId),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn file_values_overlay_defaults() {
        let mut settings = Settings::default();
        settings.apply_file(
            r#"
            server_url = "https://labels.example.com"
            project_id = 7
            request_timeout_secs = 5
            "#,
        );

        assert_eq!(settings.server_url, "https://labels.example.com");
        assert_eq!(settings.project_id, Some(7));
        assert_eq!(settings.request_timeout_secs, 5);
        assert_eq!(settings.api_token, None);
    }

    #[test]
    fn unreadable_file_keeps_defaults() {
        let mut settings = Settings::default();
        settings.apply_file("server_url = ");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn app_prefixed_variables_win() {
        let mut settings = Settings::default();
        settings.apply_env(env_from(&[
            ("LABELER_SERVER_URL", "http://first"),
            ("APP__SERVER_URL", "http://second"),
            ("LABELER_API_TOKEN", "abc"),
            ("LABELER_PROJECT_ID", "not-a-number"),
        ]));

        assert_eq!(settings.server_url, "http://second");
        assert_eq!(settings.api_token.as_deref(), Some("abc"));
        assert_eq!(settings.project_id, None);
    }

    #[test]
    fn empty_token_means_anonymous() {
        let mut settings = Settings::default();
        settings.apply_env(env_from(&[("LABELER_API_TOKEN", "")]));
        assert_eq!(settings.api_token, None);
    }

    #[test]
    fn flags_override_and_map_to_gateway_config() {
        let mut settings = Settings::default();
        settings.apply_overrides(None, Some("tok".into()), Some(3));

        let config = settings.gateway_config();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.api_token.as_deref(), Some("tok"));
        assert_eq!(config.project_id, Some(ProjectId(3)));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn load_settings_reads_file_from_disk() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("labeler_config_test_{suffix}.toml"));
        fs::write(&path, "api_token = \"from-file\"\n").expect("write config");

        let settings = load_settings(&path);
        fs::remove_file(&path).expect("cleanup");

        // the environment may still override, so only the file-only key is checked
        if env::var("LABELER_API_TOKEN").is_err() && env::var("APP__API_TOKEN").is_err() {
            assert_eq!(settings.api_token.as_deref(), Some("from-file"));
        }
    }
}
