use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::context::Language;
use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .dbxrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Builds a config from explicit pairs only, ignoring files and environment.
    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert((*k).to_string(), (*v).to_string());
        }
        Self { inner: map, config_path: PathBuf::new() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse::<u32>().ok())
    }

    pub fn get_secs(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(|v| Duration::try_from_secs_f64(v).ok())
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "DATABRICKS_HOST",
        "DATABRICKS_TOKEN",
        "DATABRICKS_CLUSTER_ID",
        "DEFAULT_LANGUAGE",
        "POLL_INTERVAL",
        "COMMAND_TIMEOUT",
        "REQUEST_TIMEOUT",
        "MAX_RETRIES",
        "OUTPUT_MODE",
    ];

    KEYS.contains(&k) || k.starts_with("DBX_EXEC_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("dbx_exec").join(".dbxrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Numbers
    m.insert("POLL_INTERVAL".into(), "0.5".into());
    m.insert("COMMAND_TIMEOUT".into(), "1800".into());
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("MAX_RETRIES".into(), "3".into());

    // Strings
    m.insert("DEFAULT_LANGUAGE".into(), "python".into());
    m.insert("OUTPUT_MODE".into(), "human".into());

    m
}

/// Values given on the command line; each one wins over the config.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub host: Option<String>,
    pub token: Option<String>,
    pub cluster_id: Option<String>,
    pub language: Option<Language>,
}

/// Connection identity for one run. Immutable once resolved.
#[derive(Clone)]
pub struct Profile {
    pub host: String,
    pub token: String,
    pub cluster_id: String,
    pub language: Language,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("host", &self.host)
            .field("token", &"<redacted>")
            .field("cluster_id", &self.cluster_id)
            .field("language", &self.language)
            .finish()
    }
}

impl Profile {
    pub fn resolve(cfg: &Config, overrides: &ProfileOverrides) -> ExecResult<Self> {
        let host = overrides.host.clone().or_else(|| cfg.get("DATABRICKS_HOST"));
        let token = overrides.token.clone().or_else(|| cfg.get("DATABRICKS_TOKEN"));
        let cluster_id = overrides
            .cluster_id
            .clone()
            .or_else(|| cfg.get("DATABRICKS_CLUSTER_ID"));

        let mut missing = Vec::new();
        if host.is_none() {
            missing.push("host (DATABRICKS_HOST or --host)");
        }
        if token.is_none() {
            missing.push("token (DATABRICKS_TOKEN or --token)");
        }
        if cluster_id.is_none() {
            missing.push("cluster_id (DATABRICKS_CLUSTER_ID or --cluster-id)");
        }
        let (Some(host), Some(token), Some(cluster_id)) = (host, token, cluster_id) else {
            return Err(ExecError::Config(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )));
        };

        let language = match overrides.language {
            Some(l) => l,
            None => cfg
                .get("DEFAULT_LANGUAGE")
                .map(|s| s.parse::<Language>())
                .transpose()
                .map_err(ExecError::Config)?
                .unwrap_or_default(),
        };

        Ok(Self {
            host: normalize_host(&host),
            token,
            cluster_id,
            language,
        })
    }
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
