//! Configuration management
//!
//! Settings live in `<dir>/settings.json`:
//! ```json
//! {
//!   "backend": "supabase",
//!   "supabase": { "url": "https://xyz.supabase.co", "anonKey": "...", "redirectTo": "http://localhost:3000" },
//!   "local": { "email": "me@example.com" }
//! }
//! ```
//! Keys the CLI doesn't manage are preserved on save.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.json";

/// Where Supabase sends the browser after sign-in
pub const DEFAULT_REDIRECT_TO: &str = "http://localhost:3000";

/// OAuth provider used when none is given
pub const DEFAULT_OAUTH_PROVIDER: &str = "google";

/// Which platform the bookmarks live on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Offline: DuckDB file plus a local identity
    #[default]
    Local,
    /// Hosted: Supabase Auth and REST
    Supabase,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local => f.write_str("local"),
            Backend::Supabase => f.write_str("supabase"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "supabase" => Ok(Backend::Supabase),
            other => Err(anyhow!("Unknown backend '{}' (expected 'local' or 'supabase')", other)),
        }
    }
}

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<Backend>,
    #[serde(default)]
    supabase: SupabaseSettings,
    #[serde(default)]
    local: LocalSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupabaseSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirect_to: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Connection details for a Supabase project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

/// Smartmark configuration (resolved view of settings plus environment)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub backend: Backend,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub redirect_to: Option<String>,
    pub local_email: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn read_settings(dir: &Path) -> Result<SettingsFile> {
    let settings_path = dir.join(SETTINGS_FILE);
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)?;
    Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %settings_path.display(), error = %e, "Ignoring malformed settings file");
        SettingsFile::default()
    }))
}

impl Config {
    /// Load config from the smartmark directory
    ///
    /// Each setting can be overridden by an environment variable:
    /// SMARTMARK_BACKEND, SMARTMARK_SUPABASE_URL, SMARTMARK_SUPABASE_ANON_KEY,
    /// SMARTMARK_REDIRECT_TO and SMARTMARK_LOCAL_EMAIL.
    pub fn load(smartmark_dir: &Path) -> Result<Self> {
        Self::load_with_env(smartmark_dir, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`] with an explicit environment lookup
    pub fn load_with_env<F>(smartmark_dir: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = read_settings(smartmark_dir)?;

        let backend = match non_empty(env("SMARTMARK_BACKEND")) {
            Some(value) => value.parse()?,
            None => raw.backend.unwrap_or_default(),
        };

        Ok(Self {
            backend,
            supabase_url: non_empty(env("SMARTMARK_SUPABASE_URL")).or(non_empty(raw.supabase.url)),
            supabase_anon_key: non_empty(env("SMARTMARK_SUPABASE_ANON_KEY"))
                .or(non_empty(raw.supabase.anon_key)),
            redirect_to: non_empty(env("SMARTMARK_REDIRECT_TO")).or(non_empty(raw.supabase.redirect_to)),
            local_email: non_empty(env("SMARTMARK_LOCAL_EMAIL")).or(non_empty(raw.local.email)),
        })
    }

    /// Save config to the smartmark directory
    /// Preserves other settings that the CLI doesn't manage
    pub fn save(&self, smartmark_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(smartmark_dir)?;
        let mut settings = read_settings(smartmark_dir)?;

        settings.backend = Some(self.backend);
        settings.supabase.url = self.supabase_url.clone();
        settings.supabase.anon_key = self.supabase_anon_key.clone();
        settings.supabase.redirect_to = self.redirect_to.clone();
        settings.local.email = self.local_email.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(smartmark_dir.join(SETTINGS_FILE), content)?;
        Ok(())
    }

    /// Supabase project details; both URL and anon key are required
    pub fn supabase(&self) -> Result<SupabaseConfig> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(anon_key)) => Ok(SupabaseConfig {
                url: url.clone(),
                anon_key: anon_key.clone(),
            }),
            _ => Err(anyhow!(
                "Supabase backend needs supabase.url and supabase.anonKey in settings.json \
                 (or SMARTMARK_SUPABASE_URL and SMARTMARK_SUPABASE_ANON_KEY)"
            )),
        }
    }

    pub fn redirect_to(&self) -> &str {
        self.redirect_to.as_deref().unwrap_or(DEFAULT_REDIRECT_TO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_settings() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();

        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.redirect_to(), DEFAULT_REDIRECT_TO);
        assert!(config.local_email.is_none());
        assert!(config.supabase().is_err());
    }

    #[test]
    fn test_load_settings_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{
                "backend": "supabase",
                "supabase": { "url": "https://xyz.supabase.co", "anonKey": "anon", "redirectTo": "http://localhost:4000" },
                "local": { "email": "me@example.com" }
            }"#,
        )
        .unwrap();

        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.backend, Backend::Supabase);
        assert_eq!(
            config.supabase().unwrap(),
            SupabaseConfig {
                url: "https://xyz.supabase.co".to_string(),
                anon_key: "anon".to_string(),
            }
        );
        assert_eq!(config.redirect_to(), "http://localhost:4000");
        assert_eq!(config.local_email.as_deref(), Some("me@example.com"));
    }

    #[test]
    fn test_env_overrides_settings() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), r#"{ "backend": "supabase" }"#).unwrap();

        let config = Config::load_with_env(dir.path(), |key| match key {
            "SMARTMARK_BACKEND" => Some("LOCAL".to_string()),
            "SMARTMARK_LOCAL_EMAIL" => Some("env@example.com".to_string()),
            "SMARTMARK_REDIRECT_TO" => Some("  ".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.local_email.as_deref(), Some("env@example.com"));
        assert_eq!(config.redirect_to(), DEFAULT_REDIRECT_TO);
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        let dir = tempdir().unwrap();
        let result = Config::load_with_env(dir.path(), |key| {
            (key == "SMARTMARK_BACKEND").then(|| "firebase".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();

        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.backend, Backend::Local);
    }

    #[test]
    fn test_save_preserves_unmanaged_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "theme": "dark", "local": { "email": "old@example.com", "avatar": "cat" } }"#,
        )
        .unwrap();

        let mut config = Config::load_with_env(dir.path(), no_env).unwrap();
        config.local_email = Some("new@example.com".to_string());
        config.save(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["local"]["avatar"], "cat");
        assert_eq!(raw["local"]["email"], "new@example.com");
        assert_eq!(raw["backend"], "local");

        let reloaded = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(reloaded.local_email.as_deref(), Some("new@example.com"));
    }
}
