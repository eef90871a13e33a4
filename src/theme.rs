//! Theme manifest: the `changelog` block of the theme's `package.json`.
//!
//! The bundled default manifest is always loaded first; a theme's own block
//! is deep-merged over it, so a theme only declares what it changes.

use crate::{error::ConfigError, log};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::Path};

const DEFAULT_MANIFEST: &str = include_str!("embed/theme/package.json");
const MANIFEST_NAME: &str = "package.json";

pub const BUILDER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebFeatures {
    #[serde(default)]
    pub theme_switcher: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSettings {
    #[serde(default)]
    pub features: WebFeatures,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Merged theme settings, read-only for the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfig {
    /// Builder version requirement declared by the theme.
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub site: Map<String, Value>,

    #[serde(default)]
    pub web: WebSettings,

    #[serde(default)]
    pub builder_version: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThemeConfig {
    /// Load the manifest for `theme_dir`, falling back to the bundled default.
    pub fn load(theme_dir: &Path) -> Result<Self, ConfigError> {
        let path = theme_dir.join(MANIFEST_NAME);
        let theme_block = if path.is_file() {
            let raw = fs::read_to_string(&path).map_err(|e| ConfigError::Io(path.clone(), e))?;
            let manifest: Value =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Manifest(path.clone(), e))?;
            manifest.get("changelog").cloned()
        } else {
            None
        };

        let config = Self::merged(theme_block, &path)?;
        config.check_version()?;
        Ok(config)
    }

    fn merged(theme_block: Option<Value>, origin: &Path) -> Result<Self, ConfigError> {
        let default: Value = serde_json::from_str(DEFAULT_MANIFEST)
            .map_err(|e| ConfigError::Manifest(origin.to_path_buf(), e))?;
        let mut block = default.get("changelog").cloned().unwrap_or(Value::Null);
        if let Some(theme) = theme_block {
            merge(&mut block, theme);
        }

        let mut config: Self = serde_json::from_value(block)
            .map_err(|e| ConfigError::Manifest(origin.to_path_buf(), e))?;
        config.builder_version = BUILDER_VERSION.to_string();
        Ok(config)
    }

    /// An unparsable requirement is an error; a mismatch only warns.
    fn check_version(&self) -> Result<(), ConfigError> {
        let Some(req) = self.version.as_deref() else {
            return Ok(());
        };
        let parsed = VersionReq::parse(req).map_err(|e| ConfigError::Version(req.to_string(), e))?;
        let builder = Version::parse(BUILDER_VERSION)
            .map_err(|e| ConfigError::Version(BUILDER_VERSION.to_string(), e))?;
        if !parsed.matches(&builder) {
            log!("warn"; "theme requires builder {req}, running {BUILDER_VERSION}");
        }
        Ok(())
    }
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_default_manifest_without_theme_file() {
        let dir = tempdir().unwrap();
        let config = ThemeConfig::load(dir.path()).unwrap();

        assert!(config.web.features.theme_switcher);
        assert_eq!(config.builder_version, BUILDER_VERSION);
    }

    #[test]
    fn test_theme_block_overrides_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "acme", "changelog": { "web": { "features": { "themeSwitcher": false, "search": true } } } }"#,
        )
        .unwrap();

        let config = ThemeConfig::load(dir.path()).unwrap();
        assert!(!config.web.features.theme_switcher);
        assert_eq!(config.web.features.extra.get("search"), Some(&json!(true)));
        // untouched default survives the merge
        assert!(config.version.is_some());
    }

    #[test]
    fn test_invalid_version_requirement() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{ "changelog": { "version": "not a version" } }"#,
        )
        .unwrap();

        let err = ThemeConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Version(..)));
    }

    #[test]
    fn test_mismatched_version_only_warns() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{ "changelog": { "version": ">=999.0.0" } }"#,
        )
        .unwrap();

        assert!(ThemeConfig::load(dir.path()).is_ok());
    }

    #[test]
    fn test_malformed_manifest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{ broken").unwrap();

        let err = ThemeConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Manifest(..)));
    }

    #[test]
    fn test_merge_nested_objects() {
        let mut base = json!({ "a": { "b": 1, "c": 2 }, "d": [1] });
        merge(&mut base, json!({ "a": { "c": 3 }, "d": [2, 3] }));
        assert_eq!(base, json!({ "a": { "b": 1, "c": 3 }, "d": [2, 3] }));
    }
}
