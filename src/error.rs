//! Error types for configuration and build runs.
//!
//! `ConfigError` is raised before any work starts and ends the process.
//! `BuildError` aborts the current run; in watch mode it is logged and the
//! watcher keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config file parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("Malformed theme manifest `{0}`")]
    Manifest(PathBuf, #[source] serde_json::Error),

    #[error("Invalid version requirement `{0}` in theme manifest")]
    Version(String, #[source] semver::Error),

    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Errors that abort a build run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("template `{name}` not found (searched: {})", display_paths(.searched))]
    TemplateNotFound { name: String, searched: Vec<PathBuf> },

    #[error("asset `{href}` not found (searched: {})", display_paths(.searched))]
    AssetNotFound { href: String, searched: Vec<PathBuf> },

    #[error("failed to transform `{}`: {message}", .path.display())]
    AssetTransform { path: PathBuf, message: String },

    #[error("failed to render `{template}`: {message}")]
    Render { template: String, message: String },

    #[error("request to `{url}` failed: {message}")]
    Network { url: String, message: String },

    #[error("invalid changelog data in `{}`", .0.display())]
    Data(PathBuf, #[source] serde_json::Error),

    #[error("IO error at `{}`", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
}

impl BuildError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |err| Self::Io(path, err)
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_config_error_display() {
        let io_err = ConfigError::Io(
            PathBuf::from("changelog.toml"),
            Error::new(ErrorKind::NotFound, "file not found"),
        );
        let display = format!("{io_err}");
        assert!(display.contains("IO error"));
        assert!(display.contains("changelog.toml"));

        let validation_err = ConfigError::Validation("theme directory missing".to_string());
        assert!(format!("{validation_err}").contains("theme directory missing"));
    }

    #[test]
    fn test_template_not_found_lists_searched_paths() {
        let err = BuildError::TemplateNotFound {
            name: "page.html".into(),
            searched: vec![PathBuf::from("/theme/web_page.html"), PathBuf::from("/src/web/page.html")],
        };
        let display = err.to_string();
        assert!(display.contains("page.html"));
        assert!(display.contains("/theme/web_page.html, /src/web/page.html"));
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let err = BuildError::io("/out/index.html")(Error::new(ErrorKind::PermissionDenied, "denied"));
        assert!(matches!(err, BuildError::Io(ref p, _) if p == &PathBuf::from("/out/index.html")));
    }
}
