//! Changelog input data: the site, its ordered changelog entries, and where
//! they come from (remote API or a local JSON snapshot).
//!
//! Fields the builder does not interpret are kept in `extra` maps so they
//! reach templates unchanged.

use crate::{config::SiteConfig, debug, error::BuildError, log};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::Path, time::Duration};

/// Domain used for sites without a custom hostname.
const DEFAULT_SITE_DOMAIN: &str = "changelog.so";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hostname {
    #[serde(default)]
    pub value: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Site {
    pub id: String,

    #[serde(default)]
    pub slug: String,

    #[serde(default)]
    pub hostname: Option<Hostname>,

    /// Canonical URL, derived after loading.
    #[serde(default, skip_deserializing)]
    pub url: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Site {
    /// `https://{hostname}` for custom domains, else `https://{slug}.changelog.so`.
    pub fn canonical_url(&self) -> String {
        match self.hostname.as_ref().and_then(|h| h.value.as_deref()) {
            Some(host) if !host.is_empty() => format!("https://{host}"),
            _ => format!("https://{}.{DEFAULT_SITE_DOMAIN}", self.slug),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub color: Option<String>,

    #[serde(default)]
    pub background_color: Option<String>,

    #[serde(default)]
    pub border_color: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Changelog {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub headline: Option<String>,

    #[serde(default)]
    pub html: Option<String>,

    #[serde(default)]
    pub cover_image: Option<String>,

    #[serde(default)]
    pub authors: Vec<Author>,

    #[serde(default)]
    pub tags: Vec<Tag>,

    #[serde(default, rename = "createdAt")]
    pub created_at: Option<i64>,

    #[serde(default, rename = "dateAt")]
    pub date_at: Option<i64>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload shared by the API and the snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangelogData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub site: Site,

    #[serde(default)]
    pub changelogs: Vec<Changelog>,
}

impl ChangelogData {
    /// Parse a payload and fill derived fields.
    pub fn from_slice(bytes: &[u8], origin: &Path) -> Result<Self, BuildError> {
        let mut data: Self =
            serde_json::from_slice(bytes).map_err(|e| BuildError::Data(origin.to_path_buf(), e))?;
        data.finalize();
        Ok(data)
    }

    /// Load from a JSON file on disk.
    pub fn from_path(path: &Path) -> Result<Self, BuildError> {
        let bytes = fs::read(path).map_err(BuildError::io(path))?;
        let data = Self::from_slice(&bytes, path)?;
        debug!("data"; "loaded {} changelogs from {}", data.changelogs.len(), path.display());
        Ok(data)
    }

    /// Derive `site.url` and per-entry URLs.
    fn finalize(&mut self) {
        self.site.url = self.site.canonical_url();
        for changelog in &mut self.changelogs {
            if changelog.url.is_none() {
                changelog.url = Some(format!("{}/entry/{}", self.site.url, changelog.id));
            }
        }
    }

    /// Write the raw snapshot consumed by email-only rebuilds.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), BuildError> {
        let snapshot = Self {
            success: None,
            message: None,
            ..self.clone()
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| BuildError::Data(path.to_path_buf(), e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(BuildError::io(parent))?;
        }
        fs::write(path, json).map_err(BuildError::io(path))
    }
}

/// API path for a site: hostnames are looked up by `hostname.value`, slugs by `slug`.
pub fn api_url(host: &str, site: &str) -> String {
    let field = if site.contains('.') { "hostname.value" } else { "slug" };
    format!("https://{host}/changelog/list/{site}/{field}?html=true&stats=true")
}

/// Fetch the changelog list from the API.
pub fn fetch(host: &str, site: &str) -> Result<ChangelogData, BuildError> {
    let url = api_url(host, site);
    let network = |message: String| BuildError::Network {
        url: url.clone(),
        message,
    };

    debug!("data"; "fetching {url}");
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(concat!("changelog-theme/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| network(e.to_string()))?;
    let response = client.get(&url).send().map_err(|e| network(e.to_string()))?;
    let status = response.status();
    let bytes = response.bytes().map_err(|e| network(e.to_string()))?;

    let data = ChangelogData::from_slice(&bytes, Path::new(&url));
    match data {
        Ok(data) if status.is_success() && data.success != Some(false) => Ok(data),
        Ok(data) => Err(network(
            data.message
                .unwrap_or_else(|| format!("invalid response from server ({status})")),
        )),
        Err(_) if !status.is_success() => Err(network(format!("server returned {status}"))),
        Err(e) => Err(e),
    }
}

/// Load input data per config: the `[source] file` when given, else the API.
///
/// The snapshot at `{output}/data.json` is (re)written unless it is the input.
pub fn load(config: &SiteConfig) -> Result<ChangelogData, BuildError> {
    let snapshot = config.snapshot_path();
    let data = match (&config.source.file, &config.source.site) {
        (Some(file), _) => ChangelogData::from_path(file)?,
        (None, Some(site)) => fetch(&config.source.host, site)?,
        (None, None) => {
            return Err(BuildError::Network {
                url: config.source.host.clone(),
                message: "no site or data file configured".into(),
            });
        }
    };

    if data.success == Some(false) {
        return Err(BuildError::Network {
            url: config.source.file.as_deref().map_or_else(
                || config.source.host.clone(),
                |p| p.display().to_string(),
            ),
            message: data.message.clone().unwrap_or_else(|| "request failed".into()),
        });
    }

    let is_snapshot = config
        .source
        .file
        .as_deref()
        .is_some_and(|file| same_file(file, &snapshot));
    if !is_snapshot {
        data.write_snapshot(&snapshot)?;
    }

    log!("data"; "{} changelogs for {}", data.changelogs.len(), data.site.url);
    Ok(data)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
