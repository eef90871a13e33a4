//! Asset fingerprinting.
//!
//! `resolve("app.css")` finds the source (theme first, then `web/`), runs it
//! through the transformer, writes `static/app.{hash}.{sri}.css` and returns
//! the href plus its integrity digest. Results are cached per session on
//! `(source path, content hash)`, so each distinct content is transformed and
//! written at most once even under concurrent requests.

pub mod transform;

use crate::{
    config::SiteConfig,
    debug,
    error::BuildError,
    utils::hash::{content_hash, integrity},
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use transform::{AssetKind, AssetTransformer, ExternalTransformer};

const GLOBAL_CSS: &str = "global.css";
const THEME_CSS: &str = "theme.css";
const HASH_SLICE: usize = 6;

/// A fingerprinted asset. Empty when the source was blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAsset {
    /// Site-absolute href, e.g. `/static/app.1a2b3c.Xy9Zq0.css`
    pub relative_path: String,
    pub integrity: String,
}

impl ResolvedAsset {
    pub fn is_empty(&self) -> bool {
        self.relative_path.is_empty()
    }
}

type CacheKey = (PathBuf, String);
type Slot = Arc<Mutex<Option<ResolvedAsset>>>;

/// Session-owned asset cache.
///
/// The outer lock only guards the slot table; each slot has its own lock,
/// held while its asset is produced, so concurrent callers for the same key
/// wait for the first one instead of transforming again.
#[derive(Default)]
pub struct AssetCache {
    slots: Mutex<FxHashMap<CacheKey, Slot>>,
}

impl AssetCache {
    pub fn get_or_try_insert<F>(&self, key: CacheKey, produce: F) -> Result<ResolvedAsset, BuildError>
    where
        F: FnOnce() -> Result<ResolvedAsset, BuildError>,
    {
        let slot = Arc::clone(self.slots.lock().entry(key).or_default());
        let mut entry = slot.lock();
        if let Some(hit) = entry.as_ref() {
            return Ok(hit.clone());
        }
        let asset = produce()?;
        *entry = Some(asset.clone());
        Ok(asset)
    }

    /// Number of produced entries.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AssetPipeline {
    search_dirs: [PathBuf; 2],
    bundle_parts: Vec<PathBuf>,
    static_dir: PathBuf,
    cache: AssetCache,
    transformer: Box<dyn AssetTransformer>,
    global: Mutex<Option<ResolvedAsset>>,
}

impl AssetPipeline {
    pub fn new(config: &SiteConfig, transformer: Box<dyn AssetTransformer>) -> Self {
        let theme_dir = config.theme_dir();
        let legacy_dir = config.legacy_theme_dir();

        let mut bundle_parts = vec![config.web_dir().join(GLOBAL_CSS), legacy_dir.join(THEME_CSS)];
        if theme_dir != legacy_dir {
            bundle_parts.push(theme_dir.join(THEME_CSS));
        }

        Self {
            search_dirs: [theme_dir, config.web_dir()],
            bundle_parts,
            static_dir: config.static_dir(),
            cache: AssetCache::default(),
            transformer,
            global: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Fingerprint the asset `href` refers to.
    pub fn resolve(&self, href: &str) -> Result<ResolvedAsset, BuildError> {
        let source = self.locate(href)?;
        let name = Path::new(href)
            .file_name()
            .map_or_else(|| href.to_string(), |n| n.to_string_lossy().into_owned());
        self.resolve_file(&source, &name)
    }

    fn locate(&self, href: &str) -> Result<PathBuf, BuildError> {
        let relative = href.trim_start_matches('/');
        let candidates: Vec<PathBuf> = self.search_dirs.iter().map(|d| d.join(relative)).collect();
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(BuildError::AssetNotFound {
                href: href.to_string(),
                searched: candidates,
            }),
        }
    }

    fn resolve_file(&self, source: &Path, name: &str) -> Result<ResolvedAsset, BuildError> {
        let bytes = fs::read(source).map_err(BuildError::io(source))?;
        let hash = content_hash(&bytes);
        let absolute = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());

        self.cache.get_or_try_insert((absolute, hash.clone()), || {
            self.produce(source, name, &bytes, &hash)
        })
    }

    fn produce(&self, source: &Path, name: &str, bytes: &[u8], hash: &str) -> Result<ResolvedAsset, BuildError> {
        if bytes.trim_ascii().is_empty() {
            debug!("assets"; "{} is empty, skipping", source.display());
            return Ok(ResolvedAsset::default());
        }

        let transformed = match AssetKind::from_path(source) {
            AssetKind::Other => bytes.to_vec(),
            kind => self.transformer.transform(kind, source)?,
        };
        let integrity = integrity(&transformed);
        let file_name = fingerprint_name(name, hash, &integrity);

        fs::create_dir_all(&self.static_dir).map_err(BuildError::io(&self.static_dir))?;
        let out = self.static_dir.join(&file_name);
        fs::write(&out, &transformed).map_err(BuildError::io(&out))?;
        debug!("assets"; "{} -> {}", source.display(), file_name);

        Ok(ResolvedAsset {
            relative_path: format!("/static/{file_name}"),
            integrity,
        })
    }

    /// The global stylesheet bundle, built on first request.
    ///
    /// `web/global.css`, the default theme's `theme.css` and the active
    /// theme's `theme.css` are concatenated into `static/global.css`, which is
    /// then fingerprinted like any other asset.
    pub fn global_css(&self) -> Result<ResolvedAsset, BuildError> {
        let mut global = self.global.lock();
        if let Some(asset) = global.as_ref() {
            return Ok(asset.clone());
        }

        let mut bundle = String::new();
        for part in self.bundle_parts.iter().filter(|p| p.is_file()) {
            let css = fs::read_to_string(part).map_err(BuildError::io(part))?;
            if !bundle.is_empty() {
                bundle.push('\n');
            }
            bundle.push_str(&css);
        }

        let asset = if bundle.trim().is_empty() {
            ResolvedAsset::default()
        } else {
            fs::create_dir_all(&self.static_dir).map_err(BuildError::io(&self.static_dir))?;
            let path = self.static_dir.join(GLOBAL_CSS);
            fs::write(&path, bundle).map_err(BuildError::io(&path))?;
            self.resolve_file(&path, GLOBAL_CSS)?
        };
        *global = Some(asset.clone());
        Ok(asset)
    }
}

/// `{stem}.{hash[..6]}.{integrity[-6..]}.{ext}` with `/`, `=` and `+` removed.
fn fingerprint_name(name: &str, hash: &str, integrity: &str) -> String {
    let (stem, ext) = name.split_once('.').unwrap_or((name, ""));
    let short_hash = &hash[..hash.len().min(HASH_SLICE)];
    let short_sri = &integrity[integrity.len().saturating_sub(HASH_SLICE)..];
    let raw = if ext.is_empty() {
        format!("{stem}.{short_hash}.{short_sri}")
    } else {
        format!("{stem}.{short_hash}.{short_sri}.{ext}")
    };
    raw.replace(['/', '=', '+'], "")
}
