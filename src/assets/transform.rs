//! Asset transformers.
//!
//! `.css` goes through the utility-CSS compiler, `.js` through the script
//! compressor; both are external programs. Tests swap in their own
//! [`AssetTransformer`].

use crate::{
    config::SiteConfig,
    debug,
    error::BuildError,
    exec,
    utils::exec::{EMPTY_FILTER, TAILWIND_FILTER},
};
use parking_lot::Mutex;
use std::{
    fs,
    path::{Path, PathBuf},
};

const GENERATED_CONFIG: &str = "tailwind.generated.config.js";
const NODE_MODULES: &str = "node_modules";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Js,
    /// Copied through unchanged.
    Other,
}

impl AssetKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("css") => Self::Css,
            Some(ext) if ext.eq_ignore_ascii_case("js") => Self::Js,
            _ => Self::Other,
        }
    }
}

/// Turns a source asset into the bytes that get fingerprinted and written.
pub trait AssetTransformer: Send + Sync {
    fn transform(&self, kind: AssetKind, source: &Path) -> Result<Vec<u8>, BuildError>;
}

/// Runs the configured `[css]` and `[js]` commands.
pub struct ExternalTransformer {
    css_command: Vec<String>,
    js_command: Vec<String>,
    work_dir: PathBuf,
    node_modules: Option<PathBuf>,
    manifest: ContentManifest,
    /// One CSS compile at a time: they share the manifest and the link.
    css_lock: Mutex<()>,
}

impl ExternalTransformer {
    pub fn new(config: &SiteConfig) -> Result<Self, BuildError> {
        let work_dir = config.build.output.clone();
        fs::create_dir_all(&work_dir).map_err(BuildError::io(&work_dir))?;
        let manifest = ContentManifest::write(
            &work_dir,
            config.css.config.as_deref(),
            &content_globs(config),
        )?;

        Ok(Self {
            css_command: config.css.command.clone(),
            js_command: config.js.command.clone(),
            work_dir,
            node_modules: config.css.node_modules.clone(),
            manifest,
            css_lock: Mutex::new(()),
        })
    }

    fn compile_css(&self, source: &Path) -> Result<Vec<u8>, BuildError> {
        let _serial = self.css_lock.lock();
        let _link = NodeModulesLink::acquire(self.node_modules.as_deref(), &self.work_dir)?;

        debug!("css"; "compiling {}", source.display());
        let output = exec!(
            filter=&TAILWIND_FILTER; cwd=self.work_dir.as_path(); &self.css_command;
            "-i", source, "-c", self.manifest.path(), "--minify"
        )
        .map_err(|e| transform_error(source, &e))?;
        Ok(output.stdout)
    }

    fn compress_js(&self, source: &Path) -> Result<Vec<u8>, BuildError> {
        debug!("js"; "compressing {}", source.display());
        let output = exec!(filter=&EMPTY_FILTER; cwd=self.work_dir.as_path(); &self.js_command; source)
            .map_err(|e| transform_error(source, &e))?;
        Ok(output.stdout)
    }
}

impl AssetTransformer for ExternalTransformer {
    fn transform(&self, kind: AssetKind, source: &Path) -> Result<Vec<u8>, BuildError> {
        match kind {
            AssetKind::Css => self.compile_css(source),
            AssetKind::Js => self.compress_js(source),
            AssetKind::Other => fs::read(source).map_err(BuildError::io(source)),
        }
    }
}

fn transform_error(source: &Path, err: &anyhow::Error) -> BuildError {
    BuildError::AssetTransform {
        path: source.to_path_buf(),
        message: format!("{err:#}"),
    }
}

/// Globs the CSS compiler scans for used classes.
pub fn content_globs(config: &SiteConfig) -> Vec<String> {
    let web = config.web_dir();
    let theme = config.theme_dir();
    let web_globs = ["*.html", "*.css", "*.hbs", "*.js"].map(|g| web.join(g));
    let theme_globs = ["*.css", "*.hbs", "*.html"].map(|g| theme.join(g));
    web_globs
        .iter()
        .chain(&theme_globs)
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

// ============================================================================
// Content-scan manifest
// ============================================================================

/// Generated compiler config: the base config with `content` replaced.
///
/// Removed from the output directory when dropped.
pub struct ContentManifest {
    path: PathBuf,
}

impl ContentManifest {
    pub fn write(dir: &Path, base: Option<&Path>, globs: &[String]) -> Result<Self, BuildError> {
        let path = dir.join(GENERATED_CONFIG);
        fs::write(&path, Self::render(base, globs)).map_err(BuildError::io(&path))?;
        debug!("css"; "wrote {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(base: Option<&Path>, globs: &[String]) -> String {
        let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""));
        let content = globs
            .iter()
            .map(|g| format!("    {},", quote(g)))
            .collect::<Vec<_>>()
            .join("\n");
        let spread = base.map_or_else(String::new, |b| {
            format!("  ...require({}),\n", quote(&b.to_string_lossy()))
        });
        format!("module.exports = {{\n{spread}  content: [\n{content}\n  ],\n}};\n")
    }
}

impl Drop for ContentManifest {
    fn drop(&mut self) {
        fs::remove_file(&self.path).ok();
    }
}

// ============================================================================
// node_modules link
// ============================================================================

/// `{work_dir}/node_modules` pointing at the configured dependency directory,
/// so the compiler can resolve plugins required by the generated config.
///
/// Removed when dropped, including on error paths.
pub struct NodeModulesLink {
    link: PathBuf,
}

impl NodeModulesLink {
    /// `Ok(None)` when no directory is configured or a real `node_modules`
    /// already sits in `work_dir`.
    pub fn acquire(target: Option<&Path>, work_dir: &Path) -> Result<Option<Self>, BuildError> {
        let Some(target) = target else {
            return Ok(None);
        };
        let link = work_dir.join(NODE_MODULES);

        match fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => remove_link(&link)?,
            Ok(_) => return Ok(None),
            Err(_) => {}
        }

        let target = target.canonicalize().map_err(BuildError::io(target))?;
        create_link(&target, &link)?;
        Ok(Some(Self { link }))
    }
}

impl Drop for NodeModulesLink {
    fn drop(&mut self) {
        remove_link(&self.link).ok();
    }
}

#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> Result<(), BuildError> {
    std::os::unix::fs::symlink(target, link).map_err(BuildError::io(link))
}

#[cfg(windows)]
fn create_link(target: &Path, link: &Path) -> Result<(), BuildError> {
    std::os::windows::fs::symlink_dir(target, link).map_err(BuildError::io(link))
}

#[cfg(unix)]
fn remove_link(link: &Path) -> Result<(), BuildError> {
    fs::remove_file(link).map_err(BuildError::io(link))
}

#[cfg(windows)]
fn remove_link(link: &Path) -> Result<(), BuildError> {
    fs::remove_dir(link).map_err(BuildError::io(link))
}
