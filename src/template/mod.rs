//! Template lookup and rendering.
//!
//! Theme templates are Handlebars files spread over three roots: the active
//! theme directory, the base source tree (`web/` or `email/`) and the legacy
//! `theme/default/` directory. [`TemplateResolver`] decides which file wins;
//! [`Renderer`] owns the registry with the helper table installed.

pub mod helpers;

use crate::{
    assets::AssetPipeline,
    config::SiteConfig,
    debug,
    error::BuildError,
    theme::ThemeConfig,
};
use handlebars::{Handlebars, RenderError, RenderErrorReason};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, ThreadId},
};

/// Prefix of includes written against the pre-`web/` layout.
const LEGACY_INCLUDE_PREFIX: &str = "../../";

/// Template category; selects the default source subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    Web,
    Email,
}

impl Base {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Email => "email",
        }
    }

    /// `base=` hash argument of `include`: anything but `email` means web.
    pub fn from_hash(value: Option<&str>) -> Self {
        match value {
            Some("email") => Self::Email,
            _ => Self::Web,
        }
    }
}

/// A resolved include and whether it came from a theme override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInclude {
    pub path: PathBuf,
    pub is_override: bool,
}

pub struct TemplateResolver {
    theme_dir: PathBuf,
    web_dir: PathBuf,
    email_dir: PathBuf,
    legacy_dir: PathBuf,
    sources: Mutex<FxHashMap<PathBuf, Arc<str>>>,
}

impl TemplateResolver {
    pub fn new(config: &SiteConfig) -> Self {
        Self {
            theme_dir: config.theme_dir(),
            web_dir: config.web_dir(),
            email_dir: config.email_dir(),
            legacy_dir: config.legacy_theme_dir(),
            sources: Mutex::new(FxHashMap::default()),
        }
    }

    fn base_dir(&self, base: Base) -> &Path {
        match base {
            Base::Web => &self.web_dir,
            Base::Email => &self.email_dir,
        }
    }

    /// Candidates for a top-level page template, in priority order.
    fn page_candidates(&self, name: &str, base: Base) -> Vec<PathBuf> {
        vec![
            self.theme_dir.join(name),
            self.base_dir(base).join(name),
            self.legacy_dir.join(name),
        ]
    }

    /// Candidates for `{{include src=... base=...}}`, in priority order.
    ///
    /// The theme override `{base}_{src}` is skipped when the include is
    /// rendered from inside an override, so an override can include the
    /// default it replaces.
    fn include_candidates(&self, src: &str, base: Base, inside_override: bool) -> Vec<(PathBuf, bool)> {
        let mut candidates = Vec::with_capacity(4);
        if !inside_override {
            candidates.push((self.theme_dir.join(format!("{}_{src}", base.as_str())), true));
        }
        candidates.push((self.base_dir(base).join(src), false));
        candidates.push((self.legacy_dir.join(src), false));
        if let Some(rest) = src.strip_prefix(LEGACY_INCLUDE_PREFIX) {
            candidates.push((self.web_dir.join(rest), false));
        }
        candidates
    }

    pub fn resolve_page(&self, name: &str, base: Base) -> Result<PathBuf, BuildError> {
        let candidates = self.page_candidates(name, base);
        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(BuildError::TemplateNotFound {
                name: name.to_string(),
                searched: candidates,
            }),
        }
    }

    pub fn resolve_include(
        &self,
        src: &str,
        base: Base,
        inside_override: bool,
    ) -> Result<ResolvedInclude, BuildError> {
        let candidates = self.include_candidates(src, base, inside_override);
        match candidates.iter().find(|(path, _)| path.is_file()) {
            Some((path, is_override)) => Ok(ResolvedInclude {
                path: path.clone(),
                is_override: *is_override,
            }),
            None => Err(BuildError::TemplateNotFound {
                name: src.to_string(),
                searched: candidates.into_iter().map(|(path, _)| path).collect(),
            }),
        }
    }

    /// Template source, read once per session.
    pub fn source(&self, path: &Path) -> Result<Arc<str>, BuildError> {
        if let Some(source) = self.sources.lock().get(path) {
            return Ok(Arc::clone(source));
        }
        let source: Arc<str> = fs::read_to_string(path)
            .map_err(BuildError::io(path))?
            .into();
        self.sources
            .lock()
            .insert(path.to_path_buf(), Arc::clone(&source));
        Ok(source)
    }
}

/// State shared by the helpers of one build session.
pub struct RenderEnv {
    pub resolver: TemplateResolver,
    pub assets: AssetPipeline,
    pub theme: ThemeConfig,
    pub api_host: String,
    /// Typed helper failures, keyed by the thread running the render.
    failures: Mutex<FxHashMap<ThreadId, BuildError>>,
}

impl RenderEnv {
    pub fn new(config: &SiteConfig, theme: ThemeConfig, assets: AssetPipeline) -> Self {
        Self {
            resolver: TemplateResolver::new(config),
            assets,
            theme,
            api_host: config.source.host.clone(),
            failures: Mutex::new(FxHashMap::default()),
        }
    }

    /// Values every template sees: the global stylesheet href and digest.
    pub fn globals(&self) -> Result<Map<String, Value>, BuildError> {
        let global = self.assets.global_css()?;
        let mut globals = Map::new();
        globals.insert("GLOBAL_CSS_HREF".into(), Value::String(global.relative_path));
        globals.insert("GLOBAL_CSS_SHA".into(), Value::String(global.integrity));
        Ok(globals)
    }

    /// Keep a typed helper failure so it survives the trip through handlebars.
    ///
    /// Renders never hop threads, so the current thread identifies the page.
    pub fn fail(&self, err: BuildError) -> RenderError {
        let message = err.to_string();
        self.failures.lock().entry(thread::current().id()).or_insert(err);
        RenderErrorReason::Other(message).into()
    }

    fn take_failure(&self) -> Option<BuildError> {
        self.failures.lock().remove(&thread::current().id())
    }
}

/// Handlebars registry for one session with all helpers installed.
pub struct Renderer {
    registry: Handlebars<'static>,
    env: Arc<RenderEnv>,
}

impl Renderer {
    pub fn new(env: Arc<RenderEnv>) -> Result<Self, BuildError> {
        let mut registry = Handlebars::new();
        helpers::register(&mut registry, &env).map_err(|message| BuildError::Render {
            template: "<helpers>".into(),
            message,
        })?;
        Ok(Self { registry, env })
    }

    pub fn env(&self) -> &Arc<RenderEnv> {
        &self.env
    }

    fn key(name: &str, base: Base) -> String {
        format!("{}/{name}", base.as_str())
    }

    /// Resolve and compile a top-level template.
    pub fn compile_page(&mut self, name: &str, base: Base) -> Result<(), BuildError> {
        let path = self.env.resolver.resolve_page(name, base)?;
        let source = self.env.resolver.source(&path)?;
        debug!("template"; "{} -> {}", Self::key(name, base), path.display());
        self.registry
            .register_template_string(&Self::key(name, base), &*source)
            .map_err(|e| BuildError::Render {
                template: path.display().to_string(),
                message: e.to_string(),
            })
    }

    pub fn render(&self, name: &str, base: Base, context: &Value) -> Result<String, BuildError> {
        let key = Self::key(name, base);
        // a failure left by a render whose error was swallowed must not leak into this one
        self.env.take_failure();
        self.registry.render(&key, context).map_err(|err| {
            self.env.take_failure().unwrap_or_else(|| BuildError::Render {
                template: key,
                message: err.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::{CountingTransformer, pipeline_for};
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    /// Source tree with `web/`, `email/` and `theme/default/`, plus a separate theme dir.
    fn fixture() -> (TempDir, SiteConfig) {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        for sub in ["web", "email", "theme/default"] {
            fs::create_dir_all(src.join(sub)).unwrap();
        }
        let theme = dir.path().join("mytheme");
        fs::create_dir_all(&theme).unwrap();

        let mut config = SiteConfig::default();
        config.build.source = src;
        config.build.theme = Some(theme);
        config.build.output = dir.path().join("dist");
        (dir, config)
    }

    fn renderer(config: &SiteConfig) -> Renderer {
        let (assets, _) = pipeline_for(config, CountingTransformer::default());
        let env = RenderEnv::new(config, ThemeConfig::default(), assets);
        Renderer::new(Arc::new(env)).unwrap()
    }

    #[test]
    fn test_base_from_hash() {
        assert_eq!(Base::from_hash(None), Base::Web);
        assert_eq!(Base::from_hash(Some("web")), Base::Web);
        assert_eq!(Base::from_hash(Some("email")), Base::Email);
    }

    #[test]
    fn test_page_prefers_theme_then_base_then_legacy() {
        let (_dir, config) = fixture();
        let resolver = TemplateResolver::new(&config);

        fs::write(config.legacy_theme_dir().join("index.html"), "legacy").unwrap();
        assert_eq!(
            resolver.resolve_page("index.html", Base::Web).unwrap(),
            config.legacy_theme_dir().join("index.html")
        );

        fs::write(config.web_dir().join("index.html"), "web").unwrap();
        assert_eq!(
            resolver.resolve_page("index.html", Base::Web).unwrap(),
            config.web_dir().join("index.html")
        );

        fs::write(config.theme_dir().join("index.html"), "theme").unwrap();
        assert_eq!(
            resolver.resolve_page("index.html", Base::Web).unwrap(),
            config.theme_dir().join("index.html")
        );
    }

    #[test]
    fn test_missing_template_lists_all_candidates() {
        let (_dir, config) = fixture();
        let resolver = TemplateResolver::new(&config);

        let err = resolver.resolve_include("nav.hbs", Base::Email, false).unwrap_err();
        match err {
            BuildError::TemplateNotFound { name, searched } => {
                assert_eq!(name, "nav.hbs");
                assert_eq!(searched.len(), 3);
                assert_eq!(searched[0], config.theme_dir().join("email_nav.hbs"));
                assert_eq!(searched[1], config.email_dir().join("nav.hbs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_override_single_hop_guard() {
        let (_dir, config) = fixture();
        let resolver = TemplateResolver::new(&config);
        fs::write(config.web_dir().join("page.html"), "default").unwrap();
        fs::write(config.theme_dir().join("web_page.html"), "override").unwrap();

        let outer = resolver.resolve_include("page.html", Base::Web, false).unwrap();
        assert!(outer.is_override);
        assert_eq!(outer.path, config.theme_dir().join("web_page.html"));

        let inner = resolver.resolve_include("page.html", Base::Web, true).unwrap();
        assert!(!inner.is_override);
        assert_eq!(inner.path, config.web_dir().join("page.html"));
    }

    #[test]
    fn test_legacy_relative_include_rewrite() {
        let (_dir, config) = fixture();
        let resolver = TemplateResolver::new(&config);
        fs::write(config.web_dir().join("footer.hbs"), "footer").unwrap();

        let resolved = resolver.resolve_include("../../footer.hbs", Base::Email, false).unwrap();
        assert_eq!(resolved.path, config.web_dir().join("footer.hbs"));
    }

    #[test]
    fn test_source_is_cached() {
        let (_dir, config) = fixture();
        let resolver = TemplateResolver::new(&config);
        let path = config.web_dir().join("a.hbs");
        fs::write(&path, "first").unwrap();

        assert_eq!(&*resolver.source(&path).unwrap(), "first");
        fs::write(&path, "second").unwrap();
        assert_eq!(&*resolver.source(&path).unwrap(), "first");
    }

    #[test]
    fn test_render_override_includes_its_default() {
        let (_dir, config) = fixture();
        fs::write(
            config.web_dir().join("index.html"),
            r#"<main>{{include src="card.hbs" title=site.id}}</main>"#,
        )
        .unwrap();
        fs::write(config.web_dir().join("card.hbs"), "<p>{{title}}</p>").unwrap();
        fs::write(
            config.theme_dir().join("web_card.hbs"),
            r#"<div class="themed">{{include src="card.hbs" title=title}}</div>"#,
        )
        .unwrap();

        let mut renderer = renderer(&config);
        renderer.compile_page("index.html", Base::Web).unwrap();
        let html = renderer
            .render("index.html", Base::Web, &json!({ "site": { "id": "acme" } }))
            .unwrap();

        assert_eq!(html, r#"<main><div class="themed"><p>acme</p></div></main>"#);
    }

    #[test]
    fn test_render_surfaces_typed_include_failure() {
        let (_dir, config) = fixture();
        fs::write(config.web_dir().join("index.html"), r#"{{include src="missing.hbs"}}"#).unwrap();

        let mut renderer = renderer(&config);
        renderer.compile_page("index.html", Base::Web).unwrap();
        let err = renderer.render("index.html", Base::Web, &json!({})).unwrap_err();

        assert!(matches!(err, BuildError::TemplateNotFound { ref name, .. } if name == "missing.hbs"));
    }

    #[test]
    fn test_failure_stays_with_its_render() {
        let (_dir, config) = fixture();
        fs::write(config.web_dir().join("index.html"), "{{first name}}").unwrap();
        let mut renderer = renderer(&config);
        renderer.compile_page("index.html", Base::Web).unwrap();
        let stray = || BuildError::Render {
            template: "other".into(),
            message: "stray".into(),
        };

        let env = Arc::clone(renderer.env());
        thread::spawn(move || {
            let _ = env.fail(stray());
        })
        .join()
        .unwrap();
        let _ = renderer.env().fail(stray());

        let err = renderer
            .render("index.html", Base::Web, &json!({ "name": "x" }))
            .unwrap_err();
        assert!(
            matches!(err, BuildError::Render { ref template, .. } if template == "web/index.html"),
            "{err}"
        );
    }

    #[test]
    fn test_compile_page_missing() {
        let (_dir, config) = fixture();
        let mut renderer = renderer(&config);
        let err = renderer.compile_page("search.html", Base::Web).unwrap_err();
        assert!(matches!(err, BuildError::TemplateNotFound { .. }));
    }
}
