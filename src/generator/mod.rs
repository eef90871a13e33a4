//! Site generation.
//!
//! # Architecture
//!
//! ```text
//! BuildSession::generate()
//!     │
//!     ├── batch 1 ── index page 1 ∥ search page ∥ theme static copy
//!     │              (first render warms the global stylesheet)
//!     │
//!     ├── batch 2 ── index pages 2..n
//!     │
//!     └── batch 3 ── per changelog: entry page ∥ email
//! ```
//!
//! Every batch runs on a rayon pool sized by `[build] jobs`, so no more than
//! that many asset compilers are ever spawned at once. The first error aborts
//! the run; files already written stay.

pub mod paginate;

use crate::{
    assets::{AssetPipeline, AssetTransformer, ExternalTransformer},
    config::SiteConfig,
    data::{Changelog, ChangelogData, Site},
    debug,
    error::BuildError,
    log,
    logger::ProgressBars,
    template::{Base, RenderEnv, Renderer},
    theme::ThemeConfig,
    utils::minify::minify_page,
};
use anyhow::{Context, Result, anyhow, bail};
use paginate::{IndexPage, adjacency, page_file, paginate};
use rayon::prelude::*;
use serde_json::{Map, Value, json};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

const INDEX_TEMPLATE: &str = "index.html";
const PAGE_TEMPLATE: &str = "page.html";
const SEARCH_TEMPLATE: &str = "search.html";
const EMAIL_TEMPLATE: &str = "email.html";

type TransformerFactory = fn(&SiteConfig) -> Result<Box<dyn AssetTransformer>, BuildError>;

const POWERED_BY_IMAGE: &str = "https://cdn.changelog.so/images/misc/poweredBy.png";

/// Which emails an email-only run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTarget {
    /// `email/{id}.html` for every changelog.
    All,
    /// A single `email.html` for the given changelog, or the first one.
    Preview(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    /// Entry pages, index and search pages when `[build] index` is on, and
    /// emails when `[build] email` is on.
    Full,
    EmailOnly(EmailTarget),
}

impl BuildMode {
    pub fn from_config(config: &SiteConfig) -> Self {
        match &config.build.preview {
            Some(id) => Self::EmailOnly(EmailTarget::Preview(id.clone())),
            None if !config.build.index && config.build.email => Self::EmailOnly(EmailTarget::All),
            None => Self::Full,
        }
    }

    const fn web(&self) -> bool {
        matches!(self, Self::Full)
    }

    fn email(&self, config: &SiteConfig) -> bool {
        !self.web() || config.build.email
    }
}

/// Files written by one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub pages: usize,
    pub emails: usize,
}

/// One build run: compiled templates plus a cold asset cache.
///
/// Sessions are never reused; watch-mode rebuilds create a new one so that
/// every edited theme file is picked up.
pub struct BuildSession<'a> {
    config: &'a SiteConfig,
    mode: BuildMode,
    renderer: Renderer,
}

impl<'a> BuildSession<'a> {
    pub fn with_transformer(
        config: &'a SiteConfig,
        mode: BuildMode,
        transformer: Box<dyn AssetTransformer>,
    ) -> Result<Self> {
        let theme_dir = config.theme_dir();
        let theme = ThemeConfig::load(&theme_dir)
            .with_context(|| format!("failed to load theme at {}", theme_dir.display()))?;
        let assets = AssetPipeline::new(config, transformer);
        let env = Arc::new(RenderEnv::new(config, theme, assets));
        let mut renderer = Renderer::new(env)?;

        if mode.web() {
            renderer.compile_page(PAGE_TEMPLATE, Base::Web)?;
            if config.build.index {
                renderer.compile_page(INDEX_TEMPLATE, Base::Web)?;
                renderer.compile_page(SEARCH_TEMPLATE, Base::Web)?;
            }
        }
        if mode.email(config) {
            renderer.compile_page(EMAIL_TEMPLATE, Base::Email)?;
        }

        Ok(Self {
            config,
            mode,
            renderer,
        })
    }

    /// Render everything `mode` asks for into the output directory.
    pub fn generate(&self, data: &ChangelogData) -> Result<BuildReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs())
            .build()
            .map_err(|e| anyhow!("failed to create worker pool: {e}"))?;

        let output = &self.config.build.output;
        fs::create_dir_all(output)
            .with_context(|| format!("failed to create {}", output.display()))?;

        let report = pool.install(|| match &self.mode {
            BuildMode::Full => self.generate_full(data),
            BuildMode::EmailOnly(EmailTarget::All) => {
                self.generate_emails(data)?;
                Ok(BuildReport {
                    pages: 0,
                    emails: data.changelogs.len(),
                })
            }
            BuildMode::EmailOnly(EmailTarget::Preview(id)) => {
                self.generate_preview(data, id.as_deref())?;
                Ok(BuildReport { pages: 0, emails: 1 })
            }
        })?;

        let cache = self.renderer.env().assets.cache();
        if !cache.is_empty() {
            debug!("assets"; "{} distinct assets fingerprinted", cache.len());
        }
        log!("build"; "{} pages, {} emails in {}", report.pages, report.emails, output.display());
        Ok(report)
    }

    fn generate_full(&self, data: &ChangelogData) -> Result<BuildReport> {
        let index = self.config.build.index;
        let pages = if index { paginate(&data.changelogs) } else { Vec::new() };
        let emails = self.config.build.email;
        let entries = data.changelogs.len();
        let progress = ProgressBars::new(&[
            ("index", pages.len()),
            ("entry", entries),
            ("email", if emails { entries } else { 0 }),
        ]);
        let tick = |name: &str| {
            if let Some(progress) = &progress {
                progress.inc(name);
            }
        };

        let (first, rest) = pages.split_at(pages.len().min(1));

        // batch 1
        let ((first_page, search), copied) = rayon::join(
            || {
                rayon::join(
                    || first.iter().try_for_each(|page| self.write_index(&data.site, page)),
                    || if index { self.write_search(data) } else { Ok(()) },
                )
            },
            || copy_theme_static(&self.config.theme_dir(), &self.config.static_dir()),
        );
        first_page?;
        search?;
        let copied = copied?;
        if index {
            tick("index");
        }
        debug!("build"; "copied {copied} theme static files");

        // batch 2
        rest.par_iter().try_for_each(|page| {
            self.write_index(&data.site, page)?;
            tick("index");
            Ok::<_, BuildError>(())
        })?;

        // batch 3
        let email_dir = self.config.build.output.join("email");
        data.changelogs
            .par_iter()
            .enumerate()
            .try_for_each(|(i, changelog)| {
                let (page, email) = rayon::join(
                    || self.write_entry(data, i),
                    || {
                        if emails {
                            self.write_email(data, changelog, &email_dir.join(format!("{}.html", changelog.id)))
                        } else {
                            Ok(())
                        }
                    },
                );
                page?;
                tick("entry");
                email?;
                if emails {
                    tick("email");
                }
                Ok::<_, BuildError>(())
            })?;

        if let Some(progress) = &progress {
            progress.finish();
        }

        let search_pages = usize::from(index);
        Ok(BuildReport {
            pages: pages.len() + search_pages + entries,
            emails: if emails { entries } else { 0 },
        })
    }

    /// `email/{id}.html` for each changelog.
    fn generate_emails(&self, data: &ChangelogData) -> Result<()> {
        let email_dir = self.config.build.output.join("email");
        data.changelogs
            .par_iter()
            .try_for_each(|changelog| {
                self.write_email(data, changelog, &email_dir.join(format!("{}.html", changelog.id)))
            })?;
        Ok(())
    }

    fn generate_preview(&self, data: &ChangelogData, id: Option<&str>) -> Result<()> {
        let changelog = match id {
            Some(id) => data.changelogs.iter().find(|c| c.id == id),
            None => data.changelogs.first(),
        };
        let Some(changelog) = changelog else {
            bail!(
                "no changelog {} to preview",
                id.map_or_else(|| "entries".to_string(), |id| format!("with id {id}"))
            );
        };
        let out = self.config.build.output.join(EMAIL_TEMPLATE);
        self.write_email(data, changelog, &out)?;
        log!("email"; "preview of {} written to {}", changelog.id, out.display());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Page writers
    // ------------------------------------------------------------------------

    fn write_index(&self, site: &Site, page: &IndexPage<'_, Changelog>) -> Result<(), BuildError> {
        let pagination = &page.pagination;
        let url = match pagination.page {
            1 => site.url.clone(),
            _ => format!("{}{}", site.url, pagination.url),
        };
        let context = self.context(json!({
            "site": site,
            "changelogs": page.items,
            "url": url,
            "pagination": pagination,
        }))?;
        let html = self.renderer.render(INDEX_TEMPLATE, Base::Web, &context)?;
        self.write_web(&self.config.build.output.join(page_file(pagination.page)), &html)
    }

    fn write_search(&self, data: &ChangelogData) -> Result<(), BuildError> {
        let context = self.context(json!({
            "site": data.site,
            "changelogs": [search_placeholder(&data.site.id)],
            "search": true,
            "url": data.site.url,
        }))?;
        let html = self.renderer.render(SEARCH_TEMPLATE, Base::Web, &context)?;
        self.write_web(&self.config.build.output.join(SEARCH_TEMPLATE), &html)
    }

    fn write_entry(&self, data: &ChangelogData, index: usize) -> Result<(), BuildError> {
        let changelog = &data.changelogs[index];
        let (previous, next) = adjacency(&data.changelogs, index);
        let context = self.context(json!({
            "site": data.site,
            "changelog": changelog,
            "url": changelog.url,
            "previous": previous,
            "next": next,
        }))?;
        let html = self.renderer.render(PAGE_TEMPLATE, Base::Web, &context)?;
        let out = self
            .config
            .build
            .output
            .join("entry")
            .join(format!("{}.html", changelog.id));
        self.write_web(&out, &html)
    }

    fn write_email(&self, data: &ChangelogData, changelog: &Changelog, out: &Path) -> Result<(), BuildError> {
        let context = self.context(json!({
            "site": data.site,
            "changelog": changelog,
            "changelogs": data.changelogs,
            "url": changelog.url,
            "manageSubscriptionLink": "__MANAGE_SUBSCRIPTION_LINK__",
            "unsubscribeLink": "__UNSUBSCRIBE_LINK__",
            "poweredByImage": POWERED_BY_IMAGE,
            "poweredByLink": "__POWEREDBY_LINK__",
        }))?;
        let html = self.renderer.render(EMAIL_TEMPLATE, Base::Email, &context)?;
        write_file(out, html.as_bytes())?;
        debug!("email"; "generated {}", out.display());
        Ok(())
    }

    /// Page context with the session globals layered on top.
    fn context(&self, page: Value) -> Result<Value, BuildError> {
        let mut context = match page {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        context.extend(self.renderer.env().globals()?);
        Ok(Value::Object(context))
    }

    fn write_web(&self, out: &Path, html: &str) -> Result<(), BuildError> {
        write_file(out, &minify_page(html.as_bytes(), self.config))?;
        debug!("build"; "generated {}", out.display());
        Ok(())
    }
}

/// Changelog shape the search page template is rendered against.
fn search_placeholder(site_id: &str) -> Value {
    json!({
        "id": "__PLACEHOLDER_ID__",
        "title": "__PLACEHOLDER_TITLE__",
        "headline": "__PLACEHOLDER_HEADLINE__",
        "dateAt": chrono::Utc::now().timestamp_millis(),
        "site_id": site_id,
        "cover_image": "https://changelog.so",
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(BuildError::io(parent))?;
    }
    fs::write(path, bytes).map_err(BuildError::io(path))
}

/// Mirror `{theme}/static/` into the output's `static/`. Returns files copied.
fn copy_theme_static(theme_dir: &Path, static_dir: &Path) -> Result<usize, BuildError> {
    let source = theme_dir.join("static");
    if !source.is_dir() {
        return Ok(0);
    }

    let mut copied = 0;
    for entry in WalkDir::new(&source).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&source) else {
            continue;
        };
        let dest: PathBuf = static_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(BuildError::io(parent))?;
        }
        fs::copy(entry.path(), &dest).map_err(BuildError::io(entry.path()))?;
        copied += 1;
    }
    Ok(copied)
}

/// The configured CSS compiler and JS compressor.
fn external_transformer(config: &SiteConfig) -> Result<Box<dyn AssetTransformer>, BuildError> {
    Ok(Box::new(ExternalTransformer::new(config)?))
}

/// Load input data and run one full-config build.
pub fn build_site(config: &SiteConfig) -> Result<BuildReport> {
    build_site_with(config, external_transformer)
}

fn build_site_with(config: &SiteConfig, transformer: TransformerFactory) -> Result<BuildReport> {
    let data = crate::data::load(config)?;
    let session =
        BuildSession::with_transformer(config, BuildMode::from_config(config), transformer(config)?)?;
    session.generate(&data)
}

/// Re-render emails only, from the snapshot the last full build wrote.
pub fn rebuild_emails(config: &SiteConfig) -> Result<BuildReport> {
    rebuild_emails_with(config, external_transformer)
}

fn rebuild_emails_with(config: &SiteConfig, transformer: TransformerFactory) -> Result<BuildReport> {
    let snapshot = config.snapshot_path();
    let data = ChangelogData::from_path(&snapshot)
        .with_context(|| format!("email rebuild needs {}", snapshot.display()))?;
    let mode = BuildMode::EmailOnly(EmailTarget::All);
    let session = BuildSession::with_transformer(config, mode, transformer(config)?)?;
    session.generate(&data)
}
