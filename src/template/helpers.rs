//! Handlebars helpers available to themes.
//!
//! The full set is a static table registered when the session's renderer is
//! built; a duplicate name fails the build before anything is rendered.
//! Helpers producing markup write raw output, value helpers return JSON so
//! they also work as subexpressions (`{{#each (after changelogs 1)}}`).

use super::{Base, RenderEnv};
use chrono::{DateTime, Utc};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, Renderable, ScopedJson, handlebars_helper,
};
use reqwest::Url;
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use std::{cmp::Ordering, sync::Arc};

type BoxedHelper = Box<dyn HelperDef + Send + Sync + 'static>;
type HelperFactory = fn(&Arc<RenderEnv>) -> BoxedHelper;

const COVER_WIDTH: &str = "1200";
const COVER_HEIGHT: &str = "628";

const THEME_SWITCHER: &str = r#"if (
        localStorage.theme === "dark" ||
        (!("theme" in localStorage) &&
          window.matchMedia("(prefers-color-scheme: dark)").matches)
      ) {
        document.documentElement.classList.add("dark");
      } else {
        document.documentElement.classList.remove("dark");
      }"#;

static HELPERS: &[(&str, HelperFactory)] = &[
    ("include", |env: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Include(Arc::clone(env))) }),
    ("script", |env: &Arc<RenderEnv>| -> BoxedHelper { Box::new(AssetTag::script(env)) }),
    ("css", |env: &Arc<RenderEnv>| -> BoxedHelper { Box::new(AssetTag::stylesheet(env)) }),
    ("stylesheet", |env: &Arc<RenderEnv>| -> BoxedHelper { Box::new(AssetTag::stylesheet(env)) }),
    ("global-js", |env: &Arc<RenderEnv>| -> BoxedHelper { Box::new(GlobalJs(Arc::clone(env))) }),
    ("analytics-js", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(analytics_js) }),
    ("iso_date", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(iso_date) }),
    ("friendly-date", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(friendly_date) }),
    ("cover_image_url", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(CoverImageUrl) }),
    ("author", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(author) }),
    ("twitter_handle", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(twitter_handle) }),
    ("pathname", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Pathname) }),
    ("first", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(first) }),
    ("last", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(last) }),
    ("len", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(len) }),
    ("empty", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(empty) }),
    ("after", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(After) }),
    ("pick", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Pick) }),
    ("add", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Arithmetic(ArithOp::Add)) }),
    ("subtract", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Arithmetic(ArithOp::Subtract)) }),
    ("eq", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Compare::new(|a, b| a == b)) }),
    ("gt", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Compare::ordered(Ordering::is_gt)) }),
    ("gte", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Compare::ordered(Ordering::is_ge)) }),
    ("lt", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Compare::ordered(Ordering::is_lt)) }),
    ("lte", |_: &Arc<RenderEnv>| -> BoxedHelper { Box::new(Compare::ordered(Ordering::is_le)) }),
];

/// Install every helper into `registry`.
pub fn register(registry: &mut Handlebars<'static>, env: &Arc<RenderEnv>) -> Result<(), String> {
    validate_table(HELPERS.iter().map(|(name, _)| *name))?;
    for (name, factory) in HELPERS {
        registry.register_helper(name, factory(env));
    }
    Ok(())
}

fn validate_table<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = FxHashSet::default();
    for name in names {
        if !seen.insert(name) {
            return Err(format!("helper `{name}` is registered twice"));
        }
    }
    Ok(())
}

fn other(message: impl Into<String>) -> RenderError {
    RenderErrorReason::Other(message.into()).into()
}

fn param<'a>(h: &'a Helper<'_>, index: usize, helper: &'static str) -> Result<&'a Value, RenderError> {
    h.param(index)
        .map(|p| p.value())
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex(helper, index).into())
}

fn root_str<'a>(ctx: &'a Context, pointer: &str) -> &'a str {
    ctx.data().pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

// ============================================================================
// Markup helpers
// ============================================================================

/// `{{include src="nav.hbs" base="web" context=obj key=value}}`
struct Include(Arc<RenderEnv>);

impl HelperDef for Include {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let env = &self.0;
        let src = h
            .hash_get("src")
            .and_then(|v| v.value().as_str())
            .ok_or_else(|| other("include requires a `src` argument"))?;
        let base = Base::from_hash(h.hash_get("base").and_then(|v| v.value().as_str()));
        let inside_override = ctx
            .data()
            .get("insideOverride")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = env
            .resolver
            .resolve_include(src, base, inside_override)
            .map_err(|e| env.fail(e))?;
        let source = env.resolver.source(&resolved.path).map_err(|e| env.fail(e))?;

        let mut context = match ctx.data() {
            Value::Object(root) => root.clone(),
            _ => Map::new(),
        };
        if let Some(Value::Object(extra)) = h.hash_get("context").map(|v| v.value()) {
            context.extend(extra.clone());
        }
        context.extend(env.globals().map_err(|e| env.fail(e))?);
        context.insert("insideOverride".into(), Value::Bool(resolved.is_override));
        for (key, value) in h.hash() {
            if *key != "src" && *key != "context" {
                context.insert((*key).to_string(), value.value().clone());
            }
        }

        let rendered = r.render_template(&source, &Value::Object(context))?;
        out.write(&rendered)?;
        Ok(())
    }
}

/// `{{script "app.js"}}` / `{{css "extra.css"}}`
///
/// `stylesheet` is registered as an alias of `css`.
struct AssetTag {
    env: Arc<RenderEnv>,
    kind: TagKind,
}

#[derive(Clone, Copy)]
enum TagKind {
    Script,
    Stylesheet,
}

impl AssetTag {
    fn script(env: &Arc<RenderEnv>) -> Self {
        Self {
            env: Arc::clone(env),
            kind: TagKind::Script,
        }
    }

    fn stylesheet(env: &Arc<RenderEnv>) -> Self {
        Self {
            env: Arc::clone(env),
            kind: TagKind::Stylesheet,
        }
    }
}

impl HelperDef for AssetTag {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let name = h.name();
        let href = param(h, 0, "asset tag")?
            .as_str()
            .ok_or_else(|| other(format!("{name} expects an href string")))?;
        let asset = self.env.assets.resolve(href).map_err(|e| self.env.fail(e))?;
        if asset.is_empty() {
            return Ok(());
        }

        let tag = match self.kind {
            TagKind::Script => format!(
                r#"<script src="{}" integrity="{}" async defer crossorigin="anonymous"></script>"#,
                asset.relative_path, asset.integrity
            ),
            TagKind::Stylesheet => format!(
                r#"<link rel="stylesheet" href="{}" integrity="{}" crossorigin="anonymous">"#,
                asset.relative_path, asset.integrity
            ),
        };
        out.write(&tag)?;
        Ok(())
    }
}

/// Inline bootstrap script exposing the API host and page ids.
struct GlobalJs(Arc<RenderEnv>);

impl HelperDef for GlobalJs {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let root = ctx.data();
        let site_id = root_str(ctx, "/site/id");
        let changelog_id = root_str(ctx, "/changelog/id");
        let changelog_ids: Vec<&str> = match root.get("changelogs").and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(|c| c.get("id").and_then(Value::as_str))
                .collect(),
            None => vec![changelog_id],
        };
        let ids = serde_json::to_string(&changelog_ids).map_err(|e| other(e.to_string()))?;
        let preamble = if self.0.theme.web.features.theme_switcher {
            THEME_SWITCHER
        } else {
            ""
        };

        out.write(&format!(
            r#"<script>
    {preamble}
    window.apiURL = "{}";
    window.siteId = "{site_id}";
    window.changelogId = "{changelog_id}";
    window.changelogIds = {ids};
  </script>"#,
            self.0.api_host
        ))?;
        Ok(())
    }
}

fn analytics_js<'reg, 'rc>(
    h: &Helper<'rc>,
    _: &'reg Handlebars<'reg>,
    _: &'rc Context,
    _: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
) -> HelperResult {
    let arg = |i| h.param(i).map(|p| display_value(p.value())).unwrap_or_default();
    out.write(&format!(
        r#"<script async defer src="/a.js" data-site-id="{}" data-id="{}"></script>"#,
        arg(0),
        arg(1)
    ))?;
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Locale-neutral short date (`M/D/YYYY`) in UTC.
fn friendly_date<'reg, 'rc>(
    h: &Helper<'rc>,
    _: &'reg Handlebars<'reg>,
    _: &'rc Context,
    _: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
) -> HelperResult {
    let date = parse_date(param(h, 0, "friendly-date")?)
        .ok_or_else(|| other("friendly-date expects a timestamp or ISO date"))?;
    out.write(&date.format("%-m/%-d/%Y").to_string())?;
    Ok(())
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

// ============================================================================
// Value helpers
// ============================================================================

handlebars_helper!(iso_date: |v: Json| {
    let date = match v {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    date.unwrap_or_else(Utc::now)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
});

handlebars_helper!(author: |changelog: Json| {
    changelog
        .get("authors")
        .and_then(Value::as_array)
        .map(|authors| {
            authors
                .iter()
                .map(|a| {
                    let name = |key: &str| a.get(key).map(display_value).unwrap_or_default();
                    format!("{} {}", name("firstName"), name("lastName"))
                })
                .collect::<Vec<_>>()
                .join(" and ")
        })
        .unwrap_or_default()
});

handlebars_helper!(twitter_handle: |url: str| {
    if url.starts_with('@') || !url.contains("twitter.com/") {
        url.to_string()
    } else {
        Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next().map(|s| format!("@{s}")))
            })
            .unwrap_or_else(|| url.to_string())
    }
});

handlebars_helper!(first: |list: array| list.first().cloned().unwrap_or(Value::Null));
handlebars_helper!(last: |list: array| list.last().cloned().unwrap_or(Value::Null));

handlebars_helper!(len: |v: Json| v.as_array().map_or(0, Vec::len));
handlebars_helper!(empty: |v: Json| v.as_array().is_none_or(Vec::is_empty));

/// Cover image URL resized for social cards (`rw=1200&rh=628`).
struct CoverImageUrl;

impl HelperDef for CoverImageUrl {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let cover = param(h, 0, "cover_image_url")?
            .get("cover_image")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let Some(cover) = cover else {
            return Ok(());
        };

        let mut url = Url::parse(cover).map_err(|e| other(format!("invalid cover image `{cover}`: {e}")))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "rw" && k != "rh")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("rw", COVER_WIDTH)
            .append_pair("rh", COVER_HEIGHT);
        out.write(url.as_str())?;
        Ok(())
    }
}

struct Pathname;

impl HelperDef for Pathname {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let raw = param(h, 0, "pathname")?.as_str().unwrap_or_default();
        let url = Url::parse(raw).map_err(|e| other(format!("invalid url `{raw}`: {e}")))?;
        Ok(ScopedJson::Derived(Value::String(url.path().to_string())))
    }
}

fn array_param<'a>(h: &'a Helper<'_>, helper: &'static str) -> Result<&'a Vec<Value>, RenderError> {
    param(h, 0, helper)?
        .as_array()
        .ok_or_else(|| other(format!("{helper} must be called with an array")))
}

fn index_param(h: &Helper<'_>, index: usize) -> Option<usize> {
    h.param(index)
        .and_then(|p| p.value().as_u64())
        .and_then(|n| usize::try_from(n).ok())
}

/// `(after list start [count])`
struct After;

impl HelperDef for After {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let list = array_param(h, "after")?;
        let start = index_param(h, 1).unwrap_or(0).min(list.len());
        let end = index_param(h, 2).map_or(list.len(), |n| (start + n).min(list.len()));
        Ok(ScopedJson::Derived(Value::Array(list[start..end].to_vec())))
    }
}

/// `(pick list index [offset])`
struct Pick;

impl HelperDef for Pick {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let list = array_param(h, "pick")?;
        let index = index_param(h, 1).unwrap_or(0);
        let offset = index_param(h, 2).unwrap_or(0);
        let picked = list.get(offset.saturating_add(index)).cloned().unwrap_or(Value::Null);
        Ok(ScopedJson::Derived(picked))
    }
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Subtract,
}

struct Arithmetic(ArithOp);

impl HelperDef for Arithmetic {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let (a, b) = (param(h, 0, "arithmetic")?, param(h, 1, "arithmetic")?);
        let result = match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Value::from(match self.0 {
                ArithOp::Add => x.saturating_add(y),
                ArithOp::Subtract => x.saturating_sub(y),
            }),
            _ => {
                let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                    return Err(other("operands must be numbers"));
                };
                Value::from(match self.0 {
                    ArithOp::Add => x + y,
                    ArithOp::Subtract => x - y,
                })
            }
        };
        Ok(ScopedJson::Derived(result))
    }
}

// ============================================================================
// Block comparators
// ============================================================================

/// `{{#gt a b}}...{{else}}...{{/gt}}`
struct Compare {
    test: Box<dyn Fn(&Value, &Value) -> bool + Send + Sync>,
}

impl Compare {
    fn new(test: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self { test: Box::new(test) }
    }

    /// Numbers compare numerically, strings lexically; mixed types never match.
    fn ordered(accept: fn(Ordering) -> bool) -> Self {
        Self::new(move |a, b| compare_values(a, b).is_some_and(accept))
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl HelperDef for Compare {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let name = h.name();
        let a = h.param(0).map(|p| p.value()).ok_or_else(|| other(format!("{name} needs two arguments")))?;
        let b = h.param(1).map(|p| p.value()).ok_or_else(|| other(format!("{name} needs two arguments")))?;

        let branch = if (self.test)(a, b) { h.template() } else { h.inverse() };
        match branch {
            Some(t) => t.render(r, ctx, rc, out),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::tests::{CountingTransformer, pipeline_for},
        config::SiteConfig,
        theme::ThemeConfig,
    };
    use serde_json::json;

    fn registry(switcher: bool) -> (tempfile::TempDir, Handlebars<'static>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SiteConfig::default();
        config.build.source = dir.path().join("src");
        config.build.output = dir.path().join("dist");
        let (assets, _) = pipeline_for(&config, CountingTransformer::default());
        let mut theme = ThemeConfig::default();
        theme.web.features.theme_switcher = switcher;
        let env = Arc::new(RenderEnv::new(&config, theme, assets));

        let mut registry = Handlebars::new();
        register(&mut registry, &env).unwrap();
        (dir, registry)
    }

    fn render(template: &str, data: &Value) -> String {
        let (_dir, registry) = registry(false);
        registry.render_template(template, data).unwrap()
    }

    #[test]
    fn test_helper_table_has_no_duplicates() {
        assert!(validate_table(HELPERS.iter().map(|(name, _)| *name)).is_ok());
        assert!(validate_table(["eq", "gt", "eq"]).is_err());
    }

    #[test]
    fn test_helper_table_is_complete() {
        let names: FxHashSet<_> = HELPERS.iter().map(|(name, _)| *name).collect();
        for expected in [
            "include", "script", "css", "stylesheet", "global-js", "analytics-js", "iso_date",
            "friendly-date", "cover_image_url", "author", "twitter_handle", "pathname", "first",
            "last", "len", "empty", "after", "pick", "add", "subtract", "eq", "gt", "gte", "lt",
            "lte",
        ] {
            assert!(names.contains(expected), "missing helper {expected}");
        }
    }

    #[test]
    fn test_css_tag() {
        let (dir, registry) = registry(false);
        let web = dir.path().join("src/web");
        std::fs::create_dir_all(&web).unwrap();
        std::fs::write(web.join("app.css"), ".a { color: red }").unwrap();

        let tag = registry.render_template(r#"{{css "app.css"}}"#, &json!({})).unwrap();
        assert!(tag.starts_with(r#"<link rel="stylesheet" href="/static/"#), "{tag}");
        assert!(tag.contains(r#"integrity="sha384-"#));
        assert!(tag.ends_with(r#"crossorigin="anonymous">"#));

        let alias = registry.render_template(r#"{{stylesheet "app.css"}}"#, &json!({})).unwrap();
        assert_eq!(alias, tag);
    }

    #[test]
    fn test_block_comparators() {
        let data = json!({ "a": 3, "b": 5, "s": "x" });
        assert_eq!(render("{{#lt a b}}yes{{else}}no{{/lt}}", &data), "yes");
        assert_eq!(render("{{#gt a b}}yes{{else}}no{{/gt}}", &data), "no");
        assert_eq!(render("{{#gte a 3}}yes{{/gte}}", &data), "yes");
        assert_eq!(render("{{#lte b 4}}yes{{/lte}}", &data), "");
        assert_eq!(render(r#"{{#eq s "x"}}same{{/eq}}"#, &data), "same");
        assert_eq!(render(r#"{{#eq a "3"}}same{{else}}strict{{/eq}}"#, &data), "strict");
    }

    #[test]
    fn test_list_helpers() {
        let data = json!({ "items": [ { "id": "a" }, { "id": "b" }, { "id": "c" }, { "id": "d" } ] });
        assert_eq!(render("{{len items}}", &data), "4");
        assert_eq!(render("{{len missing}}", &data), "0");
        assert_eq!(render("{{#if (empty items)}}e{{else}}n{{/if}}", &data), "n");
        assert_eq!(render("{{#if (empty missing)}}e{{/if}}", &data), "e");
        assert_eq!(render("{{#with (first items)}}{{id}}{{/with}}", &data), "a");
        assert_eq!(render("{{#with (last items)}}{{id}}{{/with}}", &data), "d");
        assert_eq!(render("{{#each (after items 1 2)}}{{id}}{{/each}}", &data), "bc");
        assert_eq!(render("{{#each (after items 2)}}{{id}}{{/each}}", &data), "cd");
        assert_eq!(render("{{#with (pick items 1 2)}}{{id}}{{/with}}", &data), "d");
    }

    #[test]
    fn test_first_rejects_non_array() {
        let (_dir, registry) = registry(false);
        assert!(registry.render_template("{{first name}}", &json!({ "name": "x" })).is_err());
    }

    #[test]
    fn test_arithmetic() {
        let data = json!({ "page": 2 });
        assert_eq!(render("{{add page 1}}", &data), "3");
        assert_eq!(render("{{subtract page 1}}", &data), "1");
        assert_eq!(render("{{add 1.5 1}}", &data), "2.5");

        let (_dir, registry) = registry(false);
        assert!(registry.render_template(r#"{{add page "x"}}"#, &data).is_err());
    }

    #[test]
    fn test_dates() {
        let data = json!({ "ts": 1_700_000_000_000_i64 });
        assert_eq!(render("{{iso_date ts}}", &data), "2023-11-14T22:13:20.000Z");
        assert_eq!(render("{{friendly-date ts}}", &data), "11/14/2023");
        assert_eq!(
            render(r#"{{friendly-date "2024-02-03T10:00:00Z"}}"#, &data),
            "2/3/2024"
        );
    }

    #[test]
    fn test_author_and_twitter() {
        let data = json!({
            "changelog": { "authors": [
                { "firstName": "Ada", "lastName": "Lovelace" },
                { "firstName": "Alan", "lastName": "Turing" }
            ] }
        });
        assert_eq!(render("{{author changelog}}", &data), "Ada Lovelace and Alan Turing");
        assert_eq!(render("{{author site}}", &json!({ "site": {} })), "");

        assert_eq!(render(r#"{{twitter_handle "@acme"}}"#, &data), "@acme");
        assert_eq!(
            render(r#"{{twitter_handle "https://twitter.com/acme/status/1"}}"#, &data),
            "@acme"
        );
        assert_eq!(render(r#"{{twitter_handle "acme"}}"#, &data), "acme");
    }

    #[test]
    fn test_urls() {
        let data = json!({
            "changelog": { "cover_image": "https://cdn.example.com/img.png?rw=10&q=80" },
            "bare": {}
        });
        assert_eq!(
            render("{{cover_image_url changelog}}", &data),
            "https://cdn.example.com/img.png?q=80&rw=1200&rh=628"
        );
        assert_eq!(render("{{cover_image_url bare}}", &data), "");
        assert_eq!(render(r#"{{pathname "https://acme.com/entry/1?x=y"}}"#, &data), "/entry/1");
    }

    #[test]
    fn test_analytics_js() {
        let data = json!({ "site": { "id": "s1" }, "changelog": { "id": "c1" } });
        assert_eq!(
            render("{{analytics-js site.id changelog.id}}", &data),
            r#"<script async defer src="/a.js" data-site-id="s1" data-id="c1"></script>"#
        );
    }

    #[test]
    fn test_global_js_on_index_and_entry() {
        let (_dir, registry) = registry(true);

        let index = registry
            .render_template(
                "{{global-js}}",
                &json!({ "site": { "id": "s1" }, "changelogs": [{ "id": "a" }, { "id": "b" }] }),
            )
            .unwrap();
        assert!(index.contains(r#"window.apiURL = "api.changelog.so";"#));
        assert!(index.contains(r#"window.siteId = "s1";"#));
        assert!(index.contains(r#"window.changelogId = "";"#));
        assert!(index.contains(r#"window.changelogIds = ["a","b"];"#));
        assert!(index.contains("prefers-color-scheme"));

        let entry = registry
            .render_template("{{global-js}}", &json!({ "site": { "id": "s1" }, "changelog": { "id": "c9" } }))
            .unwrap();
        assert!(entry.contains(r#"window.changelogIds = ["c9"];"#));
    }

    #[test]
    fn test_global_js_without_switcher() {
        let (_dir, registry) = registry(false);
        let out = registry
            .render_template("{{global-js}}", &json!({ "site": { "id": "s1" }, "changelogs": [] }))
            .unwrap();
        assert!(!out.contains("prefers-color-scheme"));
    }
}
