//! File system watcher for live rebuilds.
//!
//! Watches the theme directory plus the base `web/` and `email/` trees.
//!
//! ```text
//! notify events ──▶ Debouncer (350ms) ──▶ classify() ──┬─ Ignore
//!                                                      ├─ EmailOnly ─▶ rebuild_emails()
//!                                                      └─ Full ──────▶ build_site()
//! ```
//!
//! Every rebuild runs in a fresh build session. A failed rebuild is logged and
//! the watcher keeps going.

use crate::{
    config::SiteConfig,
    generator::{build_site, rebuild_emails},
    log,
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use std::{
    path::{Component, Path, PathBuf},
    time::{Duration, Instant},
};

const DEBOUNCE_MS: u64 = 350;

/// Generated by the icon build; rewriting it must not loop.
const GENERATED_ICONS: &str = "icons.css";

/// What a batch of changes asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rebuild {
    Ignore,
    EmailOnly,
    Full,
}

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

fn is_email_path(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == "email.html")
        || path
            .parent()
            .is_some_and(|dir| dir.components().any(|c| c == Component::Normal("email".as_ref())))
}

/// Decide how to react to a single changed path.
pub fn classify(path: &Path, config: &SiteConfig) -> Rebuild {
    if is_temp_file(path)
        || path.file_name().is_some_and(|name| name == GENERATED_ICONS)
        || path.starts_with(&config.build.output)
    {
        Rebuild::Ignore
    } else if is_email_path(path.strip_prefix(&config.root).unwrap_or(path)) {
        Rebuild::EmailOnly
    } else {
        Rebuild::Full
    }
}

/// Strongest rebuild any path in the batch needs.
pub fn classify_batch(paths: &[PathBuf], config: &SiteConfig) -> Rebuild {
    paths
        .iter()
        .map(|path| classify(path, config))
        .max()
        .unwrap_or(Rebuild::Ignore)
}

/// Batches rapid file events.
struct Debouncer {
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: FxHashSet::default(),
            last_event: None,
        }
    }

    fn add(&mut self, event: Event) {
        self.pending.extend(event.paths);
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        self.pending.drain().collect()
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

/// Format path relative to root for log display.
fn rel_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn handle_changes(paths: &[PathBuf], config: &SiteConfig) {
    let kind = classify_batch(paths, config);
    if kind == Rebuild::Ignore {
        return;
    }

    let trigger = paths
        .iter()
        .filter(|p| classify(p, config) == kind)
        .map(|p| rel_path(p, &config.root))
        .collect::<Vec<_>>()
        .join(", ");
    log!("watch"; "{trigger} changed");

    let (label, result) = match kind {
        Rebuild::EmailOnly => ("email", rebuild_emails(config)),
        _ => ("full", build_site(config)),
    };
    if let Err(err) = result {
        log!("watch"; "{label} rebuild failed ({trigger})");
        log!("error"; "{err:#}");
    }
}

/// Directories that feed the build: theme, `web/` and `email/`.
fn watch_dirs(config: &SiteConfig) -> Vec<PathBuf> {
    let mut dirs = vec![config.theme_dir(), config.web_dir(), config.email_dir()];
    dirs.sort();
    dirs.dedup();
    // a nested dir is already covered by its recursive parent
    let roots: Vec<PathBuf> = dirs
        .iter()
        .filter(|dir| !dirs.iter().any(|other| other != *dir && dir.starts_with(other)))
        .cloned()
        .collect();
    roots.into_iter().filter(|dir| dir.is_dir()).collect()
}

const fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Start blocking file watcher with debouncing and live rebuild.
pub fn watch_for_changes_blocking(config: &SiteConfig) -> Result<()> {
    if !config.serve.watch {
        return Ok(());
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    for dir in watch_dirs(config) {
        watcher
            .watch(&dir, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        log!("watch"; "{}/", rel_path(&dir, &config.root));
    }

    let mut debouncer = Debouncer::new();
    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) => debouncer.add(event),
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) if debouncer.ready() => {
                handle_changes(&debouncer.take(), config);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_at(root: &Path) -> SiteConfig {
        let mut config = SiteConfig::default();
        config.root = root.to_path_buf();
        config.build.source = root.join("src");
        config.build.output = root.join("dist");
        config.build.theme = Some(root.join("theme"));
        config
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("/a/.index.html.swp")));
        assert!(is_temp_file(Path::new("/a/index.html~")));
        assert!(is_temp_file(Path::new("/a/x.tmp")));
        assert!(!is_temp_file(Path::new("/a/index.html")));
    }

    #[test]
    fn test_classify_ignores_generated() {
        let config = config_at(Path::new("/p"));
        assert_eq!(classify(Path::new("/p/src/icons.css"), &config), Rebuild::Ignore);
        assert_eq!(classify(Path::new("/p/dist/index.html"), &config), Rebuild::Ignore);
        assert_eq!(classify(Path::new("/p/dist/email/c1.html"), &config), Rebuild::Ignore);
        assert_eq!(classify(Path::new("/p/theme/.page.html.swp"), &config), Rebuild::Ignore);
    }

    #[test]
    fn test_classify_email_scope() {
        let config = config_at(Path::new("/p"));
        assert_eq!(classify(Path::new("/p/src/email/footer.hbs"), &config), Rebuild::EmailOnly);
        assert_eq!(classify(Path::new("/p/theme/email.html"), &config), Rebuild::EmailOnly);
        assert_eq!(classify(Path::new("/p/theme/email_header.hbs"), &config), Rebuild::Full);
        assert_eq!(classify(Path::new("/p/src/web/index.html"), &config), Rebuild::Full);
        assert_eq!(classify(Path::new("/p/theme/theme.css"), &config), Rebuild::Full);
    }

    #[test]
    fn test_batch_takes_strongest() {
        let config = config_at(Path::new("/p"));
        let email = PathBuf::from("/p/src/email/email.html");
        let web = PathBuf::from("/p/src/web/page.html");
        let ignored = PathBuf::from("/p/dist/index.html");

        assert_eq!(classify_batch(&[], &config), Rebuild::Ignore);
        assert_eq!(classify_batch(&[ignored.clone()], &config), Rebuild::Ignore);
        assert_eq!(classify_batch(&[ignored.clone(), email.clone()], &config), Rebuild::EmailOnly);
        assert_eq!(classify_batch(&[email, web, ignored], &config), Rebuild::Full);
    }

    #[test]
    fn test_debouncer_waits_for_quiet_period() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.ready());

        debouncer.add(Event::new(EventKind::Any).add_path(PathBuf::from("/a")));
        debouncer.add(Event::new(EventKind::Any).add_path(PathBuf::from("/a")));
        assert!(!debouncer.ready());
        assert_eq!(debouncer.timeout(), Duration::from_millis(DEBOUNCE_MS));

        std::thread::sleep(Duration::from_millis(DEBOUNCE_MS + 20));
        assert!(debouncer.ready());
        assert_eq!(debouncer.take(), vec![PathBuf::from("/a")]);
        assert!(!debouncer.ready());
    }

    #[test]
    fn test_watch_dirs_skip_nested_and_missing() {
        let dir = tempdir().unwrap();
        let mut config = config_at(dir.path());
        config.build.theme = None;
        std::fs::create_dir_all(config.web_dir()).unwrap();
        std::fs::create_dir_all(config.legacy_theme_dir()).unwrap();

        let dirs = watch_dirs(&config);
        assert_eq!(dirs.len(), 2);
        assert!(dirs.contains(&config.web_dir()));
        assert!(dirs.contains(&config.legacy_theme_dir()));
    }
}
