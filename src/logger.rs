//! Terminal logging with colored prefixes and progress bars.
//!
//! This module provides:
//! - `log!` macro for formatted output with a colored `[module]` prefix
//! - `debug!` macro, only printed when `--debug` is on
//! - `ProgressBars` for the per-entry fan-out
//!
//! Output verbosity is process-wide: `init(quiet, debug)` is called once by
//! `main` after the config is loaded. In quiet mode only `[error]` lines are
//! printed, and they go to stderr.
//!
//! # Example
//!
//! ```ignore
//! log!("build"; "generated {} entries", count);
//! debug!("assets"; "cache hit for {}", href);
//! ```

use colored::{ColoredString, Colorize};
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType, size},
};
use std::{
    io::{Write, stderr, stdout},
    sync::{
        Mutex, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Cached terminal width (fetched once on first use)
static TERMINAL_WIDTH: OnceLock<u16> = OnceLock::new();

static QUIET: AtomicBool = AtomicBool::new(false);
static DEBUG: AtomicBool = AtomicBool::new(false);

/// Active progress bar count (for log coordination)
static BAR_COUNT: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Layout Constants
// ============================================================================
//
// Progress bar format: "[module] [████░░░░] 42/100"

const BRACKET_LEN: usize = 2;
const SPACE_AFTER_PREFIX: usize = 1;
const BAR_OVERHEAD: usize = 4;
const MIN_BAR_WIDTH: usize = 10;
const MAX_BAR_WIDTH: usize = 40;

#[inline]
const fn calc_prefix_len(module_len: usize) -> usize {
    module_len + BRACKET_LEN + SPACE_AFTER_PREFIX
}

/// Falls back to 120 columns if detection fails.
fn get_terminal_width() -> u16 {
    *TERMINAL_WIDTH.get_or_init(|| size().map(|(w, _)| w).unwrap_or(120))
}

/// Set process-wide verbosity.
pub fn init(quiet: bool, debug: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
    DEBUG.store(debug && !quiet, Ordering::Relaxed);
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

// ============================================================================
// Macros
// ============================================================================

/// Log a message with a colored module prefix.
///
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Like `log!`, but only emitted with `--debug`.
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_debug() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Progress Bars
// ============================================================================

/// Multiple progress bars, one terminal line each, updated in place.
///
/// Bars are indexed by creation order. Terminal updates are serialized by a
/// mutex so rayon workers can call `inc` freely.
pub struct ProgressBars {
    bars: Vec<ProgressBar>,
    lock: Mutex<()>,
}

struct ProgressBar {
    prefix: ColoredString,
    prefix_len: usize,
    total: usize,
    current: AtomicUsize,
    row: usize,
}

impl ProgressBars {
    /// Create bars for `(module, total)` pairs, skipping empty ones.
    ///
    /// Returns `None` in quiet mode or when there is at most one item overall.
    pub fn new(modules: &[(&'static str, usize)]) -> Option<Self> {
        let modules: Vec<_> = modules.iter().filter(|(_, n)| *n > 0).copied().collect();
        let total: usize = modules.iter().map(|(_, n)| n).sum();
        if is_quiet() || total <= 1 {
            return None;
        }

        let mut out = stdout().lock();
        for _ in 0..modules.len() {
            writeln!(out).ok();
        }
        out.flush().ok();
        BAR_COUNT.store(modules.len(), Ordering::SeqCst);

        let bars = modules
            .iter()
            .enumerate()
            .map(|(row, (module, total))| ProgressBar {
                prefix: colorize_prefix(module, &module.to_ascii_lowercase()),
                prefix_len: calc_prefix_len(module.len()),
                total: *total,
                current: AtomicUsize::new(0),
                row,
            })
            .collect();

        Some(Self {
            bars,
            lock: Mutex::new(()),
        })
    }

    /// Increment the bar whose module name matches `name`.
    pub fn inc(&self, name: &str) {
        if let Some(bar) = self
            .bars
            .iter()
            .find(|bar| bar.prefix.to_string().contains(name))
        {
            let current = bar.current.fetch_add(1, Ordering::Relaxed) + 1;
            self.display(bar, current);
        }
    }

    fn display(&self, bar: &ProgressBar, current: usize) {
        let _guard = self.lock.lock().ok();

        let progress_text = format!("{}/{}", current, bar.total);
        let overhead = bar.prefix_len + BAR_OVERHEAD + progress_text.len();
        let bar_width = (get_terminal_width() as usize)
            .saturating_sub(overhead)
            .clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH);
        let filled = (current * bar_width) / bar.total.max(1);
        let progress_bar = "█".repeat(filled) + &"░".repeat(bar_width.saturating_sub(filled));

        let mut out = stdout().lock();
        #[allow(clippy::cast_possible_truncation)]
        let lines_up = (self.bars.len() - bar.row) as u16;
        execute!(out, cursor::MoveUp(lines_up)).ok();
        execute!(out, Clear(ClearType::CurrentLine)).ok();
        write!(out, "{} [{}] {}", bar.prefix, progress_bar, progress_text).ok();
        execute!(out, cursor::MoveDown(lines_up)).ok();
        write!(out, "\r").ok();
        out.flush().ok();
    }

    /// Clear all bars from the terminal.
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish(&self) {
        if BAR_COUNT.swap(0, Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock.lock().ok();
        let mut out = stdout().lock();
        let rows = self.bars.len() as u16;

        execute!(out, cursor::MoveUp(rows)).ok();
        for _ in &self.bars {
            execute!(out, Clear(ClearType::CurrentLine)).ok();
            execute!(out, cursor::MoveDown(1)).ok();
        }
        execute!(out, cursor::MoveUp(rows)).ok();
        out.flush().ok();
    }
}

impl Drop for ProgressBars {
    fn drop(&mut self) {
        self.finish();
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix.
///
/// Single-line messages are truncated to the terminal width.
#[allow(clippy::cast_possible_truncation)]
pub fn log(module: &str, message: &str) {
    let module_lower = module.to_ascii_lowercase();
    let is_error = module_lower == "error";
    if is_quiet() && !is_error {
        return;
    }

    let prefix = colorize_prefix(module, &module_lower);
    if is_error {
        let mut err = stderr().lock();
        writeln!(err, "{prefix} {message}").ok();
        return;
    }

    let mut out = stdout().lock();
    let bar_count = BAR_COUNT.load(Ordering::SeqCst);
    if bar_count > 0 {
        execute!(out, cursor::MoveUp(bar_count as u16)).ok();
        execute!(out, Clear(ClearType::FromCursorDown)).ok();
    } else {
        execute!(out, Clear(ClearType::UntilNewLine)).ok();
    }

    if message.contains('\n') {
        writeln!(out, "{prefix} {message}").ok();
    } else {
        let max_msg_len =
            (get_terminal_width() as usize).saturating_sub(calc_prefix_len(module.len()));
        writeln!(out, "{prefix} {}", truncate_str(message, max_msg_len)).ok();
    }

    for _ in 0..bar_count {
        writeln!(out).ok();
    }
    out.flush().ok();
}

#[inline]
fn colorize_prefix(module: &str, module_lower: &str) -> ColoredString {
    let prefix = format!("[{module}]");
    match module_lower {
        "serve" | "proxy" => prefix.bright_blue().bold(),
        "watch" => prefix.bright_green().bold(),
        "error" => prefix.bright_red().bold(),
        "warn" => prefix.bright_magenta().bold(),
        _ => prefix.bright_yellow().bold(),
    }
}

/// Truncate to at most `max_len` bytes on a char boundary.
#[inline]
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_prefix_len() {
        // "build" -> "[build] "
        assert_eq!(calc_prefix_len(5), 8);
        assert_eq!(calc_prefix_len(0), 3);
    }

    #[test]
    fn test_truncate_str_fits() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_str_cuts() {
        assert_eq!(truncate_str("hello world", 5), "hello");
        assert_eq!(truncate_str("hello", 0), "");
    }

    #[test]
    fn test_truncate_str_unicode_boundary() {
        // "你" is 3 bytes; cutting at 4 falls back to 3
        assert_eq!(truncate_str("你好", 4), "你");
        assert_eq!(truncate_str("a你b", 2), "a");
    }

    #[test]
    fn test_progress_bars_skip_single_item() {
        assert!(ProgressBars::new(&[("entries", 1), ("emails", 0)]).is_none());
    }
}
