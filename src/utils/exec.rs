//! Running the external asset tools (CSS compiler, JS compressor).
//!
//! Tools write their result to stdout. Stderr is treated as diagnostics: it
//! is logged on success (minus known noise) and folded into the error
//! message on failure.

use crate::log;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::{
    borrow::Cow,
    ffi::OsString,
    path::Path,
    process::{Command, Output},
    sync::OnceLock,
};

/// Run a tool and capture its output.
///
/// ```ignore
/// // command from config, no working directory
/// exec!(&config.js.command; input, "--compress")?;
///
/// // with working directory and a noise filter
/// exec!(filter=&TAILWIND_FILTER; cwd=out_dir; &config.css.command; "-i", input)?;
/// ```
#[macro_export]
macro_rules! exec {
    (filter=$filter:expr; cwd=$root:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            Some($root),
            $cmd,
            &$crate::utils::exec::collect_args([$(::std::ffi::OsString::from($arg)),*]),
            $filter,
        )
    };
    (filter=$filter:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            None,
            $cmd,
            &$crate::utils::exec::collect_args([$(::std::ffi::OsString::from($arg)),*]),
            $filter,
        )
    };
    ($cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::exec!(filter=&$crate::utils::exec::EMPTY_FILTER; $cmd; $($arg),*)
    };
}

/// Drop empty arguments so optional flags can be passed as `""`.
pub fn collect_args<const N: usize>(args: [OsString; N]) -> Vec<OsString> {
    args.into_iter().filter(|a| !a.is_empty()).collect()
}

/// Execute `cmd` (program plus leading arguments) followed by `args`.
pub fn exec(
    root: Option<&Path>,
    cmd: &[String],
    args: &[OsString],
    filter: &'static FilterRule,
) -> Result<Output> {
    let (name, mut command) = prepare(root, cmd, args)?;

    let output = command
        .output()
        .with_context(|| format!("Failed to execute `{name}`"))?;

    if !output.status.success() {
        bail!(format_error(&name, &output, filter));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    filter.log(&name, stderr.trim());
    Ok(output)
}

fn prepare(root: Option<&Path>, cmd: &[String], args: &[OsString]) -> Result<(String, Command)> {
    let (program, leading) = cmd.split_first().context("Empty command")?;

    let mut command = Command::new(program);
    command.args(leading).args(args);
    if let Some(dir) = root {
        command.current_dir(dir);
    }

    let name = Path::new(program)
        .file_name()
        .map_or_else(|| program.clone(), |n| n.to_string_lossy().into_owned());
    Ok((name, command))
}

fn strip_ansi(s: &str) -> Cow<'_, str> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    match RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").ok()) {
        Some(re) => re.replace_all(s, ""),
        None => Cow::Borrowed(s),
    }
}

/// Lines starting with any of these prefixes are not logged.
pub struct FilterRule {
    pub skip_prefixes: &'static [&'static str],
}

impl FilterRule {
    pub const fn new(skip_prefixes: &'static [&'static str]) -> Self {
        Self { skip_prefixes }
    }

    fn should_skip(&self, line: &str) -> bool {
        line.is_empty() || self.skip_prefixes.iter().any(|p| line.starts_with(p))
    }

    fn log(&self, name: &str, output: &str) {
        let lines: Vec<_> = output
            .lines()
            .filter(|line| !self.should_skip(strip_ansi(line).trim()))
            .collect();

        if !lines.is_empty() {
            log!(name; "{}", lines.join("\n"));
        }
    }
}

pub const EMPTY_FILTER: FilterRule = FilterRule::new(&[]);

/// Tailwind prints a banner and timing on every run.
pub const TAILWIND_FILTER: FilterRule =
    FilterRule::new(&["Rebuilding...", "Done in", "≈ tailwindcss", "Browserslist:"]);

fn format_error(name: &str, output: &Output, filter: &FilterRule) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let details: Vec<_> = stderr
        .lines()
        .map(|line| strip_ansi(line).trim().to_owned())
        .filter(|line| !filter.should_skip(line))
        .collect();

    let mut msg = format!("`{name}` failed with {}", output.status);
    if !details.is_empty() {
        msg.push('\n');
        msg.push_str(&details.join("\n"));
    }
    msg
}
