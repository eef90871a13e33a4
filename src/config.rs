//! Builder configuration management.
//!
//! Handles loading, parsing, and validating the optional `changelog.toml`
//! file, then layering command-line overrides on top of it.
//!
//! ```toml
//! [build]
//! theme = "themes/acme"
//! output = "dist"
//!
//! [source]
//! site = "acme"
//!
//! [css]
//! config = "tailwind.config.js"
//! node_modules = "node_modules"
//! ```

use crate::{
    cli::{BuildArgs, Cli, Commands},
    error::ConfigError,
};
use anyhow::{Result, bail};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default values for serde deserialization
pub mod config_defaults {
    pub fn r#true() -> bool {
        true
    }

    pub mod build {
        use std::path::PathBuf;

        pub fn source() -> PathBuf {
            "src".into()
        }
        pub fn output() -> PathBuf {
            "dist".into()
        }
    }

    pub mod source {
        pub fn host() -> String {
            "api.changelog.so".into()
        }
    }

    pub mod css {
        pub fn command() -> Vec<String> {
            vec!["tailwindcss".into()]
        }
    }

    pub mod js {
        pub fn command() -> Vec<String> {
            vec!["uglifyjs".into()]
        }
    }

    pub mod serve {
        pub fn interface() -> String {
            "127.0.0.1".into()
        }
        pub fn port() -> u16 {
            4444
        }
    }
}

/// `[build]` section in changelog.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Theme directory; defaults to the bundled `theme/default` under `source`
    #[serde(default)]
    pub theme: Option<PathBuf>,

    /// Base source tree holding `web/`, `email/` and `theme/default/`
    #[serde(default = "config_defaults::build::source")]
    #[educe(Default = config_defaults::build::source())]
    pub source: PathBuf,

    /// Output directory path (relative to root)
    #[serde(default = "config_defaults::build::output")]
    #[educe(Default = config_defaults::build::output())]
    pub output: PathBuf,

    /// Minify generated web pages
    #[serde(default = "config_defaults::r#true")]
    #[educe(Default = true)]
    pub minify: bool,

    /// Generate index, search and entry pages
    #[serde(default = "config_defaults::r#true")]
    #[educe(Default = true)]
    pub index: bool,

    /// Generate one email per changelog
    #[serde(default = "config_defaults::r#true")]
    #[educe(Default = true)]
    pub email: bool,

    /// Worker pool size; defaults to available parallelism
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Single email preview target, set from `--email [id]`
    #[serde(skip)]
    pub preview: Option<Option<String>>,
}

/// `[source]` section: where the changelog data comes from
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Site slug or hostname
    #[serde(default)]
    pub site: Option<String>,

    /// API hostname
    #[serde(default = "config_defaults::source::host")]
    #[educe(Default = config_defaults::source::host())]
    pub host: String,

    /// Local JSON snapshot used instead of the API
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// `[css]` section: utility-CSS compiler
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct CssConfig {
    /// Compiler command and leading arguments
    #[serde(default = "config_defaults::css::command")]
    #[educe(Default = config_defaults::css::command())]
    pub command: Vec<String>,

    /// Base compiler config; the content-scan manifest is layered over it
    #[serde(default)]
    pub config: Option<PathBuf>,

    /// Dependency directory linked into the output while compiling
    #[serde(default)]
    pub node_modules: Option<PathBuf>,
}

/// `[js]` section: script compressor
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct JsConfig {
    #[serde(default = "config_defaults::js::command")]
    #[educe(Default = config_defaults::js::command())]
    pub command: Vec<String>,
}

/// `[serve]` section in changelog.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ServeConfig {
    /// Network interface to bind (e.g.: "127.0.0.1", "0.0.0.0")
    #[serde(default = "config_defaults::serve::interface")]
    #[educe(Default = config_defaults::serve::interface())]
    pub interface: String,

    /// Port number to listen on
    #[serde(default = "config_defaults::serve::port")]
    #[educe(Default = config_defaults::serve::port())]
    pub port: u16,

    /// Rebuild on theme changes
    #[serde(default = "config_defaults::r#true")]
    #[educe(Default = true)]
    pub watch: bool,

    /// Upstream for proxied API calls; defaults to `https://{site}.changelog.so`
    #[serde(default)]
    pub upstream: Option<String>,
}

/// Root configuration structure representing changelog.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Project root all relative paths resolve against
    #[serde(skip)]
    #[educe(Default = PathBuf::from("./"))]
    pub root: PathBuf,

    /// Config file location (may not exist)
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub css: CssConfig,

    #[serde(default)]
    pub js: JsConfig,

    #[serde(default)]
    pub serve: ServeConfig,
}

impl SiteConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let mut config = Self::from_str(&content)?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Load `changelog.toml` if present, otherwise defaults, then apply CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("./"));
        let config_path = root.join(&cli.config);
        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            Self {
                config_path,
                ..Self::default()
            }
        };
        config.root = root;
        config.update_with_cli(cli);
        Ok(config)
    }

    /// Update configuration with CLI arguments, then anchor paths at `root`.
    pub fn update_with_cli(&mut self, cli: &Cli) {
        self.apply_build_args(cli.build_args());

        if let Commands::Dev {
            interface,
            port,
            watch,
            ..
        } = &cli.command
        {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
            Self::update_option(&mut self.serve.watch, watch.as_ref());
        }

        let root = self.root.clone();
        self.update_path_with_root(&root);
    }

    fn apply_build_args(&mut self, args: &BuildArgs) {
        if args.theme.is_some() {
            self.build.theme.clone_from(&args.theme);
        }
        if args.site.is_some() {
            self.source.site.clone_from(&args.site);
        }
        if args.file.is_some() {
            self.source.file.clone_from(&args.file);
        }
        if args.jobs.is_some() {
            self.build.jobs = args.jobs;
        }
        Self::update_option(&mut self.build.output, args.output.as_ref());
        Self::update_option(&mut self.source.host, args.host.as_ref());
        Self::update_option(&mut self.build.minify, args.minify.as_ref());
        if args.no_index {
            self.build.index = false;
        }
        if args.no_email {
            self.build.email = false;
        }
        if let Some(id) = &args.email {
            self.build.preview = Some(Some(id.clone()).filter(|id| !id.is_empty()));
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Make every configured path absolute-ish relative to `root`.
    fn update_path_with_root(&mut self, root: &Path) {
        let anchor = |path: &Path| -> PathBuf {
            let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
            if expanded.is_relative() {
                root.join(expanded)
            } else {
                expanded
            }
        };

        self.build.source = anchor(&self.build.source);
        self.build.output = anchor(&self.build.output);
        self.build.theme = self.build.theme.as_deref().map(&anchor);
        self.source.file = self.source.file.as_deref().map(&anchor);
        self.css.config = self.css.config.as_deref().map(&anchor);
        self.css.node_modules = self.css.node_modules.as_deref().map(&anchor);
    }

    // ------------------------------------------------------------------------
    // Derived paths
    // ------------------------------------------------------------------------

    /// Active theme directory.
    pub fn theme_dir(&self) -> PathBuf {
        self.build
            .theme
            .clone()
            .unwrap_or_else(|| self.legacy_theme_dir())
    }

    /// Default web templates and assets.
    pub fn web_dir(&self) -> PathBuf {
        self.build.source.join("web")
    }

    /// Default email templates.
    pub fn email_dir(&self) -> PathBuf {
        self.build.source.join("email")
    }

    /// Pre-restructure default theme, still searched for compatibility.
    pub fn legacy_theme_dir(&self) -> PathBuf {
        self.build.source.join("theme").join("default")
    }

    /// Fingerprinted assets land here.
    pub fn static_dir(&self) -> PathBuf {
        self.build.output.join("static")
    }

    /// Raw data snapshot written by API builds and read by email rebuilds.
    pub fn snapshot_path(&self) -> PathBuf {
        self.build.output.join("data.json")
    }

    /// Worker pool size.
    pub fn jobs(&self) -> usize {
        self.build
            .jobs
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(usize::from))
            .unwrap_or(4)
    }

    /// Upstream base URL for proxied API calls.
    pub fn upstream_url(&self) -> Option<String> {
        self.serve.upstream.clone().or_else(|| {
            self.source
                .site
                .as_ref()
                .map(|site| format!("https://{site}.changelog.so"))
        })
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Validate directories, inputs and external commands.
    pub fn validate(&self) -> Result<()> {
        let theme = self.theme_dir();
        if !theme.is_dir() {
            bail!(ConfigError::Validation(format!(
                "cannot find theme at {}",
                theme.display()
            )));
        }

        for dir in [self.web_dir(), self.email_dir()] {
            if !dir.is_dir() {
                bail!(ConfigError::Validation(format!(
                    "[build.source] is missing {}",
                    dir.display()
                )));
            }
        }

        match (&self.source.site, &self.source.file) {
            (None, None) => bail!(ConfigError::Validation(
                "missing your site slug or hostname (or a data file)".into()
            )),
            (_, Some(file)) if !file.is_file() => bail!(ConfigError::Validation(format!(
                "data file does not exist: {}",
                file.display()
            ))),
            _ => {}
        }

        if let Some(node_modules) = &self.css.node_modules
            && !node_modules.is_dir()
        {
            bail!(ConfigError::Validation(format!(
                "[css.node_modules] not found: {}",
                node_modules.display()
            )));
        }

        if let Some(cfg) = &self.css.config
            && !cfg.is_file()
        {
            bail!(ConfigError::Validation(format!(
                "[css.config] not found: {}",
                cfg.display()
            )));
        }

        if self.build.jobs == Some(0) {
            bail!(ConfigError::Validation("[build.jobs] must be at least 1".into()));
        }

        Self::check_command_installed("[css.command]", &self.css.command)?;
        Self::check_command_installed("[js.command]", &self.js.command)?;
        Ok(())
    }

    fn check_command_installed(field: &str, command: &[String]) -> Result<()> {
        let Some(cmd) = command.first() else {
            bail!(ConfigError::Validation(format!("{field} is empty")));
        };
        if which::which(cmd).is_err() {
            bail!(ConfigError::Validation(format!(
                "{field}: `{cmd}` not found in PATH"
            )));
        }
        Ok(())
    }
}
