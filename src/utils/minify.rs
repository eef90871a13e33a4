//! HTML minification for generated web pages.
//!
//! Emails are never passed through here: mail clients are sensitive to the
//! exact markup of inline-styled tables.

use crate::config::SiteConfig;
use std::borrow::Cow;

/// Minify a web page if `[build] minify` is on.
pub fn minify_page<'a>(html: &'a [u8], config: &SiteConfig) -> Cow<'a, [u8]> {
    if config.build.minify {
        Cow::Owned(minify_html_inner(html))
    } else {
        Cow::Borrowed(html)
    }
}

fn minify_html_inner(html: &[u8]) -> Vec<u8> {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = true;
    cfg.minify_js = true;
    cfg.remove_bangs = true;
    cfg.remove_processing_instructions = true;
    minify_html::minify(html, &cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_minify(enabled: bool) -> SiteConfig {
        let mut config = SiteConfig::default();
        config.build.minify = enabled;
        config
    }

    #[test]
    fn test_minify_page_collapses_whitespace() {
        let html = b"<html>\n  <head>\n  </head>\n  <body>\n    <p>Hello</p>\n  </body>\n</html>";
        let result = minify_page(html, &config_with_minify(true));
        let result = String::from_utf8_lossy(&result);

        assert!(!result.contains("\n  "));
        assert!(result.contains("<p>Hello</p>"));
    }

    #[test]
    fn test_minify_page_keeps_integrity_attributes() {
        let html = br#"<link rel="stylesheet" href="/static/a.css" integrity="sha384-abc" crossorigin="anonymous">"#;
        let result = minify_page(html, &config_with_minify(true));
        let result = String::from_utf8_lossy(&result);

        assert!(result.contains("sha384-abc"));
        assert!(result.contains("/static/a.css"));
    }

    #[test]
    fn test_minify_page_disabled_is_borrowed() {
        let html = b"<html>\n  <body>\n  </body>\n</html>";
        let result = minify_page(html, &config_with_minify(false));

        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(&*result, html);
    }
}
