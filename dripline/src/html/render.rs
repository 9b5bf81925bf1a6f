//! Personalize a template and inject tracking.
//!
//! The passes are regex based rather than DOM based so that the author's
//! markup comes out byte-for-byte identical apart from the rewritten spots.
//! Rendering is pure: the same template, variables, token and base URL always
//! produce the same output.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use url::Url;

use crate::model::Variables;
use crate::token::TrackToken;

const META_CHARSET: &str = r#"<meta charset="UTF-8">"#;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid regex"))
}

fn meta_charset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(<meta\b[^>]*\bcharset\s*=\s*["']?)([^"'\s;>/]*)"#).expect("valid regex")
    })
}

fn head_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<head(\s[^>]*)?>").expect("valid regex"))
}

fn html_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<html(\s[^>]*)?>").expect("valid regex"))
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    })
}

/// Builds the public tracking endpoints for a token.
#[derive(Debug, Clone)]
pub struct TrackingUrls {
    prefix: String,
}

impl TrackingUrls {
    pub fn new(base: &Url) -> Self {
        Self {
            prefix: base.as_str().trim_end_matches('/').to_string(),
        }
    }

    pub fn open_url(&self, token: &TrackToken) -> String {
        format!("{}/track/open/{}", self.prefix, token)
    }

    pub fn click_url(&self, token: &TrackToken, destination: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(destination.as_bytes()).collect();
        format!("{}/track/click/{}?url={}", self.prefix, token, encoded)
    }

    /// Whether `href` already points at one of our tracking endpoints.
    pub fn is_tracking_url(&self, href: &str) -> bool {
        href.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with("/track/"))
    }
}

/// Run the full pipeline: variables, charset, links, pixel.
pub fn render(
    template: &str,
    variables: &Variables,
    token: &TrackToken,
    urls: &TrackingUrls,
) -> String {
    let html = substitute_variables(template, variables);
    let html = ensure_utf8_charset(&html);
    let html = rewrite_links(&html, token, urls);
    inject_open_pixel(&html, &urls.open_url(token))
}

/// Replace `{{key}}` with its value, or nothing when the key is unknown.
/// Single pass: substituted values are never expanded again.
pub fn substitute_variables(template: &str, variables: &Variables) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures<'_>| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Make the document declare UTF-8. An existing declaration of another
/// charset is rewritten in place, since the body is always UTF-8.
pub fn ensure_utf8_charset(html: &str) -> String {
    if meta_charset_re().is_match(html) {
        return meta_charset_re()
            .replace_all(html, |caps: &Captures<'_>| {
                let value = &caps[2];
                if value.eq_ignore_ascii_case("utf-8") || value.eq_ignore_ascii_case("utf8") {
                    caps[0].to_string()
                } else {
                    format!("{}UTF-8", &caps[1])
                }
            })
            .into_owned();
    }

    if let Some(head) = head_open_re().find(html) {
        let mut out = String::with_capacity(html.len() + META_CHARSET.len());
        out.push_str(&html[..head.end()]);
        out.push_str(META_CHARSET);
        out.push_str(&html[head.end()..]);
        return out;
    }

    if let Some(open) = html_open_re().find(html) {
        let mut out = String::with_capacity(html.len() + META_CHARSET.len() + 13);
        out.push_str(&html[..open.end()]);
        out.push_str("<head>");
        out.push_str(META_CHARSET);
        out.push_str("</head>");
        out.push_str(&html[open.end()..]);
        return out;
    }

    format!("<!DOCTYPE html><html><head>{META_CHARSET}</head><body>{html}</body></html>")
}

fn is_trackable(href: &str, urls: &TrackingUrls) -> bool {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("mailto:") || lower.starts_with("tel:") {
        return false;
    }
    !urls.is_tracking_url(trimmed)
}

/// Number of `href`s that `rewrite_links` would send through the click endpoint.
pub fn trackable_link_count(html: &str, urls: &TrackingUrls) -> usize {
    href_re()
        .captures_iter(html)
        .filter(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .is_some_and(|v| is_trackable(v.as_str(), urls))
        })
        .count()
}

/// Point every trackable `href` at the click endpoint, keeping its quotes.
pub fn rewrite_links(html: &str, token: &TrackToken, urls: &TrackingUrls) -> String {
    href_re()
        .replace_all(html, |caps: &Captures<'_>| {
            let (value, quote) = match (caps.get(1), caps.get(2)) {
                (Some(v), _) => (v.as_str(), '"'),
                (None, Some(v)) => (v.as_str(), '\''),
                (None, None) => return caps[0].to_string(),
            };
            if !is_trackable(value, urls) {
                return caps[0].to_string();
            }
            format!("href={quote}{}{quote}", urls.click_url(token, value))
        })
        .into_owned()
}

pub fn pixel_tag(src: &str) -> String {
    format!(
        r#"<img src="{src}" alt="" width="1" height="1" style="display:block;width:1px;height:1px;border:0;opacity:0;" />"#
    )
}

/// Place the open pixel just before the last `</body>`, or append it.
pub fn inject_open_pixel(html: &str, pixel_src: &str) -> String {
    let tag = pixel_tag(pixel_src);
    // ASCII lowercasing keeps byte offsets aligned with the original.
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..idx]);
            out.push_str(&tag);
            out.push_str(&html[idx..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
