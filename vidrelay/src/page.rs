use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::assets::{PLAYER_SCRIPT_PATH, PLAYER_STYLE_PATH};

const TEMPLATE: &str = include_str!("page.html");

const DASH_MIME: &str = "application/dash+xml";
const HLS_MIME: &str = "application/x-mpegURL";

static DASH_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\.mpd(?:$|[?#])|format=mpd)").expect("valid regex"));
static HLS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\.m3u8(?:$|[?#])|format=m3u8)").expect("valid regex"));

/**
    Container type of a stream, detected from its URL.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// MPEG-DASH manifest
    Dash,
    /// HLS playlist
    Hls,
    /// Unknown, both sources are offered and the player picks
    Auto,
}

impl StreamKind {
    /**
        Detect the container type from manifest markers in the URL.

        DASH markers are checked first, so a URL carrying both is DASH.
    */
    pub fn detect(url: &str) -> Self {
        if DASH_MARKER.is_match(url) {
            Self::Dash
        } else if HLS_MARKER.is_match(url) {
            Self::Hls
        } else {
            Self::Auto
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dash => "dash",
            Self::Hls => "hls",
            Self::Auto => "auto",
        }
    }
}

/**
    Everything the synthesized page depends on.
*/
#[derive(Debug, Clone)]
pub struct PageConfig<'a> {
    pub stream_url: &'a str,
    pub is_live: bool,
    pub kind: StreamKind,
    pub license_key: Option<&'a str>,
    /// Loopback server root, without trailing slash
    pub base_url: &'a str,
    /// Appended to asset URLs, affects caching only
    pub cache_bust: i64,
    /// Load generation the page tags its bridge messages with
    pub generation: u64,
    /// Fetch media through `/proxy` instead of directly
    pub via_proxy: bool,
}

/**
    Build the player page for a stream.

    Pure: the same config always yields the same document.
*/
pub fn build_page(config: &PageConfig<'_>) -> String {
    let base = config.base_url.trim_end_matches('/');

    let media_url = if config.via_proxy {
        format!("{base}/proxy?url={}", urlencoding::encode(config.stream_url))
    } else {
        config.stream_url.to_string()
    };

    let sources: Vec<Value> = match config.kind {
        StreamKind::Dash => vec![json!({ "src": media_url, "type": DASH_MIME })],
        StreamKind::Hls => vec![json!({ "src": media_url, "type": HLS_MIME })],
        StreamKind::Auto => vec![
            json!({ "src": media_url, "type": DASH_MIME }),
            json!({ "src": media_url, "type": HLS_MIME }),
        ],
    };

    let player_config = json!({
        "sources": sources,
        "kind": config.kind.as_str(),
        "live": config.is_live,
        "muted": true,
        "autoplay": config.is_live,
        "licenseKey": config.license_key,
    });
    let bridge_config = json!({
        "base": base,
        "generation": config.generation,
    });

    let script_url = format!("{base}{PLAYER_SCRIPT_PATH}?v={}", config.cache_bust);
    let style_url = format!("{base}{PLAYER_STYLE_PATH}?v={}", config.cache_bust);

    render(
        TEMPLATE,
        &[
            ("script_url", escape_attr(&script_url)),
            ("style_url", escape_attr(&style_url)),
            ("player_config", script_json(&player_config)),
            ("bridge_config", script_json(&bridge_config)),
        ],
    )
}

/// Single pass so substituted values are never re-scanned for placeholders
fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 512);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

/// JSON literal safe to place inside a script element
fn script_json(value: &Value) -> String {
    value
        .to_string()
        .replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
