use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use include_dir::{Dir, include_dir};
use tokio_util::io::ReaderStream;

static BUNDLE_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Request path of the player script
pub const PLAYER_SCRIPT_PATH: &str = "/relay-player.js";
/// Request path of the player stylesheet
pub const PLAYER_STYLE_PATH: &str = "/relay-player.css";

/**
    Maps a logical request path to a bundled asset and its content type.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub path: &'static str,
    pub asset: &'static str,
    pub content_type: &'static str,
}

pub const RESOURCES: &[ResourceDescriptor] = &[
    ResourceDescriptor {
        path: PLAYER_SCRIPT_PATH,
        asset: "player/relay-player.js",
        content_type: "application/javascript; charset=utf-8",
    },
    ResourceDescriptor {
        path: PLAYER_STYLE_PATH,
        asset: "player/relay-player.css",
        content_type: "text/css; charset=utf-8",
    },
];

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("js", "application/javascript; charset=utf-8"),
    ("mjs", "application/javascript; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("html", "text/html; charset=utf-8"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("wasm", "application/wasm"),
];

/**
    Content type for a bundle entry name, by extension.
*/
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, content_type)| *content_type)
        .unwrap_or("application/octet-stream")
}

#[derive(Debug)]
struct BundleEntry {
    name: String,
    data: Bytes,
}

/**
    A resolved asset, ready to be streamed.
*/
#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub data: Bytes,
    pub content_type: &'static str,
}

impl IntoResponse for Asset {
    fn into_response(self) -> Response {
        let length = self.data.len();
        let stream = ReaderStream::new(Cursor::new(self.data));

        let mut response = Body::from_stream(stream).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

/**
    Read-only set of bundled payloads, keyed by full entry name.
*/
#[derive(Debug, Clone)]
pub struct AssetBundle {
    entries: Arc<Vec<BundleEntry>>,
}

impl AssetBundle {
    /**
        The assets compiled into this crate.
    */
    pub fn embedded() -> Self {
        let mut entries = Vec::new();
        collect_dir(&BUNDLE_DIR, &mut entries);
        Self {
            entries: Arc::new(entries),
        }
    }

    /**
        Build a bundle from explicit entries, e.g. to ship a different player.
    */
    pub fn from_entries<N, D>(entries: impl IntoIterator<Item = (N, D)>) -> Self
    where
        N: Into<String>,
        D: Into<Bytes>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, data)| BundleEntry {
                name: name.into(),
                data: data.into(),
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    /**
        Resolve a request path to a bundled payload.

        Tried in order:
        1. Exact match: a resource descriptor for the path, or an entry whose full name is the path
        2. Suffix match on the file name against entry names
        3. Same as 2, ignoring ASCII case
    */
    pub fn resolve(&self, path: &str) -> Option<Asset> {
        let name = path.trim_start_matches('/');
        if name.is_empty() {
            return None;
        }

        let descriptor = RESOURCES
            .iter()
            .find(|d| d.path == path || d.asset == name);
        let lookup = descriptor.map(|d| d.asset).unwrap_or(name);
        let file_name = lookup.rsplit('/').next().unwrap_or(lookup);

        let entry = self
            .entries
            .iter()
            .find(|e| e.name == lookup)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| has_suffix(&e.name, file_name))
            })
            .or_else(|| {
                let file_name = file_name.to_ascii_lowercase();
                self.entries
                    .iter()
                    .find(|e| has_suffix(&e.name.to_ascii_lowercase(), &file_name))
            })?;

        let content_type = descriptor
            .map(|d| d.content_type)
            .unwrap_or_else(|| content_type_for(&entry.name));

        Some(Asset {
            name: entry.name.clone(),
            data: entry.data.clone(),
            content_type,
        })
    }
}

impl Default for AssetBundle {
    fn default() -> Self {
        Self::embedded()
    }
}

fn collect_dir(dir: &Dir<'static>, out: &mut Vec<BundleEntry>) {
    for file in dir.files() {
        out.push(BundleEntry {
            name: file.path().to_string_lossy().replace('\\', "/"),
            data: Bytes::from_static(file.contents()),
        });
    }
    for sub in dir.dirs() {
        collect_dir(sub, out);
    }
}

/// Suffix match on a name-segment boundary
fn has_suffix(name: &str, suffix: &str) -> bool {
    if name == suffix {
        return true;
    }
    name.strip_suffix(suffix)
        .and_then(|head| head.chars().last())
        .is_some_and(|c| c == '/' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_path_and_full_name_resolve_to_same_payload() {
        let bundle = AssetBundle::embedded();
        let by_path = bundle.resolve(PLAYER_SCRIPT_PATH).unwrap();
        let by_name = bundle.resolve("/player/relay-player.js").unwrap();

        assert_eq!(by_path.data, by_name.data);
        assert_eq!(by_path.name, "player/relay-player.js");
        assert_eq!(by_path.content_type, "application/javascript; charset=utf-8");
        assert!(!by_path.data.is_empty());
    }

    #[test]
    fn test_stylesheet_is_bundled() {
        let asset = AssetBundle::embedded().resolve(PLAYER_STYLE_PATH).unwrap();
        assert_eq!(asset.content_type, "text/css; charset=utf-8");
    }

    #[test]
    fn test_suffix_match_against_foreign_names() {
        let bundle = AssetBundle::from_entries([
            ("Host.Resources.Player.relay-player.js", &b"script"[..]),
            ("Host.Resources.Fonts.Icons.WOFF2", &b"font"[..]),
        ]);

        let script = bundle.resolve(PLAYER_SCRIPT_PATH).unwrap();
        assert_eq!(&script.data[..], b"script");

        // Case-insensitive fallback
        let font = bundle.resolve("/icons.woff2").unwrap();
        assert_eq!(&font.data[..], b"font");
        assert_eq!(font.content_type, "font/woff2");
    }

    #[test]
    fn test_suffix_requires_segment_boundary() {
        let bundle = AssetBundle::from_entries([("player/xrelay-player.js", &b"nope"[..])]);
        assert!(bundle.resolve(PLAYER_SCRIPT_PATH).is_none());
    }

    #[test]
    fn test_missing_asset() {
        let bundle = AssetBundle::embedded();
        assert!(bundle.resolve("/nothing-here.js").is_none());
        assert!(bundle.resolve("/").is_none());
    }

    #[test]
    fn test_response_carries_type_and_length() {
        let bundle = AssetBundle::from_entries([("style/site.css", &b"body{}"[..])]);
        let response = bundle.resolve("/site.css").unwrap().into_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "6");
    }

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type_for("a/b.JSON"), "application/json");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
