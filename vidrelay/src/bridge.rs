use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};

use serde::Deserialize;

use crate::error::{RelayError, RelayResult};

const DEFAULT_DELIVERY_LOG: usize = 256;

/**
    An event raised by the page's script.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The player finished loading its source
    Ready,
    /// The player failed
    Error(String),
    /// Any other player state transition
    StateChanged(String),
    /// Diagnostic message
    Debug(String),
}

impl BridgeEvent {
    /**
        Parse a bridge route (`/bridge/...` or `/debug/...`).

        Returns `None` for paths outside the bridge namespace.
    */
    pub fn from_path(path: &str) -> Option<Self> {
        if let Some(rest) = path.strip_prefix("/bridge/") {
            if rest.is_empty() {
                return None;
            }
            let event = match rest {
                "ready" => Self::Ready,
                "error" => Self::Error("unknown player error".to_string()),
                _ => match rest.strip_prefix("error/") {
                    Some(message) => Self::Error(decode(message)),
                    None => Self::StateChanged(decode(rest)),
                },
            };
            return Some(event);
        }

        path.strip_prefix("/debug/")
            .map(|message| Self::Debug(decode(message)))
    }

    /**
        Parse a JSON message delivered over a native web view channel.
    */
    pub fn from_web_message(json: &str) -> RelayResult<(Self, DeliveryTag)> {
        let message: WebMessage = serde_json::from_str(json)
            .map_err(|e| RelayError::InvalidArgument(format!("malformed bridge message: {e}")))?;
        let tag: DeliveryTag = serde_json::from_str(json).unwrap_or_default();

        let event = match message {
            WebMessage::Ready => Self::Ready,
            WebMessage::Error { message } => Self::Error(message),
            WebMessage::State { state } => Self::StateChanged(state),
            WebMessage::Debug { message } => Self::Debug(message),
        };
        Ok((event, tag))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WebMessage {
    Ready,
    Error {
        #[serde(default)]
        message: String,
    },
    State {
        state: String,
    },
    Debug {
        #[serde(default)]
        message: String,
    },
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| s.to_string())
}

/**
    Identifies one event sent by one page load.

    The page sends every event over several channels with the same tag,
    so a tag that was already handled marks a duplicate.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeliveryTag {
    /// Load generation the page was built for
    #[serde(rename = "g", default)]
    pub generation: Option<u64>,
    /// Random id of this page load (changes on in-page retry)
    #[serde(rename = "p", default)]
    pub page: Option<String>,
    /// Per-page event counter
    #[serde(rename = "s", default)]
    pub sequence: Option<u64>,
}

impl DeliveryTag {
    /**
        Read a tag from bridge route query parameters, ignoring malformed values.
    */
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            generation: query.get("g").and_then(|v| v.parse().ok()),
            page: query.get("p").filter(|v| !v.is_empty()).cloned(),
            sequence: query.get("s").and_then(|v| v.parse().ok()),
        }
    }

    fn key(&self) -> Option<(u64, &str, u64)> {
        Some((self.generation?, self.page.as_deref()?, self.sequence?))
    }
}

/**
    Bounded memory of recently handled delivery tags.
*/
#[derive(Debug)]
pub struct DeliveryLog {
    seen: VecDeque<(u64, String, u64)>,
    capacity: usize,
}

impl DeliveryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /**
        Record a delivery, returning `false` if the same tag was already seen.

        Untagged deliveries cannot be deduplicated and always count as first.
    */
    pub fn first_delivery(&mut self, tag: &DeliveryTag) -> bool {
        let Some((generation, page, sequence)) = tag.key() else {
            return true;
        };
        let seen = self
            .seen
            .iter()
            .any(|(g, p, s)| *g == generation && p == page && *s == sequence);
        if seen {
            return false;
        }

        if self.seen.len() == self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back((generation, page.to_string(), sequence));
        true
    }
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_LOG)
    }
}
