//! Control messages posted from pages to the worker.
//!
//! Messages are JSON objects with a `type` field:
//!
//! | type             | effect                                          |
//! |------------------|-------------------------------------------------|
//! | `SKIP_WAITING`   | promote the waiting worker now                  |
//! | `CACHE_VERSION`  | reply on the supplied port with the version     |
//! | `STATUS_CHANGE`  | record the page's `online` hint                 |
//!
//! Anything else is ignored.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// A message on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    CacheVersion,
    StatusChange { online: bool },
    /// Unrecognized or malformed message.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Decode a posted value. Never fails: bad shapes become [`ControlMessage::Unknown`].
    pub fn parse(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or(Self::Unknown)
    }

    pub fn from_json(text: &str) -> Self {
        serde_json::from_str::<Value>(text)
            .map(|value| Self::parse(&value))
            .unwrap_or(Self::Unknown)
    }
}

/// Answer to `CACHE_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: u32,
    pub static_cache: String,
    pub dynamic_cache: String,
}

/// Reply port attached to a posted message.
pub type ReplyPort = oneshot::Sender<VersionReply>;

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The host should promote the waiting worker.
    SkipWaiting,
    VersionSent,
    ConnectivityChanged { online: bool },
    Ignored,
}

/// The page's last reported connectivity. Starts online.
#[derive(Debug)]
pub struct ConnectivityHint {
    online: AtomicBool,
}

impl ConnectivityHint {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record `online`; returns the previous value.
    pub fn set(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }
}

impl Default for ConnectivityHint {
    fn default() -> Self {
        Self::new()
    }
}
