//! Shared types for the Helix API client.

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Envelope used by every Helix list endpoint.
///
/// See: <https://dev.twitch.tv/docs/api/guide/#pagination>
#[derive(Debug, Deserialize)]
pub struct DataResponse<T> {
    /// The resources returned by the request, possibly empty.
    pub data: Vec<T>,
    /// Total number of results, reported by some endpoints only.
    #[serde(default)]
    pub total: Option<u64>,
}

/// The Twitch user id of the broadcaster whose labels are produced.
///
/// Resolved once at startup and shared read-only by every poller afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BroadcasterId(Arc<str>);

impl BroadcasterId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BroadcasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_ignores_pagination() {
        let page: DataResponse<serde_json::Value> =
            serde_json::from_str(r#"{"data":[],"pagination":{}}"#).unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, None);
    }

    #[test]
    fn broadcaster_id_displays_raw_id() {
        let id = BroadcasterId::new("141981764");
        assert_eq!(id.to_string(), "141981764");
        assert_eq!(id.as_str(), "141981764");
    }
}
