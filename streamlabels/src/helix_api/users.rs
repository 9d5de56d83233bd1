//! Twitch Users API types.

use serde::Deserialize;

/// A Twitch user as returned by `Get Users`.
///
/// Only the fields this crate uses are kept.
///
/// See: <https://dev.twitch.tv/docs/api/reference/#get-users>
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// The user's id.
    pub id: String,
    /// The user's display name.
    pub display_name: String,
}
