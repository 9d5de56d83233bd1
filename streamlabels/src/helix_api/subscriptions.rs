//! Twitch Subscriptions API types.

use serde::Deserialize;

/// A subscription to the broadcaster's channel.
///
/// See: <https://dev.twitch.tv/docs/api/reference/#get-broadcaster-subscriptions>
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub user_id: String,
    pub user_login: String,
    /// The subscriber's display name.
    pub user_name: String,
}
