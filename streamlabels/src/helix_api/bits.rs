//! Twitch Bits Leaderboard API types.

use serde::Deserialize;

/// One ranked entry of the bits leaderboard.
///
/// See: <https://dev.twitch.tv/docs/api/reference/#get-bits-leaderboard>
#[derive(Debug, Clone, Deserialize)]
pub struct BitsLeader {
    pub user_id: String,
    pub user_login: String,
    /// The cheerer's display name.
    pub user_name: String,
    /// Position on the leaderboard, starting at 1.
    pub rank: u32,
    /// Number of bits cheered.
    pub score: u64,
}
