//! Twitch Helix API client library.
//!
//! Only the handful of endpoints needed to produce stream labels are covered:
//!
//! - [`users`]: resolve a login name to the broadcaster's user id
//! - [`follows`]: most recent followers of a channel
//! - [`subscriptions`]: subscribers of a channel
//! - [`bits`]: the bits leaderboard
//!
//! Every request is authenticated with the user access token held by a
//! [`Session`](crate::session::Session), which the refresh monitor keeps fresh.

pub mod bits;
pub mod client;
pub mod follows;
pub mod subscriptions;
pub mod types;
pub mod users;

pub use bits::BitsLeader;
pub use client::HelixClient;
pub use follows::ChannelFollower;
pub use subscriptions::Subscription;
pub use types::{BroadcasterId, DataResponse};
pub use users::User;
