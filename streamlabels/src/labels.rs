//! The labels that can be kept up to date, and how each is rendered to text.

use crate::helix_api::{
    BitsLeader, BroadcasterId, ChannelFollower, HelixClient, Subscription,
};
use std::fmt::Write as _;
use std::future::Future;

/// Number of entries rendered into the bits leaderboard label.
pub const LEADERBOARD_SIZE: u32 = 10;

/// A piece of channel information written to its own text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    NewestFollower,
    NewestSubscriber,
    BitsLeaderboard,
}

impl Label {
    /// Name of the file, inside the output directory, holding this label.
    pub fn file_name(self) -> &'static str {
        match self {
            Label::NewestFollower => "newest_followers.txt",
            Label::NewestSubscriber => "newest_subscriber.txt",
            Label::BitsLeaderboard => "bits_leaderboard.txt",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::NewestFollower => "newest-follower",
            Label::NewestSubscriber => "newest-subscriber",
            Label::BitsLeaderboard => "bits-leaderboard",
        }
    }
}

/// Produces the current text of one label.
pub trait LabelSource: Send + Sync {
    fn label(&self) -> Label;

    fn fetch(&self) -> impl Future<Output = eyre::Result<String>> + Send;
}

/// A [`Label`] fetched from the Helix API for one broadcaster.
#[derive(Debug, Clone)]
pub struct HelixLabel {
    label: Label,
    client: HelixClient,
    broadcaster: BroadcasterId,
}

impl HelixLabel {
    pub fn new(label: Label, client: HelixClient, broadcaster: BroadcasterId) -> Self {
        Self {
            label,
            client,
            broadcaster,
        }
    }
}

impl LabelSource for HelixLabel {
    fn label(&self) -> Label {
        self.label
    }

    async fn fetch(&self) -> eyre::Result<String> {
        match self.label {
            Label::NewestFollower => {
                let followers = self.client.channel_followers(&self.broadcaster, 1).await?;
                Ok(newest_follower(&followers))
            }
            Label::NewestSubscriber => {
                let subscriptions = self.client.subscriptions(&self.broadcaster, 1).await?;
                Ok(newest_subscriber(&subscriptions))
            }
            Label::BitsLeaderboard => {
                let leaders = self.client.bits_leaderboard(LEADERBOARD_SIZE).await?;
                Ok(leaderboard(&leaders))
            }
        }
    }
}

/// Display name of the first follower listed, or empty if there is none.
pub fn newest_follower(followers: &[ChannelFollower]) -> String {
    followers
        .first()
        .map(|f| f.user_name.clone())
        .unwrap_or_default()
}

/// Display name of the first subscriber listed, or empty if there is none.
pub fn newest_subscriber(subscriptions: &[Subscription]) -> String {
    subscriptions
        .first()
        .map(|s| s.user_name.clone())
        .unwrap_or_default()
}

/// One `name: score` line per entry, in the order given.
pub fn leaderboard(leaders: &[BitsLeader]) -> String {
    let mut text = String::new();
    for leader in leaders {
        // writing to a String cannot fail
        let _ = writeln!(text, "{}: {}", leader.user_name, leader.score);
    }
    text
}
