//! Core Helix API client functionality.

use crate::helix_api::{
    bits::BitsLeader,
    follows::ChannelFollower,
    subscriptions::Subscription,
    types::{BroadcasterId, DataResponse},
    users::User,
};
use crate::session::Session;
use eyre::Context;
use oauth2::ClientId;
use serde::de::DeserializeOwned;
use tracing::instrument;

const HELIX_URL: &str = "https://api.twitch.tv/helix";

/// Client for the Twitch Helix API.
///
/// Requests carry the access token currently held by the shared [`Session`]; this client never
/// refreshes tokens itself. Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HelixClient {
    base_url: String,
    client_id: ClientId,
    session: Session,
    client: reqwest::Client,
}

impl HelixClient {
    pub fn new(client_id: ClientId, session: Session) -> eyre::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build HTTP client for Helix")?;
        Ok(Self::with_base_url(HELIX_URL, client_id, session, client))
    }

    /// Like [`HelixClient::new`], but sending requests through `client` to `base_url` instead of
    /// Twitch.
    pub(crate) fn with_base_url(
        base_url: impl Into<String>,
        client_id: ClientId,
        session: Session,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id,
            session,
            client,
        }
    }

    /// Makes an authenticated GET request against a Helix endpoint and parses the data envelope.
    ///
    /// Any non-2xx status is turned into an error carrying the response body.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> eyre::Result<DataResponse<T>> {
        let url = format!("{}/{endpoint}", self.base_url);
        let access_token = self.session.access_token().await;

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token.secret()))
            .header("Client-Id", self.client_id.as_str())
            .query(query_params)
            .send()
            .await
            .with_context(|| format!("send GET request to Helix API: {endpoint}"))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(eyre::eyre!(
                "Helix API GET {} failed with status {}: {}",
                endpoint,
                status_code,
                error_text
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("parse Helix {endpoint} response as JSON"))
    }

    /// Looks up a user by login name.
    ///
    /// Returns `None` if no such user exists.
    ///
    /// # API Reference
    ///
    /// <https://dev.twitch.tv/docs/api/reference/#get-users>
    #[instrument(skip(self), ret)]
    pub async fn user_by_login(&self, login: &str) -> eyre::Result<Option<User>> {
        let users: DataResponse<User> = self.get("users", &[("login", login)]).await?;
        Ok(users.data.into_iter().next())
    }

    /// Lists the most recent followers of a channel, newest first.
    ///
    /// # Required Scopes
    ///
    /// * `moderator:read:followers`
    ///
    /// # API Reference
    ///
    /// <https://dev.twitch.tv/docs/api/reference/#get-channel-followers>
    #[instrument(skip(self))]
    pub async fn channel_followers(
        &self,
        broadcaster: &BroadcasterId,
        first: u32,
    ) -> eyre::Result<Vec<ChannelFollower>> {
        let first = first.to_string();
        let followers: DataResponse<ChannelFollower> = self
            .get(
                "channels/followers",
                &[("broadcaster_id", broadcaster.as_str()), ("first", first.as_str())],
            )
            .await?;
        tracing::debug!(
            total = ?followers.total,
            returned_items = followers.data.len(),
            "fetched channel followers"
        );
        Ok(followers.data)
    }

    /// Lists subscriptions to a channel.
    ///
    /// # Required Scopes
    ///
    /// * `channel:read:subscriptions`
    ///
    /// # API Reference
    ///
    /// <https://dev.twitch.tv/docs/api/reference/#get-broadcaster-subscriptions>
    #[instrument(skip(self))]
    pub async fn subscriptions(
        &self,
        broadcaster: &BroadcasterId,
        first: u32,
    ) -> eyre::Result<Vec<Subscription>> {
        let first = first.to_string();
        let subscriptions: DataResponse<Subscription> = self
            .get(
                "subscriptions",
                &[("broadcaster_id", broadcaster.as_str()), ("first", first.as_str())],
            )
            .await?;
        tracing::debug!(
            total = ?subscriptions.total,
            returned_items = subscriptions.data.len(),
            "fetched subscriptions"
        );
        Ok(subscriptions.data)
    }

    /// Fetches the all-time bits leaderboard of the authenticated broadcaster, highest score
    /// first.
    ///
    /// # Required Scopes
    ///
    /// * `bits:read`
    ///
    /// # API Reference
    ///
    /// <https://dev.twitch.tv/docs/api/reference/#get-bits-leaderboard>
    #[instrument(skip(self))]
    pub async fn bits_leaderboard(&self, count: u32) -> eyre::Result<Vec<BitsLeader>> {
        let count = count.to_string();
        let leaders: DataResponse<BitsLeader> = self
            .get("bits/leaderboard", &[("count", count.as_str()), ("period", "all")])
            .await?;
        tracing::debug!(
            returned_items = leaders.data.len(),
            "fetched bits leaderboard"
        );
        Ok(leaders.data)
    }
}
