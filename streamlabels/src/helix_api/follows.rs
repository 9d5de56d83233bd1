//! Twitch Channel Followers API types.

use jiff::Timestamp;
use serde::Deserialize;

/// A user following the broadcaster's channel.
///
/// See: <https://dev.twitch.tv/docs/api/reference/#get-channel-followers>
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelFollower {
    pub user_id: String,
    pub user_login: String,
    /// The follower's display name.
    pub user_name: String,
    /// When the user followed the channel.
    pub followed_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helix_api::DataResponse;

    #[test]
    fn parse_channel_followers_response() {
        let body = r#"{
          "total": 8,
          "data": [
            {
              "user_id": "11111",
              "user_name": "UserDisplayName",
              "user_login": "userloginname",
              "followed_at": "2022-05-24T22:22:08Z"
            }
          ],
          "pagination": {
            "cursor": "eyJiIjpudWxsLCJhIjp7Ik9mZnNldCI6NX19"
          }
        }"#;
        let followers: DataResponse<ChannelFollower> = serde_json::from_str(body).unwrap();
        assert_eq!(followers.total, Some(8));
        assert_eq!(followers.data.len(), 1);
        assert_eq!(followers.data[0].user_name, "UserDisplayName");
        assert_eq!(
            followers.data[0].followed_at,
            "2022-05-24T22:22:08Z".parse::<Timestamp>().unwrap()
        );
    }
}
