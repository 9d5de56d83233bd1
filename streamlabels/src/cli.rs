use crate::labels::Label;
use clap::Parser;
use jiff::SignedDuration;
use std::path::PathBuf;
use std::time::Duration;

/// Keep text files with the newest follower, newest subscriber and bits leaderboard of a
/// Twitch channel up to date, for use as labels in streaming software.
#[derive(Parser, Debug)]
#[command(name = "streamlabels", version)]
pub struct Cli {
    /// Login name of the channel to track. Overrides `login` from the config file.
    pub channel_name: Option<String>,

    /// Write the newest follower to newest_followers.txt
    #[arg(long)]
    pub newest_follower: bool,

    /// Write the newest subscriber to newest_subscriber.txt
    #[arg(long)]
    pub newest_subscriber: bool,

    /// Write the all-time top 10 cheerers to bits_leaderboard.txt
    #[arg(long)]
    pub bits_leaderboard: bool,

    /// How often each label is refreshed, e.g. `1s`, `500ms` or `1m30s`
    #[arg(long, value_name = "DURATION", default_value = "1s", value_parser = parse_interval)]
    pub refresh_interval: Duration,

    /// Directory the label files are written to
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output: PathBuf,

    /// Forget the stored Twitch credentials and exit
    #[arg(long)]
    pub logout: bool,

    /// Path to config file (default: first config.toml found in /etc/streamlabels,
    /// ~/.config/streamlabels and the working directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// The labels requested on the command line.
    pub fn labels(&self) -> Vec<Label> {
        [
            (self.newest_follower, Label::NewestFollower),
            (self.newest_subscriber, Label::NewestSubscriber),
            (self.bits_leaderboard, Label::BitsLeaderboard),
        ]
        .into_iter()
        .filter_map(|(wanted, label)| wanted.then_some(label))
        .collect()
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let parsed: SignedDuration = s
        .parse()
        .map_err(|e| format!("invalid duration {s:?}: {e}"))?;
    let duration = Duration::try_from(parsed).map_err(|_| "duration must not be negative")?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["streamlabels", "--bits-leaderboard"]).unwrap();
        assert_eq!(cli.refresh_interval, Duration::from_secs(1));
        assert_eq!(cli.output, PathBuf::from("."));
        assert_eq!(cli.channel_name, None);
        assert!(!cli.logout);
        assert_eq!(cli.labels(), vec![Label::BitsLeaderboard]);
    }

    #[test]
    fn all_flags() {
        let cli = Cli::try_parse_from([
            "streamlabels",
            "somechannel",
            "--newest-follower",
            "--newest-subscriber",
            "--bits-leaderboard",
            "--refresh-interval",
            "1m30s",
            "--output",
            "/tmp/labels",
        ])
        .unwrap();
        assert_eq!(cli.channel_name.as_deref(), Some("somechannel"));
        assert_eq!(cli.refresh_interval, Duration::from_secs(90));
        assert_eq!(cli.output, PathBuf::from("/tmp/labels"));
        assert_eq!(
            cli.labels(),
            vec![
                Label::NewestFollower,
                Label::NewestSubscriber,
                Label::BitsLeaderboard
            ]
        );
    }

    #[test]
    fn no_labels_requested() {
        let cli = Cli::try_parse_from(["streamlabels"]).unwrap();
        assert!(cli.labels().is_empty());
    }

    #[test]
    fn logout_flag() {
        let cli = Cli::try_parse_from(["streamlabels", "--logout"]).unwrap();
        assert!(cli.logout);
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("2s").unwrap(), Duration::from_secs(2));
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("-1s").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn help_is_not_a_parse_failure() {
        let err = Cli::try_parse_from(["streamlabels", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
