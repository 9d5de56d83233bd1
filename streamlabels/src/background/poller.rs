use crate::labels::LabelSource;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The label text differs from the previous poll and was written.
    Changed,
    /// The label text is the same as before and was written again.
    Unchanged,
    /// The label could not be fetched; the file was left alone.
    FetchFailed,
    /// The label was fetched but the file could not be written.
    WriteFailed,
}

/// Keeps one label file in sync with its [`LabelSource`].
#[derive(Debug)]
pub struct Poller<S> {
    source: S,
    path: PathBuf,
    /// Text written by the last successful tick.
    last: Option<String>,
}

impl<S: LabelSource> Poller<S> {
    /// Creates a poller writing into `output_dir` under the label's file name.
    pub fn new(source: S, output_dir: &Path) -> Self {
        let path = output_dir.join(source.label().file_name());
        Self {
            source,
            path,
            last: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches the label once and overwrites the file with it.
    ///
    /// Failures are logged and reported through the outcome; the file keeps its previous content.
    pub async fn tick(&mut self) -> TickOutcome {
        let label = self.source.label().name();
        let text = match self.source.fetch().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    label,
                    path = %self.path.display(),
                    error = %e,
                    "failed to fetch label"
                );
                return TickOutcome::FetchFailed;
            }
        };

        let changed = self.last.as_deref() != Some(text.as_str());
        if changed {
            tracing::info!(label, value = %text, "label changed");
        }

        if let Err(e) = tokio::fs::write(&self.path, &text).await {
            tracing::warn!(
                label,
                path = %self.path.display(),
                error = %e,
                "failed to write label file"
            );
            return TickOutcome::WriteFailed;
        }

        tracing::trace!(label, path = %self.path.display(), "wrote label file");
        self.last = Some(text);
        if changed {
            TickOutcome::Changed
        } else {
            TickOutcome::Unchanged
        }
    }

    /// Polls every `period`, starting one period from now, forever.
    pub async fn run(mut self, period: Duration) {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            label = self.source.label().name(),
            path = %self.path.display(),
            ?period,
            "starting label poller"
        );
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
