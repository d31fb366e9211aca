use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::karma::{Counter, DateRange, KarmaManager, KarmaResult, UserId};
use crate::titles::{AutoTitles, TitleStore};

pub const TOP10: usize = 10;
pub const TOP25: usize = 25;

/// Users given each automatic title by one run of [`TopContributorsJob`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TitleAssignment {
    pub top10: Vec<UserId>,
    pub top25: Vec<UserId>,
}

/// Rebuilds the leaderboards and hands the top-contributor titles to the current leaders.
pub struct TopContributorsJob {
    manager: KarmaManager,
    titles: Arc<dyn TitleStore>,
    names: AutoTitles,
    range: DateRange,
}

impl TopContributorsJob {
    pub fn new(manager: KarmaManager, titles: Arc<dyn TitleStore>) -> Self {
        Self {
            manager,
            titles,
            names: AutoTitles::default(),
            range: DateRange::Week,
        }
    }

    pub fn with_titles(mut self, names: AutoTitles) -> Self {
        self.names = names;
        self
    }

    /// Leaderboard window the titles are awarded from.
    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub async fn run_once(&self) -> KarmaResult<TitleAssignment> {
        self.run_once_as_of(Utc::now().date_naive()).await
    }

    #[instrument(skip(self), fields(range = %self.range))]
    pub async fn run_once_as_of(&self, today: NaiveDate) -> KarmaResult<TitleAssignment> {
        self.manager.update_top_as_of(today).await?;

        let leaders: Vec<UserId> = self
            .manager
            .top_users_in(self.range, Counter::Points, TOP25, 0)
            .await?
            .into_iter()
            .map(|entry| entry.user_id)
            .collect();

        let split = leaders.len().min(TOP10);
        let assignment = TitleAssignment {
            top10: leaders[..split].to_vec(),
            top25: leaders[split..].to_vec(),
        };

        self.titles
            .set_top10_contributors(&self.names, &assignment.top10)
            .await?;
        self.titles
            .set_top25_contributors(&self.names, &assignment.top25)
            .await?;

        info!(
            top10 = assignment.top10.len(),
            top25 = assignment.top25.len(),
            "assigned top contributor titles"
        );

        Ok(assignment)
    }

    /// Runs the job on every tick until `cancel` fires. The first run happens straight away.
    ///
    /// A failed run is logged and the schedule carries on.
    pub async fn run_scheduled(&self, every: Duration, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(every_secs = every.as_secs(), "top contributor job scheduled");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("top contributor job cancelled");
                    break;
                }

                _ = tick.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "top contributor job failed");
                    }
                }
            }
        }
    }
}
