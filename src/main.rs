use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kitsune_karma::config::{self, KarmaEnv};
use kitsune_karma::cron::TopContributorsJob;
use kitsune_karma::karma::prelude::*;
use kitsune_karma::store::RedisStore;
use kitsune_karma::telemetry;
use kitsune_karma::titles::{MemoryTitleStore, PgTitleStore, TitleStore};

mod args;

use args::Command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let args = args::parse_cli_args();
    let env = KarmaEnv::load().context("reading configuration")?;

    let redis_url = args.redis_url.as_deref().unwrap_or(&env.redis_url);
    let store = RedisStore::connect(redis_url)
        .await
        .with_context(|| format!("connecting to redis at {redis_url}"))?;

    let mut registry = ActionRegistry::with_defaults();
    registry.apply_overrides(&config::points_overrides()?);

    let leaderboard_size = match args.leaderboard_size {
        Some(size) => usize::try_from(size).context("leaderboard size")?,
        None => env.karma_leaderboard_size,
    };
    let manager = KarmaManager::new(Arc::new(store), registry).with_leaderboard_size(leaderboard_size);

    let out = Output { json: args.json };

    match args.command {
        Command::Award { kind, users, date } => {
            let date = date.unwrap_or_else(today);
            let (sender, worker) = ActionWorker::spawn(manager.clone());
            for user in users {
                sender.record(KarmaAction::new(kind, user, date))?;
            }
            drop(sender);

            let report = worker.await?;
            if report.failed > 0 {
                anyhow::bail!("{} of {} actions failed to save", report.failed, report.saved + report.failed);
            }
            out.line(&serde_json::json!({ "kind": kind, "date": date, "saved": report.saved }), || {
                format!("saved {} '{kind}' action(s) on {date}", report.saved)
            })?;
        }

        Command::Points { user, date } => {
            let date = date.unwrap_or_else(today);
            let total = manager.total_points(user).await?;
            let year = manager.year_points(user, date).await?;
            let month = manager.month_points(user, date).await?;
            let day = manager.day_points(user, date).await?;

            out.line(
                &serde_json::json!({
                    "user_id": user,
                    "total": total,
                    "year": year,
                    "month": month,
                    "day": day,
                }),
                || format!("user {user}: {total} total, {year} this year, {month} this month, {day} on {date}"),
            )?;
        }

        Command::Count {
            user,
            counter,
            range,
            date,
        } => {
            let value = manager
                .count(range, counter, user, date.unwrap_or_else(today))
                .await?;

            out.line(
                &serde_json::json!({
                    "user_id": user,
                    "counter": counter,
                    "range": range,
                    "value": value,
                }),
                || format!("user {user}: {value} {counter} ({range})"),
            )?;
        }

        Command::Top {
            counter,
            range,
            count,
            offset,
        } => {
            let entries = manager.top_users_in(range, counter, count, offset).await?;

            if out.json {
                out.print_json(&entries)?;
            } else if entries.is_empty() {
                println!("no users on the {range} {counter} leaderboard; try `karma update-top`");
            } else {
                for entry in &entries {
                    println!("{:>4}. {:<12} {}", entry.rank, entry.user_id, entry.value);
                }
            }
        }

        Command::Rank {
            user,
            counter,
            range,
        } => {
            let rank = manager.ranking(range, counter, user).await?;
            let of = manager.user_count(range, counter).await?;

            out.line(
                &serde_json::json!({ "user_id": user, "rank": rank, "of": of }),
                || match rank {
                    Some(rank) => format!("user {user} is #{rank} of {of} on the {range} {counter} leaderboard"),
                    None => format!("user {user} is not on the {range} {counter} leaderboard"),
                },
            )?;
        }

        Command::UpdateTop { date } => {
            let users = manager.update_top_as_of(date.unwrap_or_else(today)).await?;
            out.line(&serde_json::json!({ "users": users }), || {
                format!("rebuilt leaderboards from {users} user(s)")
            })?;
        }

        Command::Recalculate { user } => match user {
            Some(user) => {
                let total = manager.recalculate_points(user).await?;
                out.line(&serde_json::json!({ "user_id": user, "total": total }), || {
                    format!("user {user} now has {total} point(s)")
                })?;
            }
            None => {
                let users = manager.recalculate_all().await?;
                out.line(&serde_json::json!({ "users": users }), || {
                    format!("recalculated points for {users} user(s)")
                })?;
            }
        },

        Command::Titles { user, groups } => {
            let titles = title_store(&args.database_url, &env).await?;
            let held = titles.titles_for(user, &groups).await?;

            if out.json {
                out.print_json(&held)?;
            } else if held.is_empty() {
                println!("user {user} holds no titles");
            } else {
                for title in &held {
                    println!("{}", title.name);
                }
            }
        }

        Command::Cron {
            every,
            scheduled,
            range,
            date,
        } => {
            let titles = title_store(&args.database_url, &env).await?;
            let range = match range {
                Some(range) => range,
                None => env.title_range()?,
            };
            let job = TopContributorsJob::new(manager, titles)
                .with_titles(env.auto_titles())
                .with_range(range);

            let every = every
                .map(Duration::from_secs)
                .or(scheduled.then(|| env.cron_interval()));

            match every {
                Some(every) => {
                    let cancel = CancellationToken::new();
                    let on_signal = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            info!("received ctrl-c, stopping");
                        }
                        on_signal.cancel();
                    });

                    job.run_scheduled(every, cancel).await;
                }
                None => {
                    let assignment = match date {
                        Some(date) => job.run_once_as_of(date).await?,
                        None => job.run_once().await?,
                    };

                    out.line(&assignment, || {
                        let ids = |users: &[UserId]| {
                            users.iter().map(UserId::to_string).collect::<Vec<_>>().join(", ")
                        };
                        format!("top 10: [{}]\ntop 25: [{}]", ids(&assignment.top10), ids(&assignment.top25))
                    })?;
                }
            }
        }
    }

    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Postgres when a database is configured, otherwise an in-memory store that forgets everything on
/// exit.
async fn title_store(flag: &Option<String>, env: &KarmaEnv) -> anyhow::Result<Arc<dyn TitleStore>> {
    let url = flag.as_deref().filter(|url| !url.is_empty()).or(env.database_url());

    match url {
        Some(url) => {
            let store = PgTitleStore::connect(url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL is not set; titles are kept in memory and lost on exit");
            Ok(Arc::new(MemoryTitleStore::new()))
        }
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn line<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            self.print_json(value)
        } else {
            println!("{}", text());
            Ok(())
        }
    }
}
