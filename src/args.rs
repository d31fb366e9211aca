use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use kitsune_karma::karma::{ActionKind, Counter, DateRange, UserId};

/// Karma scoring, leaderboards and top-contributor titles.
#[derive(Parser, Debug)]
#[command(name = "karma", version)]
pub struct Cli {
    /// Print JSON instead of plain text
    #[arg(long, global = true)]
    pub json: bool,

    /// Redis URL (overrides REDIS_URL)
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Postgres URL for titles (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Users kept per leaderboard snapshot (overrides KARMA_LEADERBOARD_SIZE)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub leaderboard_size: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Save one action for each of the given users
    Award {
        /// answer, first-answer, solution, helpful-answer or nothelpful-answer
        kind: ActionKind,

        #[arg(required = true)]
        users: Vec<UserId>,

        /// Day the action happened on (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show a user's points for all time and the current year, month and day
    Points {
        user: UserId,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show one counter of a user over a date range
    Count {
        user: UserId,

        /// `points` or an action kind
        #[arg(long, default_value = "points")]
        counter: Counter,

        /// all, 1y, 1m or 1w
        #[arg(long, default_value = "all")]
        range: DateRange,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show a leaderboard from the last snapshot
    Top {
        #[arg(long, default_value = "points")]
        counter: Counter,

        #[arg(long, default_value = "all")]
        range: DateRange,

        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show a user's position on a leaderboard
    Rank {
        user: UserId,

        #[arg(long, default_value = "points")]
        counter: Counter,

        #[arg(long, default_value = "all")]
        range: DateRange,
    },

    /// Rebuild every leaderboard snapshot
    UpdateTop {
        /// Rebuild as of this day instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Rebuild points from raw action counts with the current point values
    Recalculate {
        /// Only this user (defaults to everyone)
        #[arg(long)]
        user: Option<UserId>,
    },

    /// List the titles a user holds
    Titles {
        user: UserId,

        /// Groups the user belongs to
        #[arg(long = "group")]
        groups: Vec<i64>,
    },

    /// Assign the top-contributor titles
    Cron {
        /// Keep running, once every SECS seconds
        #[arg(long, value_name = "SECS", conflicts_with = "scheduled")]
        every: Option<u64>,

        /// Keep running on KARMA_CRON_INTERVAL_SECS
        #[arg(long)]
        scheduled: bool,

        /// Leaderboard window to award from (overrides KARMA_TITLE_RANGE)
        #[arg(long)]
        range: Option<DateRange>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

pub fn parse_cli_args() -> Cli {
    let args = Cli::parse();
    tracing::debug!(?args, "parsed command line");

    args
}
