use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use super::action::{ActionKind, UserId};
use super::KarmaError;

pub const KEY_PREFIX: &str = "karma:";
pub const TOTAL: &str = "total";
pub const POINTS: &str = "points";

/// Keys the manager reads and writes in the counting store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KarmaKey {
    /// Per-user hash holding every counter for that user.
    User(UserId),
    /// Set of every user id that has saved an action.
    Users,
    /// Leaderboard snapshot for one range and counter.
    Top(DateRange, Counter),
}

impl From<KarmaKey> for String {
    fn from(value: KarmaKey) -> Self {
        match value {
            KarmaKey::User(id) => format!("{}user:{}", KEY_PREFIX, id),
            KarmaKey::Users => format!("{}users", KEY_PREFIX),
            KarmaKey::Top(range, counter) => format!("{}top:{}:{}", KEY_PREFIX, range, counter),
        }
    }
}

impl fmt::Display for KarmaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from(*self))
    }
}

/// What a count or leaderboard measures: points, or how many times an action happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Counter {
    Points,
    Action(ActionKind),
}

impl Counter {
    pub fn field_prefix(&self) -> &'static str {
        match self {
            Counter::Points => POINTS,
            Counter::Action(kind) => kind.as_str(),
        }
    }

    pub fn field(&self, bucket: &Bucket) -> String {
        format!("{}:{}", self.field_prefix(), bucket)
    }

    pub fn total_field(&self) -> String {
        self.field(&Bucket::Total)
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_prefix())
    }
}

impl FromStr for Counter {
    type Err = KarmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == POINTS {
            return Ok(Counter::Points);
        }
        s.parse::<ActionKind>()
            .map(Counter::Action)
            .map_err(|_| KarmaError::UnknownCounter(s.to_owned()))
    }
}

impl From<Counter> for String {
    fn from(value: Counter) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Counter {
    type Error = KarmaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionKind> for Counter {
    fn from(value: ActionKind) -> Self {
        Counter::Action(value)
    }
}

/// Time bucket a counter field is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Total,
    Year(NaiveDate),
    Month(NaiveDate),
    Day(NaiveDate),
}

impl Bucket {
    /// Every bucket a single action on `date` increments.
    pub fn all_for(date: NaiveDate) -> [Bucket; 4] {
        [
            Bucket::Total,
            Bucket::Year(date),
            Bucket::Month(date),
            Bucket::Day(date),
        ]
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Total => f.write_str(TOTAL),
            Bucket::Year(d) => write!(f, "{}", d.format("%Y")),
            Bucket::Month(d) => write!(f, "{}", d.format("%Y-%m")),
            Bucket::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Window a count or leaderboard covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DateRange {
    All,
    /// Twelve calendar months, ending with the current one.
    Year,
    /// Thirty days, ending today.
    Month,
    /// Seven days, ending today.
    Week,
}

impl DateRange {
    pub const ALL: [DateRange; 4] = [
        DateRange::All,
        DateRange::Year,
        DateRange::Month,
        DateRange::Week,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::All => "all",
            DateRange::Year => "1y",
            DateRange::Month => "1m",
            DateRange::Week => "1w",
        }
    }

    /// Buckets whose sum gives this range's value as of `today`.
    pub fn buckets(&self, today: NaiveDate) -> Vec<Bucket> {
        match self {
            DateRange::All => vec![Bucket::Total],
            DateRange::Year => {
                let first_of_month = today.with_day(1).unwrap_or(today);
                (0..12)
                    .filter_map(|n| first_of_month.checked_sub_months(Months::new(n)))
                    .map(Bucket::Month)
                    .collect()
            }
            DateRange::Month => days_back(today, 30),
            DateRange::Week => days_back(today, 7),
        }
    }
}

fn days_back(today: NaiveDate, days: u64) -> Vec<Bucket> {
    (0..days)
        .filter_map(|n| today.checked_sub_days(Days::new(n)))
        .map(Bucket::Day)
        .collect()
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateRange {
    type Err = KarmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|range| range.as_str() == s)
            .ok_or_else(|| KarmaError::UnknownRange(s.to_owned()))
    }
}

impl From<DateRange> for String {
    fn from(value: DateRange) -> Self {
        value.as_str().to_owned()
    }
}

impl TryFrom<String> for DateRange {
    type Error = KarmaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Splits a user-hash field into its counter prefix and bucket suffix.
///
/// Returns `None` for fields that don't follow the `<prefix>:<bucket>` shape.
pub fn split_field(field: &str) -> Option<(&str, &str)> {
    field.split_once(':')
}
