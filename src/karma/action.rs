use core::fmt;
use core::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::manager::KarmaManager;
use super::{KarmaError, KarmaResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        UserId(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(UserId)
    }
}

/// Every event that can earn a user karma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Posted an answer to a question.
    Answer,
    /// Posted the first answer to a question.
    FirstAnswer,
    /// Had an answer picked as the solution.
    Solution,
    HelpfulAnswer,
    #[serde(rename = "nothelpful-answer")]
    NotHelpfulAnswer,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Answer,
        ActionKind::FirstAnswer,
        ActionKind::Solution,
        ActionKind::HelpfulAnswer,
        ActionKind::NotHelpfulAnswer,
    ];

    /// Name used in store keys and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Answer => "answer",
            ActionKind::FirstAnswer => "first-answer",
            ActionKind::Solution => "solution",
            ActionKind::HelpfulAnswer => "helpful-answer",
            ActionKind::NotHelpfulAnswer => "nothelpful-answer",
        }
    }

    pub fn default_points(&self) -> i64 {
        match self {
            ActionKind::Answer => 1,
            ActionKind::FirstAnswer => 5,
            ActionKind::Solution => 5,
            ActionKind::HelpfulAnswer => 1,
            ActionKind::NotHelpfulAnswer => 0,
        }
    }

    /// Suffix of the `KARMA_POINTS_*` variable overriding this kind's value.
    pub fn env_name(&self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }

    pub fn from_env_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.env_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = KarmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| KarmaError::UnknownAction(s.to_owned()))
    }
}

/// A single scored event: `user` did `kind` on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KarmaAction {
    kind: ActionKind,
    user: UserId,
    date: NaiveDate,
}

impl KarmaAction {
    pub fn new(kind: ActionKind, user: UserId, date: NaiveDate) -> Self {
        Self { kind, user, date }
    }

    pub fn today(kind: ActionKind, user: UserId) -> Self {
        Self::new(kind, user, Utc::now().date_naive())
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Records the action against `manager`'s store.
    pub async fn save(&self, manager: &KarmaManager) -> KarmaResult<()> {
        manager.save_action(self).await
    }
}
