use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::karma::UserId;

pub mod memory;
pub mod postgres;

pub use memory::MemoryTitleStore;
pub use postgres::PgTitleStore;

pub const DEFAULT_TOP10_TITLE: &str = "Top 10 Contributor";
pub const DEFAULT_TOP25_TITLE: &str = "Top 25 Contributor";

pub type TitleResult<T> = core::result::Result<T, TitleError>;

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("sqlx-postgres error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("no title named '{0}'")]
    NotFound(String),

    #[error("a title named '{0}' already exists")]
    Duplicate(String),
}

pub type GroupId = i64;

/// Badge shown next to a user's name. Held directly by users, or by every member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Title {
    pub id: i64,
    pub name: String,
    /// Set for titles the contributor job hands out; holders get replaced on every run.
    pub is_auto: bool,
    pub users: BTreeSet<UserId>,
    pub groups: BTreeSet<GroupId>,
}

/// Names of the two titles the contributor job manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoTitles {
    pub top10: String,
    pub top25: String,
}

impl Default for AutoTitles {
    fn default() -> Self {
        Self {
            top10: DEFAULT_TOP10_TITLE.to_owned(),
            top25: DEFAULT_TOP25_TITLE.to_owned(),
        }
    }
}

#[async_trait]
pub trait TitleStore: Send + Sync {
    async fn create(&self, name: &str, is_auto: bool) -> TitleResult<Title>;

    async fn get(&self, name: &str) -> TitleResult<Option<Title>>;

    async fn add_user(&self, name: &str, user: UserId) -> TitleResult<()>;

    async fn remove_user(&self, name: &str, user: UserId) -> TitleResult<()>;

    async fn add_group(&self, name: &str, group: GroupId) -> TitleResult<()>;

    /// Makes `users` the only direct holders of `name`, creating it as an automatic title first if
    /// it doesn't exist yet.
    async fn replace_users(&self, name: &str, users: &[UserId]) -> TitleResult<()>;

    /// Titles `user` holds directly or through any of `groups`, ordered by name.
    async fn titles_for(&self, user: UserId, groups: &[GroupId]) -> TitleResult<Vec<Title>>;

    async fn set_top10_contributors(&self, names: &AutoTitles, users: &[UserId]) -> TitleResult<()> {
        self.replace_users(&names.top10, users).await
    }

    async fn set_top25_contributors(&self, names: &AutoTitles, users: &[UserId]) -> TitleResult<()> {
        self.replace_users(&names.top25, users).await
    }
}
