use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis client error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("malformed value under '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// A single write against the counting store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    HashIncr { key: String, field: String, by: i64 },
    HashSet { key: String, field: String, value: i64 },
    HashDel { key: String, field: String },
    SetAdd { key: String, member: String },
    /// Drops whatever is stored under `key` and writes `entries` in its place.
    RankingReplace { key: String, entries: Vec<(String, i64)> },
}

/// Writes that a [`CounterStore`] applies as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_incr(mut self, key: &str, field: &str, by: i64) -> Self {
        self.ops.push(Op::HashIncr {
            key: key.to_owned(),
            field: field.to_owned(),
            by,
        });
        self
    }

    pub fn hash_set(mut self, key: &str, field: &str, value: i64) -> Self {
        self.ops.push(Op::HashSet {
            key: key.to_owned(),
            field: field.to_owned(),
            value,
        });
        self
    }

    pub fn hash_del(mut self, key: &str, field: &str) -> Self {
        self.ops.push(Op::HashDel {
            key: key.to_owned(),
            field: field.to_owned(),
        });
        self
    }

    pub fn set_add(mut self, key: &str, member: &str) -> Self {
        self.ops.push(Op::SetAdd {
            key: key.to_owned(),
            member: member.to_owned(),
        });
        self
    }

    pub fn ranking_replace(mut self, key: &str, entries: Vec<(String, i64)>) -> Self {
        self.ops.push(Op::RankingReplace {
            key: key.to_owned(),
            entries,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

/// Key/value backend holding karma counters and leaderboard snapshots.
///
/// Every operation inside a single [`Batch`] is applied atomically: either all of them land or
/// none do. Nothing is guaranteed across separate calls to [`CounterStore::apply`].
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn apply(&self, batch: Batch) -> StoreResult<()>;

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<i64>>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Every `(member, score)` pair stored under a ranking key, in no particular order.
    async fn ranking(&self, key: &str) -> StoreResult<Vec<(String, i64)>>;

    /// Number of members stored under a ranking key.
    async fn ranking_len(&self, key: &str) -> StoreResult<usize>;
}
