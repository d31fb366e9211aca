use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{Batch, CounterStore, Op, StoreResult};

#[derive(Debug, Default)]
struct State {
    hashes: HashMap<String, HashMap<String, i64>>,
    sets: HashMap<String, BTreeSet<String>>,
    rankings: HashMap<String, Vec<(String, i64)>>,
}

/// In-process [`CounterStore`]. A batch is applied while holding the write lock, which gives the
/// same all-or-nothing visibility as a redis `MULTI`/`EXEC` block.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    #[instrument(skip(self, batch), fields(ops = batch.len()))]
    async fn apply(&self, batch: Batch) -> StoreResult<()> {
        let mut state = self.state.write().await;

        for op in batch.into_ops() {
            match op {
                Op::HashIncr { key, field, by } => {
                    *state
                        .hashes
                        .entry(key)
                        .or_default()
                        .entry(field)
                        .or_insert(0) += by;
                }
                Op::HashSet { key, field, value } => {
                    state.hashes.entry(key).or_default().insert(field, value);
                }
                Op::HashDel { key, field } => {
                    if let Some(hash) = state.hashes.get_mut(&key) {
                        hash.remove(&field);
                        if hash.is_empty() {
                            state.hashes.remove(&key);
                        }
                    }
                }
                Op::SetAdd { key, member } => {
                    state.sets.entry(key).or_default().insert(member);
                }
                Op::RankingReplace { key, entries } => {
                    if entries.is_empty() {
                        state.rankings.remove(&key);
                    } else {
                        state.rankings.insert(key, entries);
                    }
                }
            }
        }

        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<i64>> {
        let state = self.state.read().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).copied())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn ranking(&self, key: &str) -> StoreResult<Vec<(String, i64)>> {
        let state = self.state.read().await;
        Ok(state.rankings.get(key).cloned().unwrap_or_default())
    }

    async fn ranking_len(&self, key: &str) -> StoreResult<usize> {
        let state = self.state.read().await;
        Ok(state.rankings.get(key).map_or(0, Vec::len))
    }
}
