use std::collections::HashMap;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use tracing::instrument;

use super::{Batch, CounterStore, Op, StoreError, StoreResult};

/// $: `redis-server --port 6379 --save "300 10" --appendonly yes --appendfsync everysec`
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl core::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Opens a managed connection, erroring out if the server can't be reached.
    #[instrument]
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        tracing::debug!(redis_url, "connecting to redis server");

        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    #[instrument(skip(self, batch), fields(ops = batch.len()))]
    async fn apply(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.manager.clone();

        let mut pipe = ::redis::pipe();
        pipe.atomic();

        for op in batch.into_ops() {
            match op {
                Op::HashIncr { key, field, by } => {
                    pipe.hincr(key, field, by);
                }
                Op::HashSet { key, field, value } => {
                    pipe.hset(key, field, value);
                }
                Op::HashDel { key, field } => {
                    pipe.hdel(key, field);
                }
                Op::SetAdd { key, member } => {
                    pipe.sadd(key, member);
                }
                Op::RankingReplace { key, entries } => {
                    pipe.del(&key);
                    if !entries.is_empty() {
                        let items: Vec<(i64, String)> = entries
                            .into_iter()
                            .map(|(member, score)| (score, member))
                            .collect();
                        pipe.zadd_multiple(&key, items.as_slice());
                    }
                }
            }
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(|e| {
            tracing::error!(error = ?e, "counter batch failed");
            e
        })?;

        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<i64>> {
        let mut conn = self.manager.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        let mut conn = self.manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn ranking(&self, key: &str) -> StoreResult<Vec<(String, i64)>> {
        let mut conn = self.manager.clone();
        let raw: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;

        raw.into_iter()
            .map(|(member, score)| {
                if score.fract() != 0.0 {
                    return Err(StoreError::Malformed {
                        key: key.to_owned(),
                        reason: format!("non-integral score {score} for '{member}'"),
                    });
                }
                Ok((member, score as i64))
            })
            .collect()
    }

    async fn ranking_len(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.manager.clone();
        Ok(conn.zcard(key).await?)
    }
}
