use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use super::action::{ActionKind, KarmaAction, UserId};
use super::keys::{self, Bucket, Counter, DateRange, KarmaKey};
use super::registry::ActionRegistry;
use super::{KarmaError, KarmaResult};
use crate::store::{Batch, CounterStore, StoreError};

pub const DEFAULT_LEADERBOARD_SIZE: usize = 250;

/// One row of a leaderboard. `rank` starts at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub value: i64,
    pub rank: u64,
}

/// Reads and writes karma counters and leaderboards through a [`CounterStore`].
#[derive(Clone)]
pub struct KarmaManager {
    store: Arc<dyn CounterStore>,
    registry: Arc<ActionRegistry>,
    leaderboard_size: usize,
}

impl core::fmt::Debug for KarmaManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KarmaManager")
            .field("registry", &self.registry)
            .field("leaderboard_size", &self.leaderboard_size)
            .finish_non_exhaustive()
    }
}

impl KarmaManager {
    pub fn new(store: Arc<dyn CounterStore>, registry: ActionRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
        }
    }

    /// Caps how many users each leaderboard snapshot keeps.
    pub fn with_leaderboard_size(mut self, size: usize) -> Self {
        self.leaderboard_size = size;
        self
    }

    /// Same store, different point values. Follow with [`Self::recalculate_all`] to bring stored
    /// points in line.
    pub fn with_registry(&self, registry: ActionRegistry) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::new(registry),
            leaderboard_size: self.leaderboard_size,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn leaderboard_size(&self) -> usize {
        self.leaderboard_size
    }

    // ---
    //  Writes
    // ---

    /// Bumps every counter `action` touches in one atomic batch.
    #[instrument(skip(self, action), fields(user_id = %action.user(), kind = %action.kind(), date = %action.date()))]
    pub async fn save_action(&self, action: &KarmaAction) -> KarmaResult<()> {
        let kind = action.kind();
        let points = self
            .registry
            .points(kind)
            .ok_or(KarmaError::UnregisteredAction(kind))?;

        let key = String::from(KarmaKey::User(action.user()));
        let mut batch = Batch::new();
        for bucket in Bucket::all_for(action.date()) {
            batch = batch
                .hash_incr(&key, &Counter::Points.field(&bucket), points)
                .hash_incr(&key, &Counter::Action(kind).field(&bucket), 1);
        }
        batch = batch.set_add(&String::from(KarmaKey::Users), &action.user().to_string());

        self.store.apply(batch).await?;
        tracing::debug!(points, "saved karma action");

        Ok(())
    }

    /// Rebuilds every `points:*` field of `user` from their raw action counts and the current
    /// registry. Returns the new all-time total.
    ///
    /// Fields are corrected by increment rather than overwritten, so a save landing between the
    /// read and the write keeps its points. Periods left without any counts are deleted outright;
    /// a save into such a period at that moment loses its points until the next recalculation.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn recalculate_points(&self, user: UserId) -> KarmaResult<i64> {
        let key = String::from(KarmaKey::User(user));
        let fields = self.store.hash_get_all(&key).await?;

        let mut points: HashMap<&str, i64> = HashMap::new();
        for (field, count) in &fields {
            let Some((prefix, bucket)) = keys::split_field(field) else {
                continue;
            };
            if prefix == keys::POINTS {
                continue;
            }
            // counts for kinds that aren't scored anymore are worth nothing
            let value = prefix
                .parse::<ActionKind>()
                .ok()
                .and_then(|kind| self.registry.points(kind))
                .unwrap_or(0);

            *points.entry(bucket).or_insert(0) += value * count;
        }

        let mut batch = Batch::new();
        for field in fields.keys() {
            if let Some((keys::POINTS, bucket)) = keys::split_field(field) {
                if !points.contains_key(bucket) {
                    batch = batch.hash_del(&key, field);
                }
            }
        }
        for (bucket, value) in &points {
            let field = format!("{}:{}", keys::POINTS, bucket);
            let stored = fields.get(&field).copied().unwrap_or(0);
            if *value != stored {
                batch = batch.hash_incr(&key, &field, value - stored);
            }
        }

        if !batch.is_empty() {
            self.store.apply(batch).await?;
        }

        let total = points.get(keys::TOTAL).copied().unwrap_or(0);
        tracing::debug!(total, "recalculated karma points");

        Ok(total)
    }

    /// Runs [`Self::recalculate_points`] for every known user, returning how many were processed.
    #[instrument(skip(self))]
    pub async fn recalculate_all(&self) -> KarmaResult<usize> {
        let users = self.users().await?;
        for user in &users {
            self.recalculate_points(*user).await?;
        }

        info!(users = users.len(), "recalculated karma points for all users");
        Ok(users.len())
    }

    /// Rebuilds every leaderboard snapshot as of today (UTC).
    pub async fn update_top(&self) -> KarmaResult<usize> {
        self.update_top_as_of(Utc::now().date_naive()).await
    }

    /// Rebuilds the snapshot for each date range crossed with `points` and every registered kind.
    /// Each snapshot is swapped in with its own batch. Returns how many users were scanned.
    #[instrument(skip(self))]
    pub async fn update_top_as_of(&self, today: NaiveDate) -> KarmaResult<usize> {
        let users = self.users().await?;

        let mut hashes = Vec::with_capacity(users.len());
        for user in &users {
            let fields = self
                .store
                .hash_get_all(&String::from(KarmaKey::User(*user)))
                .await?;
            hashes.push((*user, fields));
        }

        let counters: Vec<Counter> = core::iter::once(Counter::Points)
            .chain(self.registry.kinds().map(Counter::Action))
            .collect();

        for range in DateRange::ALL {
            let buckets = range.buckets(today);

            for counter in &counters {
                let mut entries: Vec<(UserId, i64)> = hashes
                    .iter()
                    .map(|(user, fields)| (*user, sum_buckets(fields, *counter, &buckets)))
                    .filter(|(_, value)| *value > 0)
                    .collect();

                sort_leaderboard(&mut entries);
                entries.truncate(self.leaderboard_size);

                let key = String::from(KarmaKey::Top(range, *counter));
                let snapshot = entries
                    .into_iter()
                    .map(|(user, value)| (user.to_string(), value))
                    .collect();

                self.store
                    .apply(Batch::new().ranking_replace(&key, snapshot))
                    .await?;
            }
        }

        info!(users = users.len(), %today, "rebuilt karma leaderboards");
        Ok(users.len())
    }

    // ---
    //  Reads
    // ---

    async fn field(&self, user: UserId, field: &str) -> KarmaResult<i64> {
        let key = String::from(KarmaKey::User(user));
        Ok(self.store.hash_get(&key, field).await?.unwrap_or(0))
    }

    pub async fn total_points(&self, user: UserId) -> KarmaResult<i64> {
        self.field(user, &Counter::Points.total_field()).await
    }

    pub async fn total_count(&self, kind: ActionKind, user: UserId) -> KarmaResult<i64> {
        self.field(user, &Counter::Action(kind).total_field()).await
    }

    pub async fn day_count(
        &self,
        kind: ActionKind,
        user: UserId,
        date: NaiveDate,
    ) -> KarmaResult<i64> {
        self.field(user, &Counter::Action(kind).field(&Bucket::Day(date)))
            .await
    }

    pub async fn month_count(
        &self,
        kind: ActionKind,
        user: UserId,
        date: NaiveDate,
    ) -> KarmaResult<i64> {
        self.field(user, &Counter::Action(kind).field(&Bucket::Month(date)))
            .await
    }

    pub async fn year_count(
        &self,
        kind: ActionKind,
        user: UserId,
        date: NaiveDate,
    ) -> KarmaResult<i64> {
        self.field(user, &Counter::Action(kind).field(&Bucket::Year(date)))
            .await
    }

    pub async fn day_points(&self, user: UserId, date: NaiveDate) -> KarmaResult<i64> {
        self.field(user, &Counter::Points.field(&Bucket::Day(date)))
            .await
    }

    pub async fn month_points(&self, user: UserId, date: NaiveDate) -> KarmaResult<i64> {
        self.field(user, &Counter::Points.field(&Bucket::Month(date)))
            .await
    }

    pub async fn year_points(&self, user: UserId, date: NaiveDate) -> KarmaResult<i64> {
        self.field(user, &Counter::Points.field(&Bucket::Year(date)))
            .await
    }

    /// Value of `counter` for `user` over `range`, as of `today`.
    pub async fn count(
        &self,
        range: DateRange,
        counter: Counter,
        user: UserId,
        today: NaiveDate,
    ) -> KarmaResult<i64> {
        let key = String::from(KarmaKey::User(user));
        let fields = self.store.hash_get_all(&key).await?;

        Ok(sum_buckets(&fields, counter, &range.buckets(today)))
    }

    /// Every user that has ever saved an action, ascending by id.
    pub async fn users(&self) -> KarmaResult<Vec<UserId>> {
        let key = String::from(KarmaKey::Users);
        let mut users = self
            .store
            .set_members(&key)
            .await?
            .into_iter()
            .map(|member| {
                member.parse::<UserId>().map_err(|e| StoreError::Malformed {
                    key: key.clone(),
                    reason: format!("bad user id '{member}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        users.sort();
        Ok(users)
    }

    /// All-time points leaderboard, best first.
    pub async fn top_users(&self, count: usize) -> KarmaResult<Vec<LeaderboardEntry>> {
        self.top_users_in(DateRange::All, Counter::Points, count, 0)
            .await
    }

    /// A page of the last snapshot built by [`Self::update_top`].
    #[instrument(skip(self))]
    pub async fn top_users_in(
        &self,
        range: DateRange,
        counter: Counter,
        count: usize,
        offset: usize,
    ) -> KarmaResult<Vec<LeaderboardEntry>> {
        Ok(self
            .leaderboard(range, counter)
            .await?
            .into_iter()
            .skip(offset)
            .take(count)
            .collect())
    }

    /// 1-based position of `user`, or `None` when they aren't on the leaderboard.
    pub async fn ranking(
        &self,
        range: DateRange,
        counter: Counter,
        user: UserId,
    ) -> KarmaResult<Option<u64>> {
        Ok(self
            .leaderboard(range, counter)
            .await?
            .into_iter()
            .find(|entry| entry.user_id == user)
            .map(|entry| entry.rank))
    }

    /// Number of users on a leaderboard.
    pub async fn user_count(&self, range: DateRange, counter: Counter) -> KarmaResult<usize> {
        let key = String::from(KarmaKey::Top(range, counter));
        Ok(self.store.ranking_len(&key).await?)
    }

    async fn leaderboard(
        &self,
        range: DateRange,
        counter: Counter,
    ) -> KarmaResult<Vec<LeaderboardEntry>> {
        let key = String::from(KarmaKey::Top(range, counter));

        let mut entries = self
            .store
            .ranking(&key)
            .await?
            .into_iter()
            .map(|(member, value)| {
                member
                    .parse::<UserId>()
                    .map(|user| (user, value))
                    .map_err(|e| StoreError::Malformed {
                        key: key.clone(),
                        reason: format!("bad user id '{member}': {e}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // the store hands members back in its own order; re-rank the same way the snapshot was built
        sort_leaderboard(&mut entries);

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(i, (user_id, value))| LeaderboardEntry {
                user_id,
                value,
                rank: i as u64 + 1,
            })
            .collect())
    }
}

fn sum_buckets(fields: &HashMap<String, i64>, counter: Counter, buckets: &[Bucket]) -> i64 {
    buckets
        .iter()
        .map(|bucket| fields.get(&counter.field(bucket)).copied().unwrap_or(0))
        .sum()
}

/// Highest value first; equal values go to the lower user id.
fn sort_leaderboard(entries: &mut [(UserId, i64)]) {
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
}
