//! End-to-end karma flows over the in-memory stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;

use crate::cron::TopContributorsJob;
use crate::karma::keys::KarmaKey;
use crate::karma::prelude::*;
use crate::store::{Batch, CounterStore, MemoryStore, StoreError, StoreResult};
use crate::titles::{AutoTitles, MemoryTitleStore, TitleStore};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn manager() -> KarmaManager {
    KarmaManager::new(Arc::new(MemoryStore::new()), ActionRegistry::with_defaults())
}

/// Store that refuses every call, standing in for an unreachable server.
struct UnreachableStore;

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn apply(&self, _batch: Batch) -> StoreResult<()> {
        Err(refused())
    }

    async fn hash_get(&self, _key: &str, _field: &str) -> StoreResult<Option<i64>> {
        Err(refused())
    }

    async fn hash_get_all(&self, _key: &str) -> StoreResult<HashMap<String, i64>> {
        Err(refused())
    }

    async fn set_members(&self, _key: &str) -> StoreResult<Vec<String>> {
        Err(refused())
    }

    async fn ranking(&self, _key: &str) -> StoreResult<Vec<(String, i64)>> {
        Err(refused())
    }

    async fn ranking_len(&self, _key: &str) -> StoreResult<usize> {
        Err(refused())
    }
}

fn refused() -> StoreError {
    StoreError::Redis(redis::RedisError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    )))
}

#[tokio::test]
async fn test_single_save_awards_registered_points() {
    let manager = manager();

    for (i, kind) in ActionKind::ALL.into_iter().enumerate() {
        let user = UserId(100 + i as i64);
        KarmaAction::today(kind, user).save(&manager).await.unwrap();

        assert_eq!(
            manager.total_points(user).await.unwrap(),
            kind.default_points()
        );
        assert_eq!(manager.total_count(kind, user).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_mixed_actions_sum_points() {
    let mut registry = ActionRegistry::new();
    registry
        .register(ActionKind::Answer, 3)
        .register(ActionKind::Solution, 7);
    let manager = KarmaManager::new(Arc::new(MemoryStore::new()), registry);
    let user = UserId(1);

    for kind in [ActionKind::Answer, ActionKind::Answer, ActionKind::Solution] {
        KarmaAction::today(kind, user).save(&manager).await.unwrap();
    }

    assert_eq!(manager.total_points(user).await.unwrap(), 13);
    assert_eq!(manager.total_count(ActionKind::Answer, user).await.unwrap(), 2);
    assert_eq!(manager.total_count(ActionKind::Solution, user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_period_buckets() {
    let manager = manager();
    let user = UserId(5);
    let kind = ActionKind::Answer;
    let today = date(2024, 6, 15);
    let yesterday = date(2024, 6, 14);

    KarmaAction::new(kind, user, today).save(&manager).await.unwrap();
    assert_eq!(manager.day_count(kind, user, today).await.unwrap(), 1);
    assert_eq!(manager.month_count(kind, user, today).await.unwrap(), 1);
    assert_eq!(manager.year_count(kind, user, today).await.unwrap(), 1);

    KarmaAction::new(kind, user, yesterday)
        .save(&manager)
        .await
        .unwrap();
    assert_eq!(manager.day_count(kind, user, today).await.unwrap(), 1);
    assert_eq!(manager.day_count(kind, user, yesterday).await.unwrap(), 1);
    assert_eq!(manager.month_count(kind, user, today).await.unwrap(), 2);
    assert_eq!(manager.year_count(kind, user, today).await.unwrap(), 2);

    assert_eq!(manager.day_points(user, today).await.unwrap(), 1);
    assert_eq!(manager.month_points(user, today).await.unwrap(), 2);
    assert_eq!(manager.year_points(user, date(2023, 6, 15)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_counters_read_as_zero() {
    let manager = manager();
    let user = UserId(77);

    assert_eq!(manager.total_points(user).await.unwrap(), 0);
    assert_eq!(manager.total_count(ActionKind::Solution, user).await.unwrap(), 0);
    assert_eq!(
        manager
            .count(DateRange::Week, Counter::Points, user, date(2024, 1, 1))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_unregistered_action_writes_nothing() {
    let mut registry = ActionRegistry::new();
    registry.register(ActionKind::Answer, 1);
    let manager = KarmaManager::new(Arc::new(MemoryStore::new()), registry);
    let user = UserId(3);

    let result = KarmaAction::today(ActionKind::Solution, user)
        .save(&manager)
        .await;

    assert!(matches!(
        result,
        Err(KarmaError::UnregisteredAction(ActionKind::Solution))
    ));
    assert_eq!(manager.total_points(user).await.unwrap(), 0);
    assert!(manager.users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_date_range_counts_only_window() {
    let manager = manager();
    let user = UserId(8);
    let today = date(2024, 3, 31);

    for d in [
        date(2024, 3, 31),
        date(2024, 3, 25),
        date(2024, 3, 24),
        date(2024, 3, 1),
        date(2023, 4, 30),
        date(2023, 3, 31),
    ] {
        KarmaAction::new(ActionKind::Solution, user, d)
            .save(&manager)
            .await
            .unwrap();
    }

    let count = |range| manager.count(range, Counter::Action(ActionKind::Solution), user, today);
    assert_eq!(count(DateRange::Week).await.unwrap(), 2);
    assert_eq!(count(DateRange::Month).await.unwrap(), 3);
    assert_eq!(count(DateRange::Year).await.unwrap(), 5);
    assert_eq!(count(DateRange::All).await.unwrap(), 6);

    let points = manager
        .count(DateRange::Week, Counter::Points, user, today)
        .await
        .unwrap();
    assert_eq!(points, 2 * 5);
}

#[tokio::test]
async fn test_recalculate_points_applies_new_values() {
    let manager = manager();
    let user = UserId(9);
    let today = date(2024, 5, 5);

    for kind in [
        ActionKind::Answer,
        ActionKind::Answer,
        ActionKind::Solution,
        ActionKind::HelpfulAnswer,
    ] {
        KarmaAction::new(kind, user, today).save(&manager).await.unwrap();
    }
    assert_eq!(manager.total_points(user).await.unwrap(), 1 + 1 + 5 + 1);

    let mut registry = ActionRegistry::with_defaults();
    registry
        .register(ActionKind::Answer, 2)
        .register(ActionKind::Solution, 10);
    let updated = manager.with_registry(registry);

    let total = updated.recalculate_points(user).await.unwrap();
    let expected = 2 * 2 + 10 + 1;
    assert_eq!(total, expected);
    assert_eq!(updated.total_points(user).await.unwrap(), expected);
    assert_eq!(updated.day_points(user, today).await.unwrap(), expected);
    assert_eq!(updated.year_points(user, today).await.unwrap(), expected);

    // counts themselves are untouched
    assert_eq!(updated.total_count(ActionKind::Answer, user).await.unwrap(), 2);
}

#[tokio::test]
async fn test_recalculate_drops_unregistered_kinds() {
    let manager = manager();
    let user = UserId(10);

    KarmaAction::today(ActionKind::Solution, user)
        .save(&manager)
        .await
        .unwrap();
    KarmaAction::today(ActionKind::Answer, user)
        .save(&manager)
        .await
        .unwrap();

    let mut registry = ActionRegistry::new();
    registry.register(ActionKind::Answer, 1);
    let updated = manager.with_registry(registry);

    assert_eq!(updated.recalculate_all().await.unwrap(), 1);
    assert_eq!(updated.total_points(user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_recalculate_removes_points_for_empty_periods() {
    let store = Arc::new(MemoryStore::new());
    let manager = KarmaManager::new(store.clone(), ActionRegistry::with_defaults());
    let user = UserId(1);
    let key = String::from(KarmaKey::User(user));

    KarmaAction::new(ActionKind::Answer, user, date(2024, 5, 5))
        .save(&manager)
        .await
        .unwrap();
    // points left behind for a day with no counts
    store
        .apply(Batch::new().hash_set(&key, "points:2023-05-05", 9))
        .await
        .unwrap();

    assert_eq!(manager.recalculate_points(user).await.unwrap(), 1);
    assert_eq!(store.hash_get(&key, "points:2023-05-05").await.unwrap(), None);
    assert_eq!(store.hash_get(&key, "points:2024-05-05").await.unwrap(), Some(1));
}

/// Lands a queued save right after the first full-hash read, between a recalculation's read and
/// its write.
struct InterleavingStore {
    inner: MemoryStore,
    saver: KarmaManager,
    pending: Mutex<Option<KarmaAction>>,
}

#[async_trait]
impl CounterStore for InterleavingStore {
    async fn apply(&self, batch: Batch) -> StoreResult<()> {
        self.inner.apply(batch).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<i64>> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        let fields = self.inner.hash_get_all(key).await?;

        let pending = self.pending.lock().unwrap().take();
        if let Some(action) = pending {
            if let Err(KarmaError::Store(e)) = action.save(&self.saver).await {
                return Err(e);
            }
        }

        Ok(fields)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.set_members(key).await
    }

    async fn ranking(&self, key: &str) -> StoreResult<Vec<(String, i64)>> {
        self.inner.ranking(key).await
    }

    async fn ranking_len(&self, key: &str) -> StoreResult<usize> {
        self.inner.ranking_len(key).await
    }
}

#[tokio::test]
async fn test_recalculate_keeps_points_of_concurrent_save() {
    let inner = MemoryStore::new();
    let user = UserId(2);
    let today = date(2024, 5, 5);

    let old = KarmaManager::new(Arc::new(inner.clone()), ActionRegistry::with_defaults());
    KarmaAction::new(ActionKind::Answer, user, today)
        .save(&old)
        .await
        .unwrap();

    let mut registry = ActionRegistry::with_defaults();
    registry.register(ActionKind::Answer, 2);
    let saver = old.with_registry(registry.clone());

    let store = InterleavingStore {
        inner: inner.clone(),
        saver,
        pending: Mutex::new(Some(KarmaAction::new(ActionKind::Answer, user, today))),
    };
    let manager = KarmaManager::new(Arc::new(store), registry);

    manager.recalculate_points(user).await.unwrap();

    // both answers are worth 2 now, including the one saved mid-recalculation
    assert_eq!(manager.total_count(ActionKind::Answer, user).await.unwrap(), 2);
    assert_eq!(manager.total_points(user).await.unwrap(), 2 * 2);
    assert_eq!(manager.day_points(user, today).await.unwrap(), 2 * 2);
}

#[tokio::test]
async fn test_top_users_sorted_with_id_tiebreak() {
    let manager = manager();
    let today = date(2024, 2, 2);

    // user 4: 10, user 2: 5, user 3: 5, user 1: 1
    let awards = [
        (4, ActionKind::Solution),
        (4, ActionKind::FirstAnswer),
        (3, ActionKind::Solution),
        (2, ActionKind::FirstAnswer),
        (1, ActionKind::Answer),
    ];
    for (user, kind) in awards {
        KarmaAction::new(kind, UserId(user), today)
            .save(&manager)
            .await
            .unwrap();
    }
    // zero-point actions don't put anyone on the board
    KarmaAction::new(ActionKind::NotHelpfulAnswer, UserId(50), today)
        .save(&manager)
        .await
        .unwrap();

    assert_eq!(manager.update_top_as_of(today).await.unwrap(), 5);

    let top = manager.top_users(25).await.unwrap();
    let rows: Vec<(i64, i64, u64)> = top
        .iter()
        .map(|e| (e.user_id.0, e.value, e.rank))
        .collect();
    assert_eq!(rows, vec![(4, 10, 1), (2, 5, 2), (3, 5, 3), (1, 1, 4)]);

    let page = manager
        .top_users_in(DateRange::All, Counter::Points, 2, 1)
        .await
        .unwrap();
    assert_eq!(page.iter().map(|e| e.user_id).collect::<Vec<_>>(), vec![UserId(2), UserId(3)]);

    assert_eq!(
        manager
            .ranking(DateRange::All, Counter::Points, UserId(3))
            .await
            .unwrap(),
        Some(3)
    );
    assert_eq!(
        manager
            .ranking(DateRange::All, Counter::Points, UserId(50))
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        manager
            .user_count(DateRange::All, Counter::Action(ActionKind::Solution))
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_leaderboard_is_truncated() {
    let manager = manager().with_leaderboard_size(3);
    let today = date(2024, 2, 2);

    for user in 1..=6 {
        KarmaAction::new(ActionKind::Answer, UserId(user), today)
            .save(&manager)
            .await
            .unwrap();
    }
    manager.update_top_as_of(today).await.unwrap();

    let top = manager.top_users(10).await.unwrap();
    assert_eq!(
        top.iter().map(|e| e.user_id).collect::<Vec<_>>(),
        vec![UserId(1), UserId(2), UserId(3)]
    );
}

#[tokio::test]
async fn test_weekly_leaderboard_excludes_old_actions() {
    let manager = manager();
    let today = date(2024, 8, 20);

    KarmaAction::new(ActionKind::Solution, UserId(1), date(2024, 8, 1))
        .save(&manager)
        .await
        .unwrap();
    KarmaAction::new(ActionKind::Answer, UserId(2), today)
        .save(&manager)
        .await
        .unwrap();
    manager.update_top_as_of(today).await.unwrap();

    let week = manager
        .top_users_in(DateRange::Week, Counter::Points, 10, 0)
        .await
        .unwrap();
    assert_eq!(week.iter().map(|e| e.user_id).collect::<Vec<_>>(), vec![UserId(2)]);

    let all = manager.top_users(10).await.unwrap();
    assert_eq!(all.iter().map(|e| e.user_id).collect::<Vec<_>>(), vec![UserId(1), UserId(2)]);
}

#[tokio::test]
async fn test_unreachable_store_fails_loudly() {
    let manager = KarmaManager::new(Arc::new(UnreachableStore), ActionRegistry::with_defaults());

    let saved = KarmaAction::today(ActionKind::Answer, UserId(1))
        .save(&manager)
        .await;
    assert!(matches!(saved, Err(KarmaError::Store(StoreError::Redis(_)))));

    assert!(matches!(
        manager.update_top().await,
        Err(KarmaError::Store(_))
    ));
}

#[tokio::test]
async fn test_contributor_job_assigns_and_replaces_titles() {
    let manager = manager();
    let titles = Arc::new(MemoryTitleStore::new());
    let job = TopContributorsJob::new(manager.clone(), titles.clone())
        .with_range(DateRange::All);
    let today = date(2024, 9, 1);

    // 30 users with distinct totals: user n has n answers
    let mut rng = rand::rng();
    let mut users: Vec<i64> = (1..=30).collect();
    for i in (1..users.len()).rev() {
        let j = rng.random_range(0..=i);
        users.swap(i, j);
    }
    for user in &users {
        for _ in 0..*user {
            KarmaAction::new(ActionKind::Answer, UserId(*user), today)
                .save(&manager)
                .await
                .unwrap();
        }
    }

    let assignment = job.run_once_as_of(today).await.unwrap();
    let expected_top10: Vec<UserId> = (21..=30).rev().map(UserId).collect();
    let expected_top25: Vec<UserId> = (6..=20).rev().map(UserId).collect();
    assert_eq!(assignment.top10, expected_top10);
    assert_eq!(assignment.top25, expected_top25);

    let names = AutoTitles::default();
    let top10 = titles.get(&names.top10).await.unwrap().unwrap();
    let top25 = titles.get(&names.top25).await.unwrap().unwrap();
    assert_eq!(top10.users.len(), 10);
    assert_eq!(top25.users.len(), 15);
    assert!(top10.is_auto && top25.is_auto);

    // idempotent on unchanged counts
    assert_eq!(job.run_once_as_of(today).await.unwrap(), assignment);

    // user 1 climbs to the top; user 21 drops into the top 25 and user 6 falls off the board
    for _ in 0..40 {
        KarmaAction::new(ActionKind::Answer, UserId(1), today)
            .save(&manager)
            .await
            .unwrap();
    }
    let assignment = job.run_once_as_of(today).await.unwrap();
    assert_eq!(assignment.top10[0], UserId(1));
    assert!(assignment.top25.contains(&UserId(21)));
    assert!(!assignment.top25.contains(&UserId(6)));

    let top10 = titles.get(&names.top10).await.unwrap().unwrap();
    let top25 = titles.get(&names.top25).await.unwrap().unwrap();
    assert!(top10.users.contains(&UserId(1)));
    assert!(!top10.users.contains(&UserId(21)));
    assert!(top25.users.contains(&UserId(21)));
    assert!(!top25.users.contains(&UserId(6)));
}

#[tokio::test]
async fn test_contributor_job_with_few_users() {
    let manager = manager();
    let titles = Arc::new(MemoryTitleStore::new());
    let today = date(2024, 9, 1);

    for user in [1, 2] {
        KarmaAction::new(ActionKind::Answer, UserId(user), today)
            .save(&manager)
            .await
            .unwrap();
    }

    let assignment = TopContributorsJob::new(manager, titles.clone())
        .run_once_as_of(today)
        .await
        .unwrap();
    assert_eq!(assignment.top10, vec![UserId(1), UserId(2)]);
    assert!(assignment.top25.is_empty());

    let names = AutoTitles::default();
    assert!(titles.get(&names.top25).await.unwrap().unwrap().users.is_empty());
}
