use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{GroupId, Title, TitleError, TitleResult, TitleStore};
use crate::karma::UserId;

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    titles: BTreeMap<String, Title>,
}

impl State {
    fn get_mut(&mut self, name: &str) -> TitleResult<&mut Title> {
        self.titles
            .get_mut(name)
            .ok_or_else(|| TitleError::NotFound(name.to_owned()))
    }

    fn insert(&mut self, name: &str, is_auto: bool) -> &mut Title {
        self.next_id += 1;
        let title = Title {
            id: self.next_id,
            name: name.to_owned(),
            is_auto,
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
        };
        self.titles.entry(name.to_owned()).or_insert(title)
    }
}

/// [`TitleStore`] kept in process memory. Nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryTitleStore {
    state: Arc<RwLock<State>>,
}

impl MemoryTitleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TitleStore for MemoryTitleStore {
    async fn create(&self, name: &str, is_auto: bool) -> TitleResult<Title> {
        let mut state = self.state.write().await;
        if state.titles.contains_key(name) {
            return Err(TitleError::Duplicate(name.to_owned()));
        }
        Ok(state.insert(name, is_auto).clone())
    }

    async fn get(&self, name: &str) -> TitleResult<Option<Title>> {
        Ok(self.state.read().await.titles.get(name).cloned())
    }

    async fn add_user(&self, name: &str, user: UserId) -> TitleResult<()> {
        self.state.write().await.get_mut(name)?.users.insert(user);
        Ok(())
    }

    async fn remove_user(&self, name: &str, user: UserId) -> TitleResult<()> {
        self.state.write().await.get_mut(name)?.users.remove(&user);
        Ok(())
    }

    async fn add_group(&self, name: &str, group: GroupId) -> TitleResult<()> {
        self.state.write().await.get_mut(name)?.groups.insert(group);
        Ok(())
    }

    #[instrument(skip(self, users), fields(holders = users.len()))]
    async fn replace_users(&self, name: &str, users: &[UserId]) -> TitleResult<()> {
        let mut state = self.state.write().await;
        let title = if state.titles.contains_key(name) {
            state.get_mut(name)?
        } else {
            state.insert(name, true)
        };

        title.users = users.iter().copied().collect();
        Ok(())
    }

    async fn titles_for(&self, user: UserId, groups: &[GroupId]) -> TitleResult<Vec<Title>> {
        let state = self.state.read().await;
        Ok(state
            .titles
            .values()
            .filter(|t| t.users.contains(&user) || groups.iter().any(|g| t.groups.contains(g)))
            .cloned()
            .collect())
    }
}
