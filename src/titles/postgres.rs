use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use super::{GroupId, Title, TitleError, TitleResult, TitleStore};
use crate::karma::UserId;

#[derive(Debug, Clone, sqlx::FromRow)]
struct TitleRow {
    id: i64,
    name: String,
    is_auto: bool,
}

/// [`TitleStore`] backed by the `karma_title*` tables.
#[derive(Debug, Clone)]
pub struct PgTitleStore {
    pool: PgPool,
}

impl PgTitleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> TitleResult<Self> {
        tracing::debug!("connecting to postgres");
        let pool = PgPool::connect(database_url).await?;

        Ok(Self { pool })
    }

    /// Applies the embedded migrations under `migrations/`.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> TitleResult<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    async fn row(&self, name: &str) -> TitleResult<Option<TitleRow>> {
        Ok(sqlx::query_as::<_, TitleRow>(
            "SELECT id, name, is_auto FROM karma_title WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn id(&self, name: &str) -> TitleResult<i64> {
        self.row(name)
            .await?
            .map(|row| row.id)
            .ok_or_else(|| TitleError::NotFound(name.to_owned()))
    }

    async fn load(&self, row: TitleRow) -> TitleResult<Title> {
        let users = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM karma_title_user WHERE title_id = $1",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let groups = sqlx::query_scalar::<_, i64>(
            "SELECT group_id FROM karma_title_group WHERE title_id = $1",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Title {
            id: row.id,
            name: row.name,
            is_auto: row.is_auto,
            users: users.into_iter().map(UserId).collect(),
            groups: groups.into_iter().collect(),
        })
    }
}

#[async_trait]
impl TitleStore for PgTitleStore {
    #[instrument(skip(self))]
    async fn create(&self, name: &str, is_auto: bool) -> TitleResult<Title> {
        let row = sqlx::query_as::<_, TitleRow>(
            r#"
            INSERT INTO karma_title (name, is_auto)
            VALUES ($1, $2)
            RETURNING id, name, is_auto
            "#,
        )
        .bind(name)
        .bind(is_auto)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            if duplicate {
                TitleError::Duplicate(name.to_owned())
            } else {
                TitleError::Sqlx(e)
            }
        })?;

        self.load(row).await
    }

    async fn get(&self, name: &str) -> TitleResult<Option<Title>> {
        match self.row(name).await? {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn add_user(&self, name: &str, user: UserId) -> TitleResult<()> {
        let id = self.id(name).await?;
        sqlx::query(
            r#"
            INSERT INTO karma_title_user (title_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_user(&self, name: &str, user: UserId) -> TitleResult<()> {
        let id = self.id(name).await?;
        sqlx::query("DELETE FROM karma_title_user WHERE title_id = $1 AND user_id = $2")
            .bind(id)
            .bind(user)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_group(&self, name: &str, group: GroupId) -> TitleResult<()> {
        let id = self.id(name).await?;
        sqlx::query(
            r#"
            INSERT INTO karma_title_group (title_id, group_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(group)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, users), fields(holders = users.len()))]
    async fn replace_users(&self, name: &str, users: &[UserId]) -> TitleResult<()> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO karma_title (name, is_auto)
            VALUES ($1, true)
            ON CONFLICT (name)
            DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM karma_title_user WHERE title_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for user in users {
            sqlx::query(
                r#"
                INSERT INTO karma_title_user (title_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(*user)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(|e| {
            tracing::error!(error = ?e, "title holder replacement failed to commit");
            e
        })?;

        Ok(())
    }

    async fn titles_for(&self, user: UserId, groups: &[GroupId]) -> TitleResult<Vec<Title>> {
        let rows = sqlx::query_as::<_, TitleRow>(
            r#"
            SELECT DISTINCT t.id, t.name, t.is_auto
            FROM karma_title t
            LEFT JOIN karma_title_user u ON u.title_id = t.id
            LEFT JOIN karma_title_group g ON g.title_id = t.id
            WHERE u.user_id = $1 OR g.group_id = ANY($2)
            ORDER BY t.name
            "#,
        )
        .bind(user)
        .bind(groups)
        .fetch_all(&self.pool)
        .await?;

        let mut titles = Vec::with_capacity(rows.len());
        for row in rows {
            titles.push(self.load(row).await?);
        }

        Ok(titles)
    }
}
