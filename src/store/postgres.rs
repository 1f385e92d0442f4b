use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreError, StoreTx};
use crate::config::DatabaseTarget;
use crate::models::{NewToken, NewUser, Token, User};

const TOKEN_COLUMNS: &str = "id, scope, user_id, valid_from, valid_until";

const IN_WINDOW: &str =
    "(valid_from IS NULL OR valid_from <= NOW()) AND (valid_until IS NULL OR valid_until > NOW())";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                ErrorKind::ForeignKeyViolation => return StoreError::ForeignKeyViolation,
                ErrorKind::UniqueViolation => return StoreError::UniqueViolation,
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    username: String,
}

impl UserRow {
    fn with_tokens(self, tokens: Vec<Token>) -> User {
        User {
            id: self.id,
            name: self.name,
            username: self.username,
            tokens,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(target: &DatabaseTarget) -> anyhow::Result<Self> {
        let pool = match target {
            DatabaseTarget::Url(url) => PgPool::connect(url).await?,
            DatabaseTarget::Parts(opts) => {
                let connect = PgConnectOptions::new()
                    .host(&opts.host)
                    .port(opts.port)
                    .database(&opts.database)
                    .username(&opts.user)
                    .password(&opts.password);
                PgPoolOptions::new().connect_with(connect).await?
            }
        };
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Multi-statement reads run in one snapshot so a user is never seen with a
    /// token list from a different moment.
    async fn snapshot(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn token_has_scope(&self, token_id: Uuid, scope: &str) -> bool {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM tokens WHERE id = $1 AND scope = $2 AND {})",
            IN_WINDOW
        );
        match sqlx::query_scalar::<_, bool>(&sql)
            .bind(token_id)
            .bind(scope)
            .fetch_one(&self.pool)
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("token_has_scope failed, denying: {}", e);
                false
            }
        }
    }

    async fn get_token(&self, token_id: Uuid) -> Result<Option<Token>, StoreError> {
        let sql = format!("SELECT {} FROM tokens WHERE id = $1", TOKEN_COLUMNS);
        let row = sqlx::query_as::<_, Token>(&sql)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_tokens(&self) -> Result<Vec<Token>, StoreError> {
        let sql = format!("SELECT {} FROM tokens ORDER BY created_at, id", TOKEN_COLUMNS);
        let rows = sqlx::query_as::<_, Token>(&sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let mut tx = self.snapshot().await?;

        let row = sqlx::query_as::<_, UserRow>("SELECT id, name, username FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {} FROM tokens WHERE user_id = $1 ORDER BY created_at, id",
            TOKEN_COLUMNS
        );
        let tokens = sqlx::query_as::<_, Token>(&sql)
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(row.with_tokens(tokens)))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut tx = self.snapshot().await?;

        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, username FROM users ORDER BY created_at, id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let sql = format!("SELECT {} FROM tokens ORDER BY created_at, id", TOKEN_COLUMNS);
        let tokens = sqlx::query_as::<_, Token>(&sql).fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let mut by_user: HashMap<Uuid, Vec<Token>> = HashMap::new();
        for token in tokens {
            by_user.entry(token.user_id).or_default().push(token);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let tokens = by_user.remove(&row.id).unwrap_or_default();
                row.with_tokens(tokens)
            })
            .collect())
    }
}

/// A SERIALIZABLE transaction. Dropping it without `commit` rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn token_has_scope(&mut self, token_id: Uuid, scope: &str) -> bool {
        // FOR SHARE makes a concurrent revoke of this token wait for us (or us for it).
        let sql = format!(
            "SELECT id FROM tokens WHERE id = $1 AND scope = $2 AND {} FOR SHARE",
            IN_WINDOW
        );
        match sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(token_id)
            .bind(scope)
            .fetch_optional(&mut *self.tx)
            .await
        {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!("token_has_scope failed inside transaction, denying: {}", e);
                false
            }
        }
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (name, username) VALUES ($1, $2) RETURNING id",
        )
        .bind(&user.name)
        .bind(&user.username)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_token(&mut self, token: &NewToken) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO tokens (scope, user_id, valid_from, valid_until)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(&token.scope)
        .bind(token.user_id)
        .bind(token.validity.from)
        .bind(token.validity.until)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn delete_tokens_for_user(&mut self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_user(&mut self, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_token(&mut self, token_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(token_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
