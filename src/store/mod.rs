//! Storage contract for users and tokens.
//!
//! [`Store`] covers reads and the pre-flight scope check. Every write goes
//! through a [`StoreTx`] obtained from [`Store::begin`]: one all-or-nothing
//! unit that is rolled back when dropped without [`StoreTx::commit`]. That
//! drop behaviour is what makes a cancelled request leave no partial writes.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewToken, NewUser, Token, User};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A row referenced a parent that does not exist (or a parent still has children).
    #[error("foreign key constraint violated")]
    ForeignKeyViolation,

    #[error("unique constraint violated")]
    UniqueViolation,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open an atomic unit. Concurrent units are serializable.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// True iff a token with this id carries `scope` and is inside its validity
    /// window. Store failures read as `false`.
    async fn token_has_scope(&self, token_id: Uuid, scope: &str) -> bool;

    async fn get_token(&self, token_id: Uuid) -> Result<Option<Token>, StoreError>;

    async fn list_tokens(&self) -> Result<Vec<Token>, StoreError>;

    /// Fetch a user together with the tokens it owns.
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Same predicate as [`Store::token_has_scope`], evaluated inside the unit.
    async fn token_has_scope(&mut self, token_id: Uuid, scope: &str) -> bool;

    async fn insert_user(&mut self, user: &NewUser) -> Result<Uuid, StoreError>;

    async fn insert_token(&mut self, token: &NewToken) -> Result<Uuid, StoreError>;

    /// Returns the number of tokens removed.
    async fn delete_tokens_for_user(&mut self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Fails with `ForeignKeyViolation` while the user still owns tokens.
    async fn delete_user(&mut self, user_id: Uuid) -> Result<bool, StoreError>;

    async fn delete_token(&mut self, token_id: Uuid) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
