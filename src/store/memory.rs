//! In-memory storage backend.
//!
//! Used by the test suite and by `serve --in-memory`. Data is lost on restart.
//! A transaction holds the table lock for its whole lifetime and works on a
//! staged copy, so units are fully serialized and a dropped unit discards its
//! copy untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreTx};
use crate::models::{NewToken, NewUser, Token, User};

#[derive(Debug, Clone)]
struct UserRecord {
    seq: u64,
    name: String,
    username: String,
}

#[derive(Debug, Clone)]
struct TokenRecord {
    seq: u64,
    token: Token,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    tokens: HashMap<Uuid, TokenRecord>,
    next_seq: u64,
}

impl Tables {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn token_has_scope(&self, token_id: Uuid, scope: &str) -> bool {
        self.tokens.get(&token_id).map_or(false, |r| {
            r.token.scope == scope && r.token.validity().contains(Utc::now())
        })
    }

    fn tokens_of(&self, user_id: Uuid) -> Vec<Token> {
        let mut owned: Vec<&TokenRecord> = self
            .tokens
            .values()
            .filter(|r| r.token.user_id == user_id)
            .collect();
        owned.sort_by_key(|r| r.seq);
        owned.into_iter().map(|r| r.token.clone()).collect()
    }

    fn user(&self, user_id: Uuid) -> Option<User> {
        self.users.get(&user_id).map(|r| User {
            id: user_id,
            name: r.name.clone(),
            username: r.username.clone(),
            tokens: self.tokens_of(user_id),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn token_has_scope(&self, token_id: Uuid, scope: &str) -> bool {
        self.tables.lock().await.token_has_scope(token_id, scope)
    }

    async fn get_token(&self, token_id: Uuid) -> Result<Option<Token>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.tokens.get(&token_id).map(|r| r.token.clone()))
    }

    async fn list_tokens(&self) -> Result<Vec<Token>, StoreError> {
        let tables = self.tables.lock().await;
        let mut records: Vec<&TokenRecord> = tables.tokens.values().collect();
        records.sort_by_key(|r| r.seq);
        Ok(records.into_iter().map(|r| r.token.clone()).collect())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.user(user_id))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().await;
        let mut ids: Vec<(u64, Uuid)> = tables.users.iter().map(|(id, r)| (r.seq, *id)).collect();
        ids.sort();
        Ok(ids.into_iter().filter_map(|(_, id)| tables.user(id)).collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn token_has_scope(&mut self, token_id: Uuid, scope: &str) -> bool {
        self.staged.token_has_scope(token_id, scope)
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<Uuid, StoreError> {
        if self.staged.users.values().any(|r| r.username == user.username) {
            return Err(StoreError::UniqueViolation);
        }

        let id = Uuid::new_v4();
        let seq = self.staged.seq();
        self.staged.users.insert(
            id,
            UserRecord {
                seq,
                name: user.name.clone(),
                username: user.username.clone(),
            },
        );
        Ok(id)
    }

    async fn insert_token(&mut self, token: &NewToken) -> Result<Uuid, StoreError> {
        if !self.staged.users.contains_key(&token.user_id) {
            return Err(StoreError::ForeignKeyViolation);
        }

        let id = Uuid::new_v4();
        let seq = self.staged.seq();
        self.staged.tokens.insert(
            id,
            TokenRecord {
                seq,
                token: Token {
                    id,
                    scope: token.scope.clone(),
                    user_id: token.user_id,
                    valid_from: token.validity.from,
                    valid_until: token.validity.until,
                },
            },
        );
        Ok(id)
    }

    async fn delete_tokens_for_user(&mut self, user_id: Uuid) -> Result<u64, StoreError> {
        let before = self.staged.tokens.len();
        self.staged.tokens.retain(|_, r| r.token.user_id != user_id);
        Ok((before - self.staged.tokens.len()) as u64)
    }

    async fn delete_user(&mut self, user_id: Uuid) -> Result<bool, StoreError> {
        if self.staged.tokens.values().any(|r| r.token.user_id == user_id) {
            return Err(StoreError::ForeignKeyViolation);
        }
        Ok(self.staged.users.remove(&user_id).is_some())
    }

    async fn delete_token(&mut self, token_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.staged.tokens.remove(&token_id).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
