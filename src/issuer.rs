//! Creation and deletion of users and tokens.
//!
//! Each operation runs in a single store transaction that first re-checks the
//! caller's admin token. If the check fails the transaction is dropped before
//! any write, so a token revoked after the pre-flight check cannot be used.

use std::sync::Arc;

use uuid::Uuid;

use crate::authorizer::{mask, Authorizer, Decision};
use crate::errors::AppError;
use crate::models::{AddTokenParams, AddUserParams, NewToken, NewUser, Validity};
use crate::store::{Store, StoreError, StoreTx};

/// Create a user and an admin-scoped token for it in one transaction,
/// without any authorization. Operator path for issuing the first credential.
/// Returns `(user_id, token_id)`.
pub async fn bootstrap_admin(
    store: &dyn Store,
    user: &NewUser,
    admin_scope: &str,
) -> Result<(Uuid, Uuid), AppError> {
    let mut tx = store.begin().await?;

    let user_id = tx.insert_user(user).await.map_err(|e| match e {
        StoreError::UniqueViolation => AppError::DuplicateUsername(user.username.clone()),
        other => other.into(),
    })?;
    let token_id = tx
        .insert_token(&NewToken {
            user_id,
            scope: admin_scope.to_string(),
            validity: Validity::default(),
        })
        .await?;
    tx.commit().await?;

    tracing::info!("bootstrap: created admin user {} ({})", user_id, user.username);
    Ok((user_id, token_id))
}

#[derive(Clone)]
pub struct Issuer {
    store: Arc<dyn Store>,
    authorizer: Authorizer,
}

impl Issuer {
    pub fn new(store: Arc<dyn Store>, authorizer: Authorizer) -> Self {
        Self { store, authorizer }
    }

    /// Open a transaction and re-run the admin check inside it.
    async fn guarded(&self, presented: Option<Uuid>) -> Result<Box<dyn StoreTx>, AppError> {
        let mut tx = self.store.begin().await?;
        match self.authorizer.reauthorize_admin(tx.as_mut(), presented).await {
            Decision::Allowed => Ok(tx),
            Decision::Denied => {
                tracing::warn!("issuer: token {} lost admin scope before write", mask(presented));
                Err(AppError::Denied)
            }
        }
    }

    pub async fn add_user(
        &self,
        presented: Option<Uuid>,
        params: AddUserParams,
    ) -> Result<Uuid, AppError> {
        let mut tx = self.guarded(presented).await?;
        let user = params.validate()?;

        let id = match tx.insert_user(&user).await {
            Ok(id) => id,
            Err(StoreError::UniqueViolation) => {
                return Err(AppError::DuplicateUsername(user.username));
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await.map_err(|e| match e {
            StoreError::UniqueViolation => AppError::DuplicateUsername(user.username.clone()),
            other => other.into(),
        })?;

        tracing::info!("issuer: created user {} ({})", id, user.username);
        Ok(id)
    }

    pub async fn add_token(
        &self,
        presented: Option<Uuid>,
        params: AddTokenParams,
    ) -> Result<Uuid, AppError> {
        let mut tx = self.guarded(presented).await?;
        let token = params.validate()?;

        let id = match tx.insert_token(&token).await {
            Ok(id) => id,
            Err(StoreError::ForeignKeyViolation) => {
                return Err(AppError::NoSuchUser(token.user_id));
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await.map_err(|e| match e {
            StoreError::ForeignKeyViolation => AppError::NoSuchUser(token.user_id),
            other => other.into(),
        })?;

        tracing::info!(
            "issuer: created token {} with scope '{}' for user {}",
            mask(Some(id)),
            token.scope,
            token.user_id
        );
        Ok(id)
    }

    /// Remove a user and every token it owns. Deleting an absent user succeeds.
    pub async fn delete_user(&self, presented: Option<Uuid>, user_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.guarded(presented).await?;

        let tokens = tx.delete_tokens_for_user(user_id).await?;
        let existed = tx.delete_user(user_id).await?;
        tx.commit().await?;

        tracing::info!(
            "issuer: deleted user {} (existed: {}, tokens removed: {})",
            user_id,
            existed,
            tokens
        );
        Ok(())
    }

    /// Remove a single token. Deleting an absent token succeeds.
    pub async fn delete_token(&self, presented: Option<Uuid>, token_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.guarded(presented).await?;

        let existed = tx.delete_token(token_id).await?;
        tx.commit().await?;

        tracing::info!("issuer: deleted token {} (existed: {})", mask(Some(token_id)), existed);
        Ok(())
    }
}
