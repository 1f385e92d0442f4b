//! Request bodies for the mutating operations.
//!
//! Every field is optional at the wire level so that a body with several
//! fields absent decodes successfully and `validate` can name all of them at
//! once instead of stopping at the first.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::Validity;

/// Required fields that were absent (or empty) in a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFields(pub Vec<&'static str>);

impl fmt::Display for MissingFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|field| format!("'{}' missing", field)).collect();
        f.write_str(&parts.join(", "))
    }
}

impl std::error::Error for MissingFields {}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserParams {
    pub name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub username: String,
}

impl AddUserParams {
    pub fn validate(self) -> Result<NewUser, MissingFields> {
        let username = present(self.username);
        let name = present(self.name);

        match (name, username) {
            (Some(name), Some(username)) => Ok(NewUser { name, username }),
            (name, username) => {
                let mut missing = Vec::new();
                if username.is_none() {
                    missing.push("username");
                }
                if name.is_none() {
                    missing.push("name");
                }
                Err(MissingFields(missing))
            }
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTokenParams {
    pub user_id: Option<Uuid>,
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToken {
    pub user_id: Uuid,
    pub scope: String,
    pub validity: Validity,
}

impl AddTokenParams {
    pub fn validate(self) -> Result<NewToken, MissingFields> {
        // The nil UUID is what an unset id decodes to in most clients.
        let user_id = self.user_id.filter(|id| !id.is_nil());
        let scope = present(self.scope);
        let validity = Validity {
            from: self.valid_from,
            until: self.valid_until,
        };

        match (user_id, scope) {
            (Some(user_id), Some(scope)) => Ok(NewToken {
                user_id,
                scope,
                validity,
            }),
            (user_id, scope) => {
                let mut missing = Vec::new();
                if user_id.is_none() {
                    missing.push("userId");
                }
                if scope.is_none() {
                    missing.push("scope");
                }
                Err(MissingFields(missing))
            }
        }
    }
}
