use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::Token;

/// A registry entry together with every token it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub tokens: Vec<Token>,
}
