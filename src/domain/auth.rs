use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

impl Claims {
    #[must_use]
    pub const fn new(user_id: Uuid, exp: usize) -> Self {
        Self { sub: user_id, exp }
    }
}

/// A signed, encoded access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jwt(pub String);

impl Jwt {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
