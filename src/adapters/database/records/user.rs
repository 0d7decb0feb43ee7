use crate::domain::user::{Role, User};
use crate::error::AppError;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) role: String,
    pub(crate) created_at: OffsetDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = AppError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        let role = record.role.parse::<Role>().map_err(|e| {
            tracing::error!(user_id = %record.id, error = %e, "Stored user has an invalid role");
            AppError::Internal
        })?;
        Ok(Self { id: record.id, username: record.username, role, created_at: record.created_at })
    }
}
