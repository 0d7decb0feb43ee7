use crate::adapters::database::records::CommunityRecord;
use crate::domain::community::Community;
use crate::error::Result;
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct CommunityRepository {}

impl CommunityRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_id(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<Community>> {
        let record =
            sqlx::query_as::<_, CommunityRecord>("SELECT id, name, moderator_id FROM communities WHERE id = $1")
                .bind(id)
                .fetch_optional(conn)
                .await?;

        Ok(record.map(Into::into))
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn is_subscribed(&self, conn: &mut PgConnection, community_id: Uuid, user_id: Uuid) -> Result<bool> {
        let subscribed: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM community_subscriptions WHERE community_id = $1 AND user_id = $2)",
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_one(conn)
        .await?;

        Ok(subscribed)
    }
}
