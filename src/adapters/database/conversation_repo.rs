use crate::adapters::database::records::{ConversationRecord, ParticipantRecord};
use crate::domain::conversation::Conversation;
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ConversationRepository {}

impl ConversationRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Loads a conversation with its participants.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_id(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, community_id, created_at, updated_at, last_message_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };
        let participants = self.participants_of(conn, &[record.id]).await?;
        Ok(Some(record.into_conversation(&participants)))
    }

    /// Finds the two-party conversation keyed on the unordered pair within `community_id`.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_direct(
        &self,
        conn: &mut PgConnection,
        first: Uuid,
        second: Uuid,
        community_id: Option<Uuid>,
    ) -> Result<Option<Uuid>> {
        let (low, high) = ordered_pair(first, second);
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT conversation_id
            FROM direct_conversations
            WHERE low_user_id = $1 AND high_user_id = $2 AND community_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(low)
        .bind(high)
        .bind(community_id)
        .fetch_optional(conn)
        .await?;

        Ok(id)
    }

    /// Registers `conversation_id` as the direct conversation of the pair.
    ///
    /// Returns `false` when another conversation already holds the key.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn claim_direct_key(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        first: Uuid,
        second: Uuid,
        community_id: Option<Uuid>,
    ) -> Result<bool> {
        let (low, high) = ordered_pair(first, second);
        let result = sqlx::query(
            r#"
            INSERT INTO direct_conversations (conversation_id, low_user_id, high_user_id, community_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(low)
        .bind(high)
        .bind(community_id)
        .execute(conn)
        .await
        .map_err(map_fk_violation)?;

        Ok(result.rows_affected() == 1)
    }

    /// Inserts the conversation row and one participant row per user.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if a participant or the community does not exist.
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, participants))]
    pub(crate) async fn create(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        participants: &[Uuid],
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, community_id, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            "#,
        )
        .bind(id)
        .bind(community_id)
        .bind(at)
        .execute(&mut *conn)
        .await
        .map_err(map_fk_violation)?;

        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
            SELECT $1, user_id, $3 FROM UNNEST($2::uuid[]) AS t(user_id)
            "#,
        )
        .bind(id)
        .bind(participants)
        .bind(at)
        .execute(conn)
        .await
        .map_err(map_fk_violation)?;

        Ok(())
    }

    /// Adds a participant to an existing conversation.
    ///
    /// # Errors
    /// Returns `AppError::ValidationFailed` if the user already participates.
    /// Returns `AppError::NotFound` if the user does not exist.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn add_participant(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *conn)
        .await
        .map_err(map_fk_violation)?;

        if result.rows_affected() == 0 {
            return Err(AppError::ValidationFailed("User is already a participant".into()));
        }

        sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(at)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Lists the conversations of a user, most recently active first.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn list_for_user(&self, conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.community_id, c.created_at, c.updated_at, c.last_message_at
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.last_message_at DESC NULLS LAST, c.updated_at DESC, c.id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let participants = self.participants_of(conn, &ids).await?;
        Ok(records.into_iter().map(|r| r.into_conversation(&participants)).collect())
    }

    /// Bumps the activity timestamps after a new message.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn touch_last_message(&self, conn: &mut PgConnection, id: Uuid, at: OffsetDateTime) -> Result<()> {
        sqlx::query("UPDATE conversations SET last_message_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn participants_of(&self, conn: &mut PgConnection, conversation_ids: &[Uuid]) -> Result<Vec<ParticipantRecord>> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT conversation_id, user_id, joined_at
            FROM conversation_participants
            WHERE conversation_id = ANY($1)
            ORDER BY joined_at ASC, user_id ASC
            "#,
        )
        .bind(conversation_ids)
        .fetch_all(conn)
        .await?;

        Ok(records)
    }
}

fn ordered_pair(first: Uuid, second: Uuid) -> (Uuid, Uuid) {
    if first <= second { (first, second) } else { (second, first) }
}

/// Foreign key violations mean a referenced user, community or conversation is missing.
pub(crate) fn map_fk_violation(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(e) if e.code().as_deref() == Some("23503") => AppError::NotFound,
        e => AppError::Database(e),
    }
}
