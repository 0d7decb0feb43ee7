use crate::adapters::database::records::UserRecord;
use crate::domain::user::User;
use crate::error::Result;
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct UserRepository {}

impl UserRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Inserts a user row.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the insert fails (for example on a duplicate username).
    #[tracing::instrument(level = "debug", skip(self, conn, user), fields(user_id = %user.id))]
    pub(crate) async fn create(&self, conn: &mut PgConnection, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, role, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id)
            .bind(&user.username)
            .bind(user.role.as_str())
            .bind(user.created_at)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Finds a user by ID.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_id(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT id, username, role, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;

        record.map(TryInto::try_into).transpose()
    }

    /// Finds every user in `ids`. Unknown IDs are skipped.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn, ids), fields(count = ids.len()))]
    pub(crate) async fn find_by_ids(&self, conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records =
            sqlx::query_as::<_, UserRecord>("SELECT id, username, role, created_at FROM users WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(conn)
                .await?;

        records.into_iter().map(TryInto::try_into).collect()
    }
}
