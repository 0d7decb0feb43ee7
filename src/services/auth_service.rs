use crate::adapters::ChatStore;
use crate::config::AuthConfig;
use crate::domain::auth::{Claims, Jwt};
use crate::domain::user::User;
use crate::error::{AppError, Result};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    tokens_issued_total: Counter<u64>,
    auth_failures_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confide-server");
        Self {
            tokens_issued_total: meter
                .u64_counter("auth_tokens_issued_total")
                .with_description("Total number of access tokens issued")
                .build(),
            auth_failures_total: meter
                .u64_counter("auth_failures_total")
                .with_description("Total number of rejected credentials")
                .build(),
        }
    }
}

/// Issues and validates the bearer tokens that identify users.
#[derive(Clone, Debug)]
pub struct AuthService {
    config: AuthConfig,
    store: Arc<dyn ChatStore>,
    metrics: Metrics,
}

impl AuthService {
    #[must_use]
    pub fn new(config: AuthConfig, store: Arc<dyn ChatStore>) -> Self {
        Self { config, store, metrics: Metrics::new() }
    }

    /// Signs an access token for `user_id` valid for the configured TTL.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if encoding fails.
    #[tracing::instrument(err, skip(self), fields(user_id = %user_id))]
    pub fn issue_token(&self, user_id: Uuid) -> Result<Jwt> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let exp = usize::try_from(now.saturating_add(self.config.access_token_ttl_secs)).unwrap_or(usize::MAX);

        let jwt = self.encode_jwt(&Claims::new(user_id, exp))?;
        self.metrics.tokens_issued_total.add(1, &[]);
        Ok(jwt)
    }

    /// Verifies signature and expiry and returns the subject.
    ///
    /// # Errors
    /// Returns `AppError::Unauthenticated` for any invalid or expired token.
    pub fn verify_token(&self, jwt: &Jwt) -> Result<Uuid> {
        let token_data = decode::<Claims>(
            jwt.as_str(),
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            self.metrics.auth_failures_total.add(1, &[]);
            AppError::Unauthenticated
        })?;

        Ok(token_data.claims.sub)
    }

    /// Resolves a token to an existing user.
    ///
    /// # Errors
    /// Returns `AppError::Unauthenticated` if the token is invalid or names an unknown user.
    #[tracing::instrument(err(level = "debug"), skip(self, jwt), fields(user_id = tracing::field::Empty))]
    pub async fn authenticate(&self, jwt: &Jwt) -> Result<User> {
        let user_id = self.verify_token(jwt)?;
        tracing::Span::current().record("user_id", tracing::field::display(user_id));

        match self.store.find_user(user_id).await? {
            Some(user) => Ok(user),
            None => {
                tracing::warn!("Token subject does not exist");
                self.metrics.auth_failures_total.add(1, &[]);
                Err(AppError::Unauthenticated)
            }
        }
    }

    fn encode_jwt(&self, claims: &Claims) -> Result<Jwt> {
        let token = encode(&Header::default(), claims, &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()))
            .map_err(|_| AppError::Internal)?;

        Ok(Jwt(token))
    }
}
