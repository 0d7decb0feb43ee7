#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod services;
pub mod telemetry;

use crate::adapters::ChatStore;
use crate::adapters::database::DbPool;
use crate::api::ServiceContainer;
use crate::config::Config;
use crate::services::auth_service::AuthService;
use crate::services::conversation_service::ConversationService;
use crate::services::delivery_tracker::DeliveryTracker;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use std::sync::Arc;
use tokio::sync::watch;

/// Applies pending schema migrations.
///
/// # Errors
/// Returns `sqlx::migrate::MigrateError` if a migration fails.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Flips the shutdown flag on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through `tracing` so they reach the configured exporters.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        tracing::error!(panic = %info, %location, "Thread panicked");
        default_hook(info);
    }));
}

/// Wires the services on top of a message store.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn ChatStore>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, store: None }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// # Errors
    /// Returns an error if no store was provided.
    pub fn build(self) -> anyhow::Result<ServiceContainer> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("A message store is required"))?;
        let config = self.config;

        let delivery = DeliveryTracker::new(Arc::clone(&store));
        let message_service = MessageService::new(Arc::clone(&store), delivery.clone(), &config.messaging);
        let conversation_service =
            ConversationService::new(Arc::clone(&store), message_service.clone(), delivery);
        let auth_service = AuthService::new(config.auth.clone(), Arc::clone(&store));
        let gateway_service = GatewayService::new(
            auth_service.clone(),
            conversation_service.clone(),
            message_service.clone(),
            config.websocket,
        );
        let health_service = HealthService::new(store);

        Ok(ServiceContainer { auth_service, conversation_service, message_service, gateway_service, health_service })
    }
}
