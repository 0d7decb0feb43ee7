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

use confide_server::adapters::ChatStore;
use confide_server::adapters::database::PgChatStore;
use confide_server::adapters::memory::MemoryChatStore;
use confide_server::api::MgmtState;
use confide_server::config::Config;
use confide_server::{AppBuilder, adapters, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    confide_server::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_server");
    let (api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx) = async {
        // Phase 1: Infrastructure Setup (Resources)
        let store: Arc<dyn ChatStore> = match &config.database.url {
            Some(url) => {
                let pool = adapters::database::init_pool(url, &config.database).await?;
                confide_server::run_migrations(&pool).await?;
                Arc::new(PgChatStore::new(pool))
            }
            None => {
                tracing::warn!("No database URL configured, keeping all state in memory");
                Arc::new(MemoryChatStore::new())
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        confide_server::spawn_signal_handler(shutdown_tx.clone());

        // Phase 2: Component Wiring
        let services = AppBuilder::new(config.clone()).with_store(store).build()?;
        let health_service = services.health_service.clone();

        // Phase 3: Runtime Setup (Listeners and Routers)
        let app_router = confide_server::api::app_router(config.clone(), services, shutdown_rx.clone());
        let mgmt_app = confide_server::api::mgmt_router(MgmtState { health_service });

        let api_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;

        tracing::info!(address = %api_addr, "listening");
        tracing::info!(address = %mgmt_addr, "management server listening");

        let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
        let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr).await?;

        Ok::<
            (
                tokio::net::TcpListener,
                tokio::net::TcpListener,
                axum::Router,
                axum::Router,
                watch::Sender<bool>,
                watch::Receiver<bool>,
            ),
            anyhow::Error,
        >((api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: Start Runtime
    let mut api_rx = shutdown_rx.clone();
    let api_server = axum::serve(api_listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = api_rx.wait_for(|&s| s).await;
        });

    let mut mgmt_rx = shutdown_rx.clone();
    let mgmt_server = axum::serve(mgmt_listener, mgmt_app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = mgmt_rx.wait_for(|&s| s).await;
        });

    let servers = async { tokio::try_join!(api_server, mgmt_server) };

    // Phase 5: Graceful Shutdown Orchestration
    // Open sessions close themselves once the flag flips; give them a bounded time to drain.
    let shutdown_timeout = std::time::Duration::from_secs(config.server.shutdown_timeout_secs);
    let mut drain_rx = shutdown_rx.clone();
    let drain_deadline = async move {
        let _ = drain_rx.wait_for(|&s| s).await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        res = servers => {
            if let Err(e) = res {
                tracing::error!(error = %e, "Server error");
            }
            tracing::info!("Servers stopped.");
        }
        () = drain_deadline => {
            tracing::warn!("Timeout waiting for connections to drain.");
        }
    }

    let _ = shutdown_tx.send(true);
    telemetry_guard.shutdown();
    Ok(())
}
