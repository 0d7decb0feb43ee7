#![allow(dead_code)]

use confide_server::adapters::ChatStore;
use confide_server::adapters::database::{DbPool, init_pool};
use confide_server::adapters::memory::MemoryChatStore;
use confide_server::api::{MgmtState, ServiceContainer};
use confide_server::config::Config;
use confide_server::domain::community::Community;
use confide_server::domain::conversation::Conversation;
use confide_server::domain::user::{Role, User};
use confide_server::{AppBuilder, api, run_migrations};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Once};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

static INIT: Once = Once::new();

pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("confide_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Connects to `DATABASE_URL` and applies the migrations.
///
/// Returns `None` when the variable is unset, so Postgres-backed tests are
/// skipped on machines without a database.
pub async fn get_test_pool() -> Option<DbPool> {
    setup_tracing();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL is not set, skipping Postgres-backed test");
        return None;
    };

    let config = get_test_config();
    let pool = init_pool(&database_url, &config.database).await.expect("Failed to connect to DB. Is Postgres running?");
    run_migrations(&pool).await.expect("Failed to run migrations");
    Some(pool)
}

pub fn get_test_config() -> Config {
    let mut config = Config::parse_from(["confide-server", "--jwt-secret", "test_secret"]);
    config.database.url = None;
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.mgmt_port = 0;
    config.websocket.outbound_buffer_size = 32;
    config.websocket.admission_timeout_secs = 5;
    config
}

pub fn generate_username(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

pub struct TestUser {
    pub user: User,
    pub token: String,
}

impl TestUser {
    pub const fn id(&self) -> Uuid {
        self.user.id
    }
}

pub struct TestApp {
    pub server_url: String,
    pub ws_url: String,
    pub mgmt_url: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryChatStore>,
    pub services: ServiceContainer,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let store = Arc::new(MemoryChatStore::new());
        let services =
            AppBuilder::new(config.clone()).with_store(store.clone() as Arc<dyn ChatStore>).build().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mgmt_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mgmt_addr = mgmt_listener.local_addr().unwrap();

        let app = api::app_router(config, services.clone(), shutdown_rx.clone());
        let mgmt = api::mgmt_router(MgmtState { health_service: services.health_service.clone() });

        let mut api_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = api_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });
        let mut mgmt_rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(mgmt_listener, mgmt)
                .with_graceful_shutdown(async move {
                    let _ = mgmt_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self {
            server_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws/chat"),
            mgmt_url: format!("http://{mgmt_addr}"),
            client: reqwest::Client::new(),
            store,
            services,
            shutdown_tx,
        }
    }

    pub fn register_user(&self, prefix: &str, role: Role) -> TestUser {
        let user = User::new(generate_username(prefix), role);
        self.store.insert_user(user.clone()).unwrap();
        let token = self.services.auth_service.issue_token(user.id).unwrap().as_str().to_string();
        TestUser { user, token }
    }

    pub fn create_community(&self, moderator: &TestUser, subscribers: &[&TestUser]) -> Community {
        let community = Community::new(generate_username("community"), moderator.id());
        self.store.insert_community(community.clone()).unwrap();
        for subscriber in subscribers {
            self.store.subscribe(community.id, subscriber.id()).unwrap();
        }
        community
    }

    pub async fn create_conversation(&self, members: &[&TestUser]) -> Conversation {
        let ids: Vec<Uuid> = members.iter().map(|m| m.id()).collect();
        self.store.create_conversation(Uuid::now_v7(), &ids, None, OffsetDateTime::now_utc()).await.unwrap()
    }

    /// Connects and waits until the session has joined its channel.
    pub async fn connect_ws(&self, conversation_id: Uuid, token: &str) -> TestWsClient {
        let url = format!("{}/{}?token={}", self.ws_url, conversation_id, token);
        let (stream, _) = tokio_tungstenite::connect_async(url).await.expect("Failed to connect");
        let mut client = TestWsClient { stream };
        client.send_json(&serde_json::json!({"type": "ping"})).await;
        client.next_event_of("pong").await;
        client
    }

    /// Attempts a handshake and returns the HTTP status of a refused upgrade.
    pub async fn ws_refusal_status(&self, url: String) -> u16 {
        match tokio_tungstenite::connect_async(url).await {
            Ok(_) => panic!("Connection was accepted"),
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
            Err(e) => panic!("Unexpected handshake error: {e}"),
        }
    }
}

pub struct TestWsClient {
    pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    pub async fn send_json(&mut self, value: &Value) {
        self.stream.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    pub async fn receive_raw_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
        tokio::time::timeout(timeout, self.stream.next()).await.ok().flatten()
    }

    /// Next JSON event within `timeout`, skipping control frames.
    pub async fn receive_event_timeout(&mut self, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.stream.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)))) => {}
                Ok(Some(Ok(Message::Binary(bin)))) => panic!("Unexpected binary frame: {bin:?}"),
                Ok(Some(Ok(Message::Close(_)) | Err(_)) | None) | Err(_) => return None,
            }
        }
    }

    /// Waits for the next event of `event_type`, skipping any other events.
    pub async fn next_event_of(&mut self, event_type: &str) -> Value {
        loop {
            let event = self
                .receive_event_timeout(RECEIVE_TIMEOUT)
                .await
                .unwrap_or_else(|| panic!("Timed out waiting for '{event_type}'"));
            if event["type"] == event_type {
                return event;
            }
        }
    }

    /// Asserts no event of `event_type` arrives within `window`.
    pub async fn assert_no_event_of(&mut self, event_type: &str, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.receive_event_timeout(remaining).await {
                Some(event) => assert_ne!(event["type"], event_type, "Unexpected event: {event}"),
                None => return,
            }
        }
    }
}
