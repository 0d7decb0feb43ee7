use crate::config::WsConfig;
use crate::protocol::{PresenceStatus, ServerEvent};
use crate::services::gateway::Metrics;
use crate::services::gateway::channel::ChannelRegistry;
use crate::services::gateway::dispatcher::{ConnectionContext, EventDispatcher};
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

pub(crate) struct Session {
    pub(crate) ctx: ConnectionContext,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) registry: Arc<ChannelRegistry>,
    pub(crate) metrics: Metrics,
    pub(crate) config: WsConfig,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.ctx.user.id,
            conversation_id = %self.ctx.conversation_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.connection_id = %self.ctx.connection_id
        )
    )]
    pub(crate) async fn run(self) {
        let Self { ctx, socket, dispatcher, registry, metrics, config, mut shutdown_rx, .. } = self;

        metrics.active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        // The registry holds the only sender; eviction drops it and ends this session.
        let (outbound_tx, mut outbound_rx) = mpsc::channel(config.outbound_buffer_size);
        registry.join(ctx.conversation_id, ctx.connection_id, ctx.user.id, outbound_tx);
        dispatcher.announce_presence(&ctx, PresenceStatus::Online);

        let (mut ws_sink, mut ws_stream) = socket.split();

        let ping_interval = Duration::from_secs(config.ping_interval_secs);
        let idle_limit = ping_interval + Duration::from_secs(config.ping_timeout_secs);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                msg = ws_stream.next() => {
                    last_seen = Instant::now();
                    let reply = match msg {
                        Some(Ok(WsMessage::Text(text))) => dispatcher.handle_text(&ctx, text.as_str()).await,
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::debug!("Received unsupported binary frame");
                            Some(ServerEvent::Error { message: "Binary frames are not supported".into() })
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => None,
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "WebSocket read failed");
                            break;
                        }
                    };

                    if let Some(event) = reply
                        && !send_local(&mut ws_sink, &event).await
                    {
                        break;
                    }
                }

                msg = outbound_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if ws_sink.send(msg).await.is_err() { break; }
                        }
                        None => {
                            tracing::warn!("Evicted from channel");
                            break;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > idle_limit {
                        tracing::warn!("Heartbeat timed out");
                        break;
                    }
                    if ws_sink.send(WsMessage::Ping(Bytes::new())).await.is_err() { break; }
                }
            }
        }

        registry.leave(ctx.conversation_id, ctx.connection_id);
        dispatcher.announce_presence(&ctx, PresenceStatus::Offline);

        let _ = ws_sink.close().await;

        metrics.active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}

async fn send_local<S>(sink: &mut S, event: &ServerEvent) -> bool
where
    S: futures::Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sink.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode local reply");
            true
        }
    }
}
