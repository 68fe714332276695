use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::protocol::{ClientCommand, ServerEvent, WebSocketResponse};
use crate::pomodoro::{Engine, Phase, Subscription, TimerState};
use crate::store::AudioStore;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SharedEngine = Arc<Mutex<Engine>>;

pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Engine> {
    // Listener panics are caught inside the engine, so poisoning leaves it consistent.
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a connection needs: the engine, the audio store and the
/// event fan-out shared by all clients.
#[derive(Clone)]
pub struct ServerContext {
    engine: SharedEngine,
    store: AudioStore,
    events: broadcast::Sender<ServerEvent>,
}

impl ServerContext {
    /// Also subscribes a finish listener that forwards completions to clients.
    pub fn new(engine: SharedEngine, store: AudioStore) -> (Self, Subscription) {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let finished_tx = events.clone();
        let listeners = lock_engine(&engine).listeners();
        let subscription = listeners.subscribe(move |phase: Phase| {
            // No receivers just means no clients are connected.
            let _ = finished_tx.send(ServerEvent::Finished { phase });
        });
        (
            Self {
                engine,
                store,
                events,
            },
            subscription,
        )
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn publish_state(&self, state: TimerState) {
        let _ = self.events.send(ServerEvent::State { state });
    }

    fn apply(&self, command: ClientCommand) -> TimerState {
        let state = {
            let mut engine = lock_engine(&self.engine);
            command.apply(&mut engine);
            engine.snapshot()
        };
        self.publish_state(state.clone());
        state
    }
}

/// A reply, optionally followed by a binary frame.
struct Outgoing {
    reply: WebSocketResponse,
    binary: Option<Vec<u8>>,
}

impl From<WebSocketResponse> for Outgoing {
    fn from(reply: WebSocketResponse) -> Self {
        Self {
            reply,
            binary: None,
        }
    }
}

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "WebSocket server listening");
    Ok(listener)
}

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, ctx: ServerContext) -> Result<(), ServerError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        info!(%peer_addr, "new WebSocket connection");
        tokio::spawn(handle_connection(stream, peer_addr, ctx.clone()));
    }
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer_addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    debug!(%peer_addr, "WebSocket handshake completed");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut events = ctx.subscribe_events();
    let mut pending_upload: Option<String> = None;

    let initial = ServerEvent::State {
        state: lock_engine(&ctx.engine).snapshot(),
    };
    if send_json(&mut ws_sender, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        let outgoing = match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(command) => {
                                debug!(%peer_addr, ?command, "received command");
                                handle_command(&ctx, command, &mut pending_upload).await
                            }
                            Err(e) => {
                                warn!(%peer_addr, error = %e, "failed to parse message");
                                WebSocketResponse::error(format!("Parse error: {}", e)).into()
                            }
                        };
                        if let Err(e) = send_outgoing(&mut ws_sender, outgoing).await {
                            warn!(%peer_addr, error = %e, "failed to send WebSocket response");
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        let reply = match pending_upload.take() {
                            Some(name) => match ctx.store.store(&name, &data).await {
                                Ok(()) => WebSocketResponse::ok(format!("Stored {}", name)),
                                Err(e) => WebSocketResponse::error(e.to_string()),
                            },
                            None => WebSocketResponse::error("Unexpected binary frame"),
                        };
                        if send_json(&mut ws_sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!(%peer_addr, "WebSocket connection closed by peer");
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            warn!(%peer_addr, error = %e, "failed to send pong");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%peer_addr, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if send_json(&mut ws_sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%peer_addr, skipped, "client fell behind on events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(%peer_addr, "WebSocket connection terminated");
}

async fn handle_command(
    ctx: &ServerContext,
    command: ClientCommand,
    pending_upload: &mut Option<String>,
) -> Outgoing {
    match command {
        ClientCommand::ListFiles => match ctx.store.list().await {
            Ok(files) => WebSocketResponse {
                success: true,
                files: Some(files),
                ..Default::default()
            }
            .into(),
            Err(e) => WebSocketResponse::error(e.to_string()).into(),
        },
        ClientCommand::FetchFile { name } => match ctx.store.fetch(&name).await {
            Ok(file) => Outgoing {
                reply: WebSocketResponse {
                    success: true,
                    message: Some(file.name),
                    mime: Some(file.mime),
                    ..Default::default()
                },
                binary: Some(file.bytes),
            },
            Err(e) => WebSocketResponse::error(e.to_string()).into(),
        },
        ClientCommand::UploadFile { name } => {
            let reply = WebSocketResponse::ok(format!("Send {} as a binary frame", name));
            *pending_upload = Some(name);
            reply.into()
        }
        command => WebSocketResponse::with_state(ctx.apply(command)).into(),
    }
}

async fn send_outgoing(
    ws_sender: &mut WsSender,
    outgoing: Outgoing,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    send_json(ws_sender, &outgoing.reply).await?;
    if let Some(bytes) = outgoing.binary {
        ws_sender.send(Message::Binary(bytes)).await?;
    }
    Ok(())
}

async fn send_json<T: serde::Serialize>(
    ws_sender: &mut WsSender,
    value: &T,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match serde_json::to_string(value) {
        Ok(json) => ws_sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize outgoing message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pomodoro::Durations;
    use futures_util::Stream;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    async fn spawn_server(dir: &std::path::Path) -> (SocketAddr, ServerContext) {
        let engine = Arc::new(Mutex::new(Engine::new(Durations::default(), true, 4)));
        let (ctx, _subscription) = ServerContext::new(engine, AudioStore::new(dir));
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, ctx.clone()));
        (addr, ctx)
    }

    async fn next_message<S>(ws: &mut S) -> Message
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message should arrive")
            .expect("stream open")
            .expect("valid frame")
    }

    /// Skips broadcast events until a command reply shows up.
    async fn next_reply<S>(ws: &mut S) -> Value
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            if let Message::Text(text) = next_message(ws).await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value.get("success").is_some() {
                    return value;
                }
            }
        }
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let held = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = held.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { addr: a, .. } if a == addr));
        assert!(err.to_string().starts_with(&format!("failed to bind {}", addr)));
    }

    #[test]
    fn accept_failures_surface_as_io_errors() {
        let err: ServerError = std::io::Error::other("too many open files").into();
        assert!(matches!(err, ServerError::Io(_)));
        assert_eq!(err.to_string(), "server I/O error: too many open files");
    }

    #[tokio::test]
    async fn commands_drive_the_shared_engine() {
        let tmp = TempDir::new().unwrap();
        let (addr, ctx) = spawn_server(tmp.path()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let Message::Text(initial) = next_message(&mut ws).await else {
            panic!("expected text frame");
        };
        let initial: Value = serde_json::from_str(&initial).unwrap();
        assert_eq!(initial["type"], "state");
        assert_eq!(initial["state"]["phase"], "IDLE");

        ws.send(Message::Text(r#"{"action":"start","phase":"WORK","minutes":10}"#.into()))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply["success"], true);
        assert_eq!(reply["state"]["phase"], "WORK");
        assert_eq!(reply["state"]["isRunning"], true);
        assert_eq!(reply["state"]["remainingMs"], 600_000);

        assert!(lock_engine(ctx.engine()).state().is_running);

        ws.send(Message::Text("not json".into())).await.unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply["success"], false);
        assert!(reply["message"].as_str().unwrap().starts_with("Parse error"));
    }

    #[tokio::test]
    async fn finish_listener_reaches_clients() {
        let tmp = TempDir::new().unwrap();
        let (addr, ctx) = spawn_server(tmp.path()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        next_message(&mut ws).await;

        {
            let mut engine = lock_engine(ctx.engine());
            engine.start(Phase::BreakShort, Some(0.0));
            engine.tick(i64::MAX);
        }

        loop {
            if let Message::Text(text) = next_message(&mut ws).await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "finished" {
                    assert_eq!(value["phase"], "BREAK_SHORT");
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn upload_list_and_fetch_files() {
        let tmp = TempDir::new().unwrap();
        let (addr, _ctx) = spawn_server(tmp.path()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        next_message(&mut ws).await;

        ws.send(Message::Text(r#"{"action":"upload_file","name":"bell.wav"}"#.into()))
            .await
            .unwrap();
        assert_eq!(next_reply(&mut ws).await["success"], true);
        ws.send(Message::Binary(b"RIFF".to_vec())).await.unwrap();
        assert_eq!(next_reply(&mut ws).await["success"], true);

        ws.send(Message::Text(r#"{"action":"list_files"}"#.into()))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply["files"], serde_json::json!(["bell.wav"]));

        ws.send(Message::Text(r#"{"action":"fetch_file","name":"bell.wav"}"#.into()))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply["mime"], "audio/wav");
        loop {
            match next_message(&mut ws).await {
                Message::Binary(bytes) => {
                    assert_eq!(bytes, b"RIFF");
                    break;
                }
                _ => continue,
            }
        }

        ws.send(Message::Text(r#"{"action":"fetch_file","name":"gone.mp3"}"#.into()))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply["success"], false);
        assert!(reply["message"].as_str().unwrap().contains("not found"));
    }
}
