//! Websocket client for the coaching service
//!
//! # Connection Flow
//!
//! 1. `connect()` - Open the websocket, send `setup`, wait for `setup_complete`
//! 2. `send()` - Queue frames and audio blocks (non-blocking)
//! 3. Inbound messages are assembled into `ChannelEvent`s by a reader task
//! 4. `close()` - Drop the outbound queue and stop the reader
//!
//! There is no retry: a failed connect leaves the session running offline.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, ServerMessage};
use super::{
    ChannelConnection, ChannelConnector, ChannelError, ChannelEvent, CoachingChannel,
    CueAssembler, OutboundMessage,
};
use crate::settings::CoachSettings;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound messages queued ahead of the socket writer
const OUTBOUND_QUEUE: usize = 64;

/// Inbound events buffered for the cue dispatcher
const INBOUND_QUEUE: usize = 100;

/// Connects to the coaching service over a websocket
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
    input_sample_rate: u32,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, input_sample_rate: u32) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            connect_timeout,
            input_sample_rate,
        }
    }

    pub fn from_settings(settings: &CoachSettings) -> Self {
        Self::new(
            settings.channel_url.clone(),
            Duration::from_millis(settings.channel_connect_timeout_ms),
            settings.input_sample_rate,
        )
        .with_api_key(get_channel_api_key())
    }

    /// Bearer token sent in the upgrade request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    async fn try_connect(&self, exercise_label: &str) -> Result<ChannelConnection, ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        if let Some(key) = &self.api_key {
            request.headers_mut().insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?,
            );
        }

        log::info!("WsConnector: connecting to {}", self.url);

        let (ws_stream, _response) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    ChannelError::Rejected(format!("HTTP {}", response.status()))
                }
                other => ChannelError::ConnectionFailed(other.to_string()),
            })?;

        let (mut write, mut read) = ws_stream.split();

        let setup = ClientMessage::setup(exercise_label, self.input_sample_rate);
        send_message(&mut write, &setup).await?;

        let session_id = wait_for_setup(&mut read).await?;
        log::info!(
            "WsConnector: session ready (id: {})",
            session_id.as_deref().unwrap_or("none")
        );

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(INBOUND_QUEUE);

        let writer_task = tokio::spawn(run_writer(write, out_rx));
        let reader_task = tokio::spawn(run_reader(read, event_tx));

        let channel = WsCoachingChannel {
            outbound: Mutex::new(Some(out_tx)),
            reader_task: Mutex::new(Some(reader_task)),
            _writer_task: writer_task,
        };

        Ok(ChannelConnection {
            channel: std::sync::Arc::new(channel),
            events: event_rx,
        })
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, exercise_label: &str) -> Result<ChannelConnection, ChannelError> {
        timeout(self.connect_timeout, self.try_connect(exercise_label))
            .await
            .map_err(|_| ChannelError::ConnectionFailed("Connection timeout".to_string()))?
    }
}

async fn send_message(
    write: &mut SplitSink<WsStream, Message>,
    message: &ClientMessage,
) -> Result<(), ChannelError> {
    let json =
        serde_json::to_string(message).map_err(|e| ChannelError::ProtocolError(e.to_string()))?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| ChannelError::Disconnected(e.to_string()))
}

async fn wait_for_setup(
    read: &mut SplitStream<WsStream>,
) -> Result<Option<String>, ChannelError> {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::SetupComplete { session_id }) => return Ok(session_id),
                Ok(ServerMessage::Error { error }) => {
                    return Err(ChannelError::Rejected(error.message));
                }
                Ok(_) => {
                    log::debug!("WsConnector: ignoring message while waiting for setup_complete");
                }
                Err(e) => {
                    log::warn!("WsConnector: failed to parse message: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                return Err(ChannelError::Disconnected(
                    "Connection closed before setup completed".to_string(),
                ));
            }
            Err(e) => return Err(ChannelError::ProtocolError(e.to_string())),
            _ => {} // ping/pong/binary
        }
    }
    Err(ChannelError::Disconnected("Stream ended".to_string()))
}

/// Drains the outbound queue onto the socket. Ends when every sender is
/// dropped, then sends a close frame.
async fn run_writer(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<ClientMessage>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = send_message(&mut write, &message).await {
            log::warn!("WsCoachingChannel: write failed: {}", e);
            break;
        }
    }
    if let Err(e) = write.close().await {
        log::debug!("WsCoachingChannel: error closing websocket: {}", e);
    }
    log::debug!("WsCoachingChannel: writer task exiting");
}

/// Turns server messages into channel events, one turn at a time.
async fn run_reader(mut read: SplitStream<WsStream>, events: mpsc::Sender<ChannelEvent>) {
    let mut assembler = CueAssembler::new();

    let close_reason = loop {
        let Some(msg_result) = read.next().await else {
            break None;
        };

        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                log::info!("WsCoachingChannel: closed by server");
                break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
            }
            Err(e) => {
                log::warn!("WsCoachingChannel: websocket error: {}", e);
                break Some(e.to_string());
            }
            Ok(_) => continue,
        };

        let message = match serde_json::from_str::<ServerMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("WsCoachingChannel: failed to parse message: {}", e);
                continue;
            }
        };

        let event = match message {
            ServerMessage::Transcript { ref delta } => {
                assembler.process_delta(delta);
                None
            }
            ServerMessage::Audio { ref mime_type, .. } => {
                match message.audio_bytes() {
                    Some(Ok(bytes)) => assembler.process_audio(&bytes, mime_type),
                    Some(Err(e)) => {
                        log::warn!("WsCoachingChannel: skipping undecodable audio part: {}", e)
                    }
                    None => {}
                }
                None
            }
            ServerMessage::TurnComplete => assembler.complete_turn().map(ChannelEvent::Cue),
            ServerMessage::Interrupted => {
                assembler.reset();
                Some(ChannelEvent::Interrupted)
            }
            ServerMessage::Error { error } => {
                Some(ChannelEvent::Error(ChannelError::ProtocolError(error.message)))
            }
            ServerMessage::SetupComplete { .. } | ServerMessage::Unknown => None,
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                log::debug!("WsCoachingChannel: event receiver dropped");
                return;
            }
        }
    };

    let _ = events
        .send(ChannelEvent::Closed {
            reason: close_reason,
        })
        .await;
    log::debug!("WsCoachingChannel: reader task exiting");
}

/// Outbound half of an open websocket session
struct WsCoachingChannel {
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    _writer_task: JoinHandle<()>,
}

impl CoachingChannel for WsCoachingChannel {
    fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        let guard = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return Err(ChannelError::Disconnected("channel closed".to_string()));
        };

        tx.try_send(message.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                ChannelError::Disconnected("writer stopped".to_string())
            }
        })
    }

    fn close(&self) {
        // Dropping the sender lets the writer flush and send a close frame.
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let reader = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if sender.is_none() && reader.is_none() {
            return;
        }

        log::info!("WsCoachingChannel: closing");
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl Drop for WsCoachingChannel {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
    }
}

/// Optional bearer token for the coaching service
pub fn get_channel_api_key() -> Option<String> {
    std::env::var("COACH_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal coaching server: accepts one client, checks setup, then plays
    /// back the scripted replies.
    async fn spawn_server(replies: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();

            if let Some(Ok(Message::Text(setup))) = ws.next().await {
                received.push(setup);
            }
            for reply in replies {
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => received.push(text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            received
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_connect_and_receive_cues() {
        let (url, server) = spawn_server(vec![
            r#"{"type":"setup_complete","session_id":"abc"}"#,
            r#"{"type":"transcript","delta":"Brace "}"#,
            r#"{"type":"transcript","delta":"your core"}"#,
            r#"{"type":"turn_complete"}"#,
            r#"{"type":"interrupted"}"#,
        ])
        .await;

        let connector = WsConnector::new(url, Duration::from_secs(5), 16000);
        let mut conn = connector.connect("Squat").await.unwrap();

        match conn.events.recv().await.unwrap() {
            ChannelEvent::Cue(cue) => assert_eq!(cue.text, "Brace your core"),
            other => panic!("Expected cue, got {:?}", other),
        }
        assert_eq!(conn.events.recv().await.unwrap(), ChannelEvent::Interrupted);

        conn.channel
            .send(OutboundMessage::AudioBlock {
                pcm: vec![1, 2, 3],
                sample_rate: 16000,
            })
            .unwrap();
        conn.channel.close();
        conn.channel.close();

        let received = server.await.unwrap();
        assert!(received[0].contains("\"type\":\"setup\""));
        assert!(received[0].contains("\"exercise\":\"Squat\""));
        assert_eq!(received.len(), 2);
        assert!(received[1].contains("\"type\":\"audio\""));

        assert!(matches!(
            conn.channel.send(OutboundMessage::Frame {
                data: vec![1],
                mime_type: "image/jpeg".to_string()
            }),
            Err(ChannelError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_setup_error_is_rejection() {
        let (url, _server) = spawn_server(vec![
            r#"{"type":"error","error":{"message":"unknown exercise"}}"#,
        ])
        .await;

        let connector = WsConnector::new(url, Duration::from_secs(5), 16000);
        let err = connector.connect("Juggling").await.unwrap_err();
        assert_eq!(err, ChannelError::Rejected("unknown exercise".to_string()));
    }

    #[tokio::test]
    async fn test_server_close_emits_closed_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(r#"{"type":"setup_complete"}"#.to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let connector = WsConnector::new(url, Duration::from_secs(5), 16000);
        let mut conn = connector.connect("Plank").await.unwrap();
        assert!(matches!(
            conn.events.recv().await.unwrap(),
            ChannelEvent::Closed { .. }
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let connector = WsConnector::new(url, Duration::from_secs(5), 16000);
        assert!(matches!(
            connector.connect("Squat").await,
            Err(ChannelError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_get_channel_api_key_does_not_panic() {
        let _ = get_channel_api_key();
    }
}
