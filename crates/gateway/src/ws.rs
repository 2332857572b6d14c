use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::TransportError;

/// Raw frames delivered by the socket reader. Venue sessions parse the text
/// themselves; this layer knows nothing about any venue's dialect.
#[derive(Debug)]
pub enum WsEvent {
    Text(String),
    Disconnected { reason: String },
}

enum WsCommand {
    Text(String),
    Close,
}

/// Minimal websocket client: one writer task, one reader task, channels on
/// both ends.
pub struct WsClient {
    url: String,
}

impl WsClient {
    pub fn new(url: impl Into<String>) -> Self {
        WsClient { url: url.into() }
    }

    pub async fn connect(&self) -> Result<(WsHandle, mpsc::Receiver<WsEvent>), TransportError> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);
        let (event_tx, event_rx) = mpsc::channel::<WsEvent>(1024);

        // Writer: forwards outgoing frames until told to close.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let result = match cmd {
                    WsCommand::Text(text) => write.send(Message::Text(text.into())).await,
                    WsCommand::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "websocket send failed");
                    break;
                }
            }
        });

        // Reader: forwards text frames and reports the close.
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(WsEvent::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by server".to_string());
                        let _ = event_tx.send(WsEvent::Disconnected { reason }).await;
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        tracing::trace!(?data, "ping");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx
                            .send(WsEvent::Disconnected {
                                reason: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        Ok((WsHandle { tx: cmd_tx }, event_rx))
    }
}

/// Handle for the outgoing half of a connection.
#[derive(Clone)]
pub struct WsHandle {
    tx: mpsc::Sender<WsCommand>,
}

impl WsHandle {
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(WsCommand::Text(text.into()))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Ask the writer to close the transport. Safe to call repeatedly.
    pub async fn close(&self) {
        let _ = self.tx.send(WsCommand::Close).await;
    }
}
