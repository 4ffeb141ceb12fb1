use crate::error::{ClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

pub const CLOSE_NORMAL: u16 = 1000;
/// Client-side close after the keepalive saw no traffic for too long.
pub const CLOSE_UNHEALTHY: u16 = 4001;

/// A frame read from the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Binary(Bytes),
    Text(String),
    Closed { code: u16, reason: String },
}

/// Write half of a control channel.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    async fn send(&self, frame: Bytes) -> Result<()>;

    async fn close(&self, code: u16, reason: &str) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Opens control channels. The receiver yields frames until the channel closes.
#[async_trait]
pub trait SignalConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn SignalChannel>, mpsc::UnboundedReceiver<InboundFrame>)>;
}

/// WebSocket control channel.
pub struct WsConnector;

struct WsChannel {
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

fn map_connect_error(err: tungstenite::Error) -> ClientError {
    match err {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            ClientError::Authentication("signaling endpoint rejected the token".to_string())
        }
        other => ClientError::WebSocket(other),
    }
}

#[async_trait]
impl SignalConnector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn SignalChannel>, mpsc::UnboundedReceiver<InboundFrame>)> {
        let (ws, _) = connect_async(url).await.map_err(map_connect_error)?;
        debug!(url, "Signal channel connected");
        let (mut sink, mut stream) = ws.split();

        let open = Arc::new(AtomicBool::new(true));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Signal channel write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
        });

        let reader_open = open.clone();
        tokio::spawn(async move {
            let mut close = (1006, String::from("connection dropped"));
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Binary(data)) => InboundFrame::Binary(Bytes::copy_from_slice(&data)),
                    Ok(Message::Text(text)) => InboundFrame::Text(text.to_string()),
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            close = (u16::from(frame.code), frame.reason.to_string());
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Signal channel read failed: {e}");
                        break;
                    }
                };
                if inbound.send(frame).is_err() {
                    break;
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            let _ = inbound.send(InboundFrame::Closed {
                code: close.0,
                reason: close.1,
            });
        });

        let channel: Arc<dyn SignalChannel> = Arc::new(WsChannel { outbound, open });
        Ok((channel, inbound_rx))
    }
}

#[async_trait]
impl SignalChannel for WsChannel {
    async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(ClientError::Transport("signal channel is closed".to_string()));
        }
        self.outbound
            .send(Message::binary(frame.to_vec()))
            .map_err(|_| ClientError::Transport("signal channel writer stopped".to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.outbound
            .send(Message::Close(Some(frame)))
            .map_err(|_| ClientError::Transport("signal channel writer stopped".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
