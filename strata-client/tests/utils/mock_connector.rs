use crate::utils::MockChannel;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use strata_client::error::{ClientError, Result};
use strata_client::reconnect::{Connect, TokenProvider};
use strata_client::signaling::{InboundFrame, SignalChannel};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    TokenExpired,
    Unreachable,
    /// The attempt never completes.
    Hang,
}

struct OpenConnection {
    channel: Arc<MockChannel>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
}

/// Scripted [`Connect`]; accepts once the outcome queue runs dry.
#[derive(Default)]
pub struct MockConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    tokens: Mutex<Vec<String>>,
    connections: Mutex<Vec<OpenConnection>>,
}

impl MockConnector {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        let connector = Self::default();
        connector.outcomes.lock().extend(outcomes);
        Arc::new(connector)
    }

    /// Queues `outcome` for the next open attempt not already scripted.
    pub fn fail_next(&self, outcome: Outcome) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Tokens presented to every open attempt, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn opened(&self) -> usize {
        self.connections.lock().len()
    }

    /// Delivers `frame` on the most recently opened connection.
    pub fn push_latest(&self, frame: InboundFrame) {
        if let Some(connection) = self.connections.lock().last() {
            let _ = connection.inbound.send(frame);
        }
    }

    pub fn close_latest(&self, code: u16) {
        self.push_latest(InboundFrame::Closed {
            code,
            reason: format!("closed with {code}"),
        });
    }

    pub fn latest_channel(&self) -> Option<Arc<MockChannel>> {
        self.connections.lock().last().map(|c| c.channel.clone())
    }
}

#[async_trait]
impl Connect for MockConnector {
    async fn open(
        &self,
        token: &str,
    ) -> Result<(Arc<dyn SignalChannel>, mpsc::UnboundedReceiver<InboundFrame>)> {
        self.tokens.lock().push(token.to_string());
        let outcome = self.outcomes.lock().pop_front().unwrap_or(Outcome::Accept);
        match outcome {
            Outcome::TokenExpired => {
                Err(ClientError::Authentication("token expired".to_string()))
            }
            Outcome::Unreachable => Err(ClientError::Transport("connection refused".to_string())),
            Outcome::Hang => std::future::pending().await,
            Outcome::Accept => {
                let channel = Arc::new(MockChannel::default());
                let (inbound, inbound_rx) = mpsc::unbounded_channel();
                self.connections.lock().push(OpenConnection {
                    channel: channel.clone(),
                    inbound,
                });
                Ok((channel, inbound_rx))
            }
        }
    }

    fn ping(&self) -> Bytes {
        Bytes::from_static(b"ping")
    }
}

/// Hands out `token-1`, `token-2`, ... on every load.
#[derive(Default)]
pub struct CountingTokens {
    loads: AtomicU32,
}

impl CountingTokens {
    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn load_token(&self) -> Result<String> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }
}
