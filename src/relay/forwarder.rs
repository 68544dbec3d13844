/// Content-script forwarder.
///
/// The only hop allowed to talk to the extension port. It relays page
/// requests to the background, copies the background's `result`/`error`
/// onto a response carrying the page's original id, and re-posts wallet
/// events into the page unchanged.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{BackgroundMessage, PageMessage, WalletEvent, WalletRequest, WalletResponse};
use crate::error::{Result, WalletError};

/// Runtime messaging towards the background.
#[async_trait]
pub trait BackgroundPort: Send + Sync {
    async fn send(&self, message: BackgroundMessage) -> Result<Value>;
}

pub struct ContentForwarder {
    port: Arc<dyn BackgroundPort>,
    window: mpsc::UnboundedSender<PageMessage>,
}

impl ContentForwarder {
    pub fn new(port: Arc<dyn BackgroundPort>, window: mpsc::UnboundedSender<PageMessage>) -> Self {
        Self { port, window }
    }

    pub async fn forward(&self, request: WalletRequest) -> WalletResponse {
        let id = request.id;
        let method = request.method.clone();
        match self.port.send(BackgroundMessage::WalletRequest(request)).await {
            Ok(reply) => match reply.get("error").and_then(Value::as_str) {
                Some(code) => WalletResponse::err(id, code),
                None => WalletResponse::ok(id, reply.get("result").cloned().unwrap_or(Value::Null)),
            },
            Err(e) => {
                warn!(id, method = %method, error = %e, "Background unreachable");
                WalletResponse::from_error(id, &WalletError::Transport(e.to_string()))
            }
        }
    }

    pub fn relay_event(&self, event: WalletEvent) {
        if self.window.send(event.into()).is_err() {
            debug!("Page window closed, event dropped");
        }
    }

    /// Pumps window requests and background events until both sources close.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<PageMessage>,
        mut events: mpsc::UnboundedReceiver<WalletEvent>,
    ) {
        info!("Content forwarder started");
        let mut inbound_open = true;
        let mut events_open = true;
        while inbound_open || events_open {
            tokio::select! {
                message = inbound.recv(), if inbound_open => match message {
                    Some(PageMessage::WalletRequest(request)) => {
                        let forwarder = self.clone();
                        tokio::spawn(async move {
                            let response = forwarder.forward(request).await;
                            if forwarder.window.send(PageMessage::WalletResponse(response)).is_err() {
                                debug!("Page window closed, response dropped");
                            }
                        });
                    }
                    Some(_) => {}
                    None => inbound_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.relay_event(event),
                    None => events_open = false,
                },
            }
        }
        info!("Content forwarder stopped");
    }
}
