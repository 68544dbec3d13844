/// Host substrate seen from the background: popup windows and tab fan-out.
///
/// `Host` opens the transient UI window. `RelayHub` keeps one outbound
/// channel per connected tab and delivers each wallet event to every tab at
/// most once. A closed tab is dropped from the hub instead of failing the
/// broadcast for the others.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::protocol::WalletEvent;
use crate::error::{Result, WalletError};
use crate::state::models::ApprovalKind;

/// Which screen the popup should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "page", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PopupPage {
    Unlock,
    Transaction {
        #[serde(rename = "approvalId")]
        approval_id: Uuid,
        kind: ApprovalKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub page: PopupPage,
}

impl PopupRequest {
    pub fn new(page: PopupPage, width: u32, height: u32) -> Self {
        Self {
            url: "index.html".to_string(),
            width,
            height,
            page,
        }
    }
}

#[async_trait]
pub trait Host: Send + Sync {
    async fn open_popup(&self, request: PopupRequest) -> Result<()>;
}

/// Hands popup requests to whatever drives the UI over a channel.
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<PopupRequest>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PopupRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Host for ChannelHost {
    async fn open_popup(&self, request: PopupRequest) -> Result<()> {
        info!(page = ?request.page, "Opening popup");
        self.tx
            .send(request)
            .map_err(|_| WalletError::Transport("popup host is gone".into()))
    }
}

pub type TabId = u64;

#[derive(Default)]
pub struct RelayHub {
    tabs: Mutex<HashMap<TabId, mpsc::UnboundedSender<WalletEvent>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tab and returns the receiving end of its event channel.
    pub fn connect(&self, tab: TabId) -> mpsc::UnboundedReceiver<WalletEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.insert(tab, tx);
        }
        rx
    }

    pub fn disconnect(&self, tab: TabId) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.remove(&tab);
        }
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Sends `event` to every tab. Returns how many tabs received it.
    pub fn broadcast(&self, event: WalletEvent) -> usize {
        let Ok(mut tabs) = self.tabs.lock() else {
            return 0;
        };
        let mut delivered = 0;
        tabs.retain(|tab, tx| match tx.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!(tab, "Dropping closed tab");
                false
            }
        });
        debug!(event = ?event, delivered, "Broadcast wallet event");
        delivered
    }
}
