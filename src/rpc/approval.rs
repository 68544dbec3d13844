/// User-confirmation round trip for sensitive requests.
///
/// Each approval gets its own id. The pending record is written to the
/// store so a re-opened popup can find it again; the wait itself is a
/// one-shot channel signalled by `submit_decision`, bounded by the
/// configured approval timeout. Both records are removed whichever way the
/// wait ends.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::relay::hub::{Host, PopupPage, PopupRequest};
use crate::state::models::{ApprovalKind, PendingApprovalRequest, RequestResponse};
use crate::state::repository;
use crate::storage::KeyValueStore;
use crate::wallet::session::Clock;

pub struct ApprovalBroker {
    store: Arc<dyn KeyValueStore>,
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    popup_size: (u32, u32),
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        popup_size: (u32, u32),
    ) -> Self {
        Self {
            store,
            host,
            clock,
            timeout,
            popup_size,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `Ok(())` once the user approves.
    pub async fn request_approval(
        &self,
        kind: ApprovalKind,
        request_id: u64,
        payload: Value,
    ) -> Result<()> {
        let approval_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .map_err(|_| WalletError::Storage("approval waiters poisoned".into()))?
            .insert(approval_id, tx);

        let outcome = self.await_decision(approval_id, kind, request_id, payload, rx).await;

        self.forget(approval_id);
        if let Err(e) = repository::clear_approval(&*self.store, approval_id).await {
            warn!(approval = %approval_id, error = %e, "Failed to clear approval records");
        }
        outcome
    }

    async fn await_decision(
        &self,
        approval_id: Uuid,
        kind: ApprovalKind,
        request_id: u64,
        payload: Value,
        rx: oneshot::Receiver<bool>,
    ) -> Result<()> {
        let pending = PendingApprovalRequest {
            approval_id,
            request_id,
            kind,
            payload,
            created_at_ms: self.clock.now_ms(),
        };
        repository::save_pending_approval(&*self.store, &pending).await?;

        let (width, height) = self.popup_size;
        self.host
            .open_popup(PopupRequest::new(
                PopupPage::Transaction { approval_id, kind },
                width,
                height,
            ))
            .await?;
        info!(approval = %approval_id, request = request_id, kind = ?kind, "Awaiting approval");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(true)) => {
                info!(approval = %approval_id, "Approved");
                Ok(())
            }
            Ok(Ok(false)) => {
                info!(approval = %approval_id, "Rejected");
                Err(WalletError::ApprovalRejected(kind))
            }
            Ok(Err(_)) | Err(_) => {
                warn!(approval = %approval_id, timeout_secs = self.timeout.as_secs(), "Approval timed out");
                Err(WalletError::ApprovalTimedOut)
            }
        }
    }

    /// Records the user's answer and wakes the waiting request.
    pub async fn submit_decision(&self, approval_id: Uuid, approved: bool) -> Result<()> {
        let waiter = self
            .waiters
            .lock()
            .map_err(|_| WalletError::Storage("approval waiters poisoned".into()))?
            .remove(&approval_id);
        let Some(waiter) = waiter else {
            // left over from an earlier background run
            if repository::load_pending_approval(&*self.store, approval_id)
                .await?
                .is_some()
            {
                repository::clear_approval(&*self.store, approval_id).await?;
            }
            return Err(WalletError::InvalidParams(format!(
                "no pending approval {approval_id}"
            )));
        };

        repository::save_approval_response(&*self.store, approval_id, RequestResponse { approved })
            .await?;
        if waiter.send(approved).is_err() {
            warn!(approval = %approval_id, "Decision arrived after the request gave up");
            repository::clear_approval(&*self.store, approval_id).await?;
            return Err(WalletError::ApprovalTimedOut);
        }
        Ok(())
    }

    /// Pending approvals, oldest first, for the popup to render.
    pub async fn pending(&self) -> Result<Vec<PendingApprovalRequest>> {
        repository::list_pending_approvals(&*self.store).await
    }

    pub fn in_flight(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn forget(&self, approval_id: Uuid) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&approval_id);
        }
    }
}
