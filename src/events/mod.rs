use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::DocumentKind;

/// Publishes ledger events after the writing transaction has committed.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<LedgerEvent>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<LedgerEvent>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: LedgerEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Sends every event through `sender`, if any. The data is already committed,
/// so a closed channel is logged and otherwise ignored.
pub(crate) async fn publish(sender: Option<&EventSender>, events: Vec<LedgerEvent>) {
    let Some(sender) = sender else {
        return;
    };
    for event in events {
        if let Err(e) = sender.send(event).await {
            warn!(error = %e, "Dropping ledger event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    OperationRecorded {
        operation_id: Uuid,
        product_id: Uuid,
        store_id: Uuid,
    },
    OperationUpdated {
        operation_id: Uuid,
        product_id: Uuid,
    },
    OperationsDeleted {
        operation_ids: Vec<Uuid>,
    },
    OperationsRestored {
        operation_ids: Vec<Uuid>,
    },
    StockRecalculated {
        product_ids: Vec<Uuid>,
    },
    WacRecalculated {
        product_id: Uuid,
    },
    DocumentsDeleted {
        kind: DocumentKind,
        document_ids: Vec<i32>,
    },
    DocumentsRestored {
        kind: DocumentKind,
        document_ids: Vec<i32>,
    },
}

/// Drains the channel and logs each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<LedgerEvent>) {
    info!("Starting ledger event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            LedgerEvent::OperationRecorded {
                operation_id,
                product_id,
                store_id,
            } => info!(%operation_id, %product_id, %store_id, "Operation recorded"),
            LedgerEvent::OperationUpdated {
                operation_id,
                product_id,
            } => info!(%operation_id, %product_id, "Operation updated"),
            LedgerEvent::OperationsDeleted { operation_ids } => {
                info!(count = operation_ids.len(), "Operations deleted")
            }
            LedgerEvent::OperationsRestored { operation_ids } => {
                info!(count = operation_ids.len(), "Operations restored")
            }
            LedgerEvent::StockRecalculated { product_ids } => {
                info!(count = product_ids.len(), "Stock recalculated")
            }
            LedgerEvent::WacRecalculated { product_id } => {
                info!(%product_id, "WAC recalculated")
            }
            LedgerEvent::DocumentsDeleted { kind, document_ids } => {
                info!(%kind, ids = ?document_ids, "Documents deleted")
            }
            LedgerEvent::DocumentsRestored { kind, document_ids } => {
                info!(%kind, ids = ?document_ids, "Documents restored")
            }
        }
    }

    info!("Ledger event channel closed");
}
