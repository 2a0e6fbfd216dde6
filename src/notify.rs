use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use ulid::Ulid;

use crate::command::Response;
use crate::model::ClientName;

/// A message queued for one connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Reply to a command sent on this connection.
    Response(Response),
    /// State-change notification pushed to every client.
    Broadcast(String),
}

/// Registry entry for a connected client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub name: ClientName,
    /// Distinguishes connections that claimed the same name.
    pub conn_id: Ulid,
    tx: mpsc::Sender<Outbound>,
}

impl ClientHandle {
    pub fn new(name: ClientName, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            name,
            conn_id: Ulid::new(),
            tx,
        }
    }

    /// Queue without waiting. A full or closed queue drops the message.
    pub fn try_push(&self, msg: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.tx.try_send(msg)
    }
}

/// Queue `text` for every recipient. A failure for one client is logged and
/// never affects the others. Returns how many deliveries were queued.
pub fn fan_out(recipients: &[ClientHandle], text: &str) -> usize {
    let mut delivered = 0;
    for client in recipients {
        match client.try_push(Outbound::Broadcast(text.to_string())) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!("broadcast to {} dropped: queue full", client.name);
                metrics::counter!(crate::observability::BROADCASTS_DROPPED_TOTAL, "reason" => "full")
                    .increment(1);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("broadcast to {} dropped: connection closed", client.name);
                metrics::counter!(crate::observability::BROADCASTS_DROPPED_TOTAL, "reason" => "closed")
                    .increment(1);
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_client() {
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let clients = vec![
            ClientHandle::new("alice".into(), tx_a),
            ClientHandle::new("bob".into(), tx_b),
        ];

        assert_eq!(fan_out(&clients, "hello"), 2);
        assert_eq!(rx_a.recv().await, Some(Outbound::Broadcast("hello".into())));
        assert_eq!(rx_b.recv().await, Some(Outbound::Broadcast("hello".into())));
    }

    #[tokio::test]
    async fn closed_client_does_not_block_others() {
        let (tx_a, rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        drop(rx_a);
        let clients = vec![
            ClientHandle::new("gone".into(), tx_a),
            ClientHandle::new("bob".into(), tx_b),
        ];

        assert_eq!(fan_out(&clients, "update"), 1);
        assert_eq!(rx_b.recv().await, Some(Outbound::Broadcast("update".into())));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let clients = vec![ClientHandle::new("slow".into(), tx)];

        assert_eq!(fan_out(&clients, "first"), 1);
        assert_eq!(fan_out(&clients, "second"), 0);
        assert_eq!(rx.recv().await, Some(Outbound::Broadcast("first".into())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fan_out_without_recipients_is_noop() {
        assert_eq!(fan_out(&[], "nobody"), 0);
    }
}
