//! Gossip transport abstraction.
//!
//! The engine only needs a best-effort bus: `publish` hands off an encoded
//! [`TransportMessage`](bridge_common::types::TransportMessage) and
//! `subscribe` registers a byte handler. Delivery may reorder, duplicate, or
//! drop; the vote store is an upsert, so all three are harmless.
//!
//! Two implementations live here:
//!
//! - [`GossipHub`]: an in-process fan-out bus. Stands in for the embedding
//!   node's gossip topic in tests and local multi-validator setups.
//! - [`NoopTransport`]: the bridge-disabled variant; accepts everything and
//!   delivers nothing.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

/// Byte handler invoked for every delivered message.
pub type MessageHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("gossip publish failed: {0}")]
    Publish(String),
    #[error("gossip subscribe failed: {0}")]
    Subscribe(String),
}

/// Best-effort gossip bus.
pub trait BridgeTransport: Send + Sync {
    /// Hands a message to the bus. Must not block on delivery.
    fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError>;
    /// Registers a handler for incoming messages.
    fn subscribe(&self, handler: MessageHandler) -> Result<(), TransportError>;
}

// ════════════════════════════════════════════════════════════════════════════
// GOSSIP HUB
// ════════════════════════════════════════════════════════════════════════════

/// In-process fan-out bus shared by several engine instances.
///
/// Every published payload is delivered to every registered handler,
/// including the publisher's own; duplicate delivery is within the
/// transport contract. Delivery runs on a spawned task when a tokio runtime
/// is present, so `publish` never blocks the caller on handler work.
#[derive(Clone, Default)]
pub struct GossipHub {
    handlers: Arc<RwLock<Vec<Arc<MessageHandler>>>>,
}

impl GossipHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn deliver(handlers: Vec<Arc<MessageHandler>>, payload: Vec<u8>) {
        for handler in handlers {
            handler(&payload);
        }
    }
}

impl BridgeTransport for GossipHub {
    fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let handlers: Vec<Arc<MessageHandler>> = self.handlers.read().clone();
        if handlers.is_empty() {
            warn!("gossip publish with no subscribers, dropping message");
            return Ok(());
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    Self::deliver(handlers, payload);
                });
            }
            // no runtime (sync caller in tests): deliver inline
            Err(_) => Self::deliver(handlers, payload),
        }
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler) -> Result<(), TransportError> {
        self.handlers.write().push(Arc::new(handler));
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NOOP TRANSPORT
// ════════════════════════════════════════════════════════════════════════════

/// Bridge-disabled transport: publishes vanish, subscriptions never fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl BridgeTransport for NoopTransport {
    fn publish(&self, _payload: Vec<u8>) -> Result<(), TransportError> {
        Ok(())
    }

    fn subscribe(&self, _handler: MessageHandler) -> Result<(), TransportError> {
        Ok(())
    }
}
