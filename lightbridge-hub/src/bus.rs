//! The message-bus capability: publish/subscribe on named topics

use std::future::Future;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus client is closed")]
    Closed,
    #[error("bus error: {0}")]
    Client(String),
}

/// Inbound traffic from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The bus (re)connected; subscriptions may have been lost
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

pub trait Bus: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), BusError>> + Send;
}
