//! Topic fan-out and the per-connection sink for the axum adapter.
//!
//! The fabric owns the topic -> subscriber index the core's room fan-out
//! publishes through. Sinks register their writer channel under a topic on
//! subscribe and drop out on unsubscribe; a topic with no subscribers is
//! removed entirely.

use crate::transport::{ConnectionSink, Publisher, TransportError};
use crate::ws::WriterTx;
use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared topic index. One per server process; handed to both the server
/// builder (as its publisher) and the upgrade handler (to mint sinks).
#[derive(Debug, Default)]
pub struct Fabric {
    topics: DashMap<String, HashMap<String, WriterTx>>,
}

impl Fabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn subscribe(&self, topic: &str, client_id: &str, tx: WriterTx) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(client_id.to_string(), tx);
    }

    fn unsubscribe(&self, topic: &str, client_id: &str) {
        if let Some(mut members) = self.topics.get_mut(topic) {
            members.remove(client_id);
            if members.is_empty() {
                drop(members);
                self.topics.remove(topic);
            }
        }
    }

    #[cfg(test)]
    fn member_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Publisher for Fabric {
    async fn publish(&self, topic: &str, frame: &str) -> Result<(), TransportError> {
        let Some(members) = self.topics.get(topic) else {
            return Ok(());
        };
        for (client_id, tx) in members.iter() {
            // A closed channel means the subscriber is mid-teardown; skip it
            // without failing the rest of the room.
            if tx.send(Message::Text(frame.to_string().into())).is_err() {
                tracing::debug!(client_id = %client_id, topic = %topic, "publish to closed writer");
            }
        }
        Ok(())
    }
}

/// The adapter's [`ConnectionSink`]: wraps one connection's writer channel
/// plus a handle to the fabric for topic membership.
pub(crate) struct WsSink {
    client_id: String,
    tx: WriterTx,
    fabric: Arc<Fabric>,
}

impl WsSink {
    pub(crate) fn new(client_id: String, tx: WriterTx, fabric: Arc<Fabric>) -> Self {
        Self {
            client_id,
            tx,
            fabric,
        }
    }
}

#[async_trait]
impl ConnectionSink for WsSink {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        self.tx
            .send(Message::Text(frame.to_string().into()))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    async fn subscribe(&self, topic: &str) {
        self.fabric.subscribe(topic, &self.client_id, self.tx.clone());
    }

    async fn unsubscribe(&self, topic: &str) {
        self.fabric.unsubscribe(topic, &self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn sink(fabric: &Arc<Fabric>, id: &str) -> (WsSink, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WsSink::new(id.to_string(), tx, fabric.clone()), rx)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let fabric = Fabric::new();
        let (a, mut a_rx) = sink(&fabric, "a");
        let (_b, mut b_rx) = sink(&fabric, "b");

        a.subscribe("general").await;
        fabric.publish("general", r#"{"type":"x","payload":1}"#).await.unwrap();

        assert!(matches!(a_rx.try_recv(), Ok(Message::Text(_))));
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_topic_removed() {
        let fabric = Fabric::new();
        let (a, _a_rx) = sink(&fabric, "a");

        a.subscribe("general").await;
        assert_eq!(fabric.member_count("general"), 1);
        a.unsubscribe("general").await;
        assert_eq!(fabric.member_count("general"), 0);
        assert!(fabric.topics.get("general").is_none());
    }

    #[tokio::test]
    async fn test_publish_to_unknown_topic_is_noop() {
        let fabric = Fabric::new();
        assert!(fabric.publish("nowhere", "{}").await.is_ok());
    }
}
