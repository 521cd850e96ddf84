//! WebSocket mirror for browser clients
//!
//! A plain flood hub: whatever one subscriber sends is forwarded to every
//! subscriber, the sender included. It keeps its own subscriber list and
//! never reads or writes the session registry.

use crate::error::Result;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WELCOME: &str = "Welcome!";

/// Outbound queues of every connected browser client
#[derive(Debug, Default)]
pub struct MirrorHub {
    subscribers: HashMap<u64, mpsc::UnboundedSender<Message>>,
    next_id: u64,
}

impl MirrorHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an outbound queue and returns its subscriber id
    pub fn subscribe(&mut self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, sender);
        id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Sends `message` to every subscriber, returns how many accepted it
    pub fn flood(&self, message: &Message) -> usize {
        let mut delivered = 0;
        for (id, subscriber) in &self.subscribers {
            if subscriber.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!("[WS] Subscriber {} is gone", id);
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Runs one browser connection from handshake to close
pub async fn serve(hub: Arc<RwLock<MirrorHub>>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut sink, mut receiver) = ws_stream.split();

    let (outbox, mut inbox) = mpsc::unbounded_channel::<Message>();
    let id = hub.write().await.subscribe(outbox.clone());
    info!("[WS] Subscriber {} connected from {}", id, addr);

    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            if let Err(e) = sink.send(message).await {
                warn!("[WS] Failed to write to {}: {}", addr, e);
                break;
            }
        }
    });

    let _ = outbox.send(Message::text(WELCOME));
    drop(outbox);

    while let Some(message) = receiver.next().await {
        match message {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                if let Message::Text(text) = &message {
                    info!("[WS] received: {}", text);
                }
                hub.read().await.flood(&message);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[WS] Error on {}: {}", addr, e);
                break;
            }
        }
    }

    hub.write().await.unsubscribe(id);
    let _ = writer.await;
    info!("[WS] Subscriber {} from {} closed", id, addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_flood() {
        let mut hub = MirrorHub::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.subscribe(tx_a);
        hub.subscribe(tx_b);

        assert_eq!(hub.flood(&Message::text("hello")), 2);
        assert_eq!(rx_a.try_recv().unwrap(), Message::text("hello"));
        assert_eq!(rx_b.try_recv().unwrap(), Message::text("hello"));
    }

    #[test]
    fn test_unsubscribe() {
        let mut hub = MirrorHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.subscribe(tx);

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert!(hub.is_empty());
        assert_eq!(hub.flood(&Message::text("hello")), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flood_skips_dropped_subscriber() {
        let mut hub = MirrorHub::new();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.subscribe(tx_a);
        hub.subscribe(tx_b);
        drop(rx_a);

        assert_eq!(hub.flood(&Message::binary(vec![1, 2, 3])), 1);
        assert_eq!(rx_b.try_recv().unwrap(), Message::binary(vec![1, 2, 3]));
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let mut hub = MirrorHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = hub.subscribe(tx.clone());
        let second = hub.subscribe(tx);
        assert_ne!(first, second);
    }
}
