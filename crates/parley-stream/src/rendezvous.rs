//! Zero-capacity hand-off between one producer and one consumer.
//!
//! `send` does not return until the consumer has taken the item, so a slow
//! consumer applies backpressure all the way to the network read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Shared<T> {
    slot: Mutex<Option<T>>,
    item_ready: Notify,
    item_taken: Notify,
    sender_closed: AtomicBool,
    receiver_closed: AtomicBool,
}

pub struct RendezvousSender<T> {
    shared: Arc<Shared<T>>,
}

pub struct RendezvousReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected sender/receiver pair.
pub fn rendezvous<T>() -> (RendezvousSender<T>, RendezvousReceiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        item_ready: Notify::new(),
        item_taken: Notify::new(),
        sender_closed: AtomicBool::new(false),
        receiver_closed: AtomicBool::new(false),
    });
    (
        RendezvousSender {
            shared: shared.clone(),
        },
        RendezvousReceiver { shared },
    )
}

/// Clears the slot if a `send` future is dropped before its item was taken.
struct RetractOnDrop<'a, T> {
    shared: &'a Shared<T>,
    armed: bool,
}

impl<T> Drop for RetractOnDrop<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.slot.lock().take();
        }
    }
}

impl<T> RendezvousSender<T> {
    /// Hand `item` to the receiver, waiting until it has been taken.
    ///
    /// Returns the item back if the receiver is gone.
    pub async fn send(&mut self, item: T) -> Result<(), T> {
        if self.is_closed() {
            return Err(item);
        }
        *self.shared.slot.lock() = Some(item);
        self.shared.item_ready.notify_one();

        let mut guard = RetractOnDrop {
            shared: &self.shared,
            armed: true,
        };
        loop {
            {
                let mut slot = self.shared.slot.lock();
                if slot.is_none() {
                    guard.armed = false;
                    return Ok(());
                }
                if self.shared.receiver_closed.load(Ordering::Acquire) {
                    guard.armed = false;
                    return match slot.take() {
                        Some(item) => Err(item),
                        None => Ok(()),
                    };
                }
            }
            self.shared.item_taken.notified().await;
        }
    }

    /// True once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.receiver_closed.load(Ordering::Acquire)
    }
}

impl<T> Drop for RendezvousSender<T> {
    fn drop(&mut self) {
        self.shared.sender_closed.store(true, Ordering::Release);
        self.shared.item_ready.notify_one();
    }
}

impl<T> RendezvousReceiver<T> {
    /// Next item, or `None` once the sender is gone and nothing is pending.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let closed = self.shared.sender_closed.load(Ordering::Acquire);
            let taken = self.shared.slot.lock().take();
            if let Some(item) = taken {
                self.shared.item_taken.notify_one();
                return Some(item);
            }
            if closed {
                return None;
            }
            self.shared.item_ready.notified().await;
        }
    }

    /// Turn the receiver into a `Stream` of items.
    pub fn into_stream(self) -> impl futures::Stream<Item = T> + Send + 'static
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
    }
}

impl<T> Drop for RendezvousReceiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_closed.store(true, Ordering::Release);
        self.shared.item_taken.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn send_waits_for_receiver() {
        let (mut tx, mut rx) = rendezvous::<u32>();
        let handle = tokio::spawn(async move {
            tx.send(7).await.unwrap();
            tx
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished(), "send returned before the item was taken");

        assert_eq!(rx.recv().await, Some(7));
        let _tx = handle.await.unwrap();
    }

    #[tokio::test]
    async fn items_arrive_in_order() {
        let (mut tx, rx) = rendezvous::<u32>();
        tokio::spawn(async move {
            for i in 0..5 {
                tx.send(i).await.unwrap();
            }
        });
        let got: Vec<u32> = rx.into_stream().collect().await;
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn recv_returns_none_after_sender_dropped() {
        let (tx, mut rx) = rendezvous::<u32>();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn send_fails_with_item_when_receiver_dropped() {
        let (mut tx, rx) = rendezvous::<String>();
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.send("x".into()).await, Err("x".to_string()));
    }

    #[tokio::test]
    async fn receiver_drop_wakes_blocked_sender() {
        let (mut tx, rx) = rendezvous::<u32>();
        let handle = tokio::spawn(async move { tx.send(1).await });
        tokio::task::yield_now().await;
        drop(rx);
        assert_eq!(handle.await.unwrap(), Err(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_send_retracts_item() {
        let (mut tx, mut rx) = rendezvous::<u32>();
        let res = tokio::time::timeout(Duration::from_secs(1), tx.send(9)).await;
        assert!(res.is_err());
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }
}
