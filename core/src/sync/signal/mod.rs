mod instrumentation;

use crate::sync::signal::instrumentation::{record_set_applied, record_set_skipped};
use atomic_refcell::AtomicRefCell;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError as BroadcastRecvError;
use tokio::sync::broadcast::{Receiver as BroadcastReceiver, Sender as BroadcastSender, channel};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::trace;

#[derive(Debug, Error)]
#[error("Receiver error")]
pub struct RecvError;

/// Creates a named, change-suppressing value cell. Receivers are only notified when the
/// stored value actually changes.
pub fn signal<T: PartialEq>(name: &'static str) -> (Sender<T>, Receiver<T>) {
    let data = Arc::new(RwLock::new(None));
    let (tx, rx) = channel(16);
    (
        Sender {
            name,
            data: data.clone(),
            tx: tx.clone(),
        },
        Receiver {
            name,
            tx,
            rx: AtomicRefCell::new(rx),
            data,
        },
    )
}

#[derive(Clone, Debug)]
pub struct Sender<T: PartialEq> {
    name: &'static str,
    data: Arc<RwLock<Option<T>>>,
    tx: BroadcastSender<()>,
}

impl<T: PartialEq> Sender<T> {
    pub async fn get(&self) -> RwLockReadGuard<'_, Option<T>> {
        self.data.read().await
    }

    /// Returns `true` when the value changed and receivers were notified.
    pub async fn set(&self, value: T) -> bool {
        let mut data = self.data.write().await;
        if data.as_ref() == Some(&value) {
            record_set_skipped(self.name);
            return false;
        }

        record_set_applied(self.name);
        data.replace(value);
        let _ = self.tx.send(());
        true
    }

    /// Applies `f` to the current value under the write lock. Receivers are notified only if
    /// the resulting value differs from the previous one.
    pub async fn modify<F>(&self, f: F) -> bool
    where
        T: Clone,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let mut data = self.data.write().await;
        let next = f(data.clone());
        if *data == next {
            record_set_skipped(self.name);
            return false;
        }

        record_set_applied(self.name);
        *data = next;
        let _ = self.tx.send(());
        true
    }

    pub async fn clear(&self) {
        let mut data = self.data.write().await;
        if data.take().is_some() {
            trace!("Cleared value in signal; signal.name={}", self.name);
            let _ = self.tx.send(());
        }
    }
}

#[derive(Debug)]
pub struct Receiver<T: PartialEq> {
    name: &'static str,
    tx: BroadcastSender<()>,
    rx: AtomicRefCell<BroadcastReceiver<()>>,
    data: Arc<RwLock<Option<T>>>,
}

impl<T: PartialEq> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        let rx = self.tx.subscribe();
        Receiver {
            name: self.name,
            tx: self.tx.clone(),
            rx: AtomicRefCell::new(rx),
            data: self.data.clone(),
        }
    }
}

impl<T: PartialEq> Receiver<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self) -> RwLockReadGuard<'_, Option<T>> {
        self.data.read().await
    }

    pub async fn changed(&self) -> Result<(), RecvError> {
        let mut rx = self.rx.borrow_mut();
        loop {
            match rx.recv().await {
                Ok(()) => return Ok(()),
                // Missed notifications still mean the value changed.
                Err(BroadcastRecvError::Lagged(_)) => return Ok(()),
                Err(BroadcastRecvError::Closed) => {
                    trace!("Sender dropped; signal.name={}", self.name);
                    return Err(RecvError);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_ok;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Duration, timeout};
    use tokio_test::assert_pending;

    #[tokio::test]
    async fn test_signal_set_and_clear() {
        let (tx, rx) = signal("test_signal");
        assert_eq!(rx.get().await.as_ref(), None);

        assert!(tx.set(43).await);
        assert_eq!(rx.get().await.as_ref(), Some(&43));

        tx.clear().await;
        assert_eq!(rx.get().await.as_ref(), None);

        assert!(tx.set(44).await);
        assert!(!tx.set(44).await);
        assert_eq!(rx.get().await.as_ref(), Some(&44));
    }

    #[tokio::test]
    async fn test_changed_is_pending_until_set() {
        let (tx, rx) = signal("test_signal_notification");

        {
            let mut changed = std::pin::pin!(rx.changed());
            assert_pending!(tokio_test::task::spawn(&mut changed).poll());
        }

        tx.set(42).await;
        assert_ok!(rx.changed().await);
        assert_eq!(rx.get().await.as_ref(), Some(&42));
    }

    #[tokio::test]
    async fn test_equal_values_do_not_notify() {
        let (tx, rx) = signal("test_signal_equal_values");
        let rx2 = rx.clone();

        let notify_count = Arc::new(AtomicUsize::new(0));
        let notify_count_clone = notify_count.clone();

        let handle = tokio::spawn(async move {
            while notify_count_clone.load(Ordering::SeqCst) < 4 {
                if rx2.changed().await.is_err() {
                    break;
                }
                notify_count_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        tx.set(1).await;
        tx.set(2).await;
        tx.set(3).await;
        tx.set(3).await;
        tx.set(4).await;

        let result = timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "all notifications should arrive");
        assert_eq!(notify_count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_modify_only_notifies_on_change() {
        let (tx, rx) = signal::<Vec<&'static str>>("test_signal_modify");

        assert!(
            tx.modify(|current| {
                let mut v = current.unwrap_or_default();
                v.push("Gateway");
                Some(v)
            })
            .await
        );
        assert!(!tx.modify(|current| current).await);
        assert_eq!(rx.get().await.as_ref(), Some(&vec!["Gateway"]));
    }

    #[tokio::test]
    async fn test_sender_dropped_keeps_last_value() {
        let (tx, rx) = signal("test_signal_sender_dropped");

        tx.set(100).await;
        let rx2 = rx.clone();
        drop(tx);

        assert_eq!(rx.get().await.as_ref(), Some(&100));
        assert_eq!(rx2.get().await.as_ref(), Some(&100));
        assert!(rx2.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_on_changed() {
        let (_tx, rx) = signal::<i32>("test_signal_timeout");

        let result = timeout(Duration::from_millis(10), rx.changed()).await;
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn test_signal_keeps_last_value(values in prop::collection::vec(any::<i32>(), 0..20)) {
            let runtime = assert_ok!(tokio::runtime::Runtime::new());
            runtime.block_on(async {
                let (tx, rx) = signal("test_signal_properties");

                for value in &values {
                    tx.set(*value).await;
                }

                assert_eq!(rx.get().await.as_ref(), values.last());
            });
        }
    }
}
