//! Change subscriptions and outbound notifications.
//!
//! State machines publish a snapshot after every mutation; shells that
//! render state subscribe instead of polling the store.

use std::fmt;
use std::sync::Mutex;

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A list of callbacks invoked with each published snapshot
pub struct Subscribers<T> {
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(callback));
    }

    /// Deliver a snapshot to every subscriber, in subscription order
    pub fn publish(&self, snapshot: &T) {
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback(snapshot);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

/// Fire-and-forget delivery of user-facing notifications
pub trait Notifier {
    fn notify(&self, title: &str, body: &str);
}

/// Notifier that only records the notification in the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        tracing::info!(title, body, "Notification delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let subscribers: Subscribers<u32> = Subscribers::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            subscribers.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        subscribers.publish(&2);
        assert_eq!(subscribers.len(), 3);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let subscribers: Subscribers<String> = Subscribers::default();
        assert!(subscribers.is_empty());
        subscribers.publish(&"ignored".to_string());
    }
}
