//! Per-address notification callbacks.
//!
//! Each mesh address has at most one callback. Registering again for the
//! same address replaces the previous callback (the replacement is logged);
//! there is no unsubscribe.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Callback receiving the full decrypted frame from one device
pub type NotificationCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Map of mesh address to callback
#[derive(Default)]
pub struct SubscriptionRegistry {
    callbacks: DashMap<u8, NotificationCallback>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `address`, returning true if it replaced one
    pub fn register(&self, address: u8, callback: NotificationCallback) -> bool {
        let replaced = self.callbacks.insert(address, callback).is_some();
        if replaced {
            info!("Replaced notification callback for device {}", address);
        } else {
            debug!("Registered notification callback for device {}", address);
        }
        replaced
    }

    /// Whether `address` has a callback
    pub fn contains(&self, address: u8) -> bool {
        self.callbacks.contains_key(&address)
    }

    /// Number of registered addresses
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callback is registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Hand a decrypted frame to the callback of its sender (byte 0).
    ///
    /// Returns false when the frame is empty or the sender has no callback.
    pub fn dispatch(&self, frame: Bytes) -> bool {
        let Some(&sender) = frame.first() else {
            debug!("Discarding empty notification");
            return false;
        };

        // Clone out so the callback runs without holding the shard lock
        let callback = self.callbacks.get(&sender).map(|entry| Arc::clone(entry.value()));
        match callback {
            Some(callback) => {
                callback(frame);
                true
            }
            None => {
                debug!("No subscriber for device {}, discarding notification", sender);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (NotificationCallback, Arc<Mutex<Vec<Bytes>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: NotificationCallback = Arc::new(move |frame| sink.lock().unwrap().push(frame));
        (callback, seen)
    }

    #[test]
    fn test_dispatch_by_sender() {
        let registry = SubscriptionRegistry::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        registry.register(1, a);
        registry.register(2, b);

        assert!(registry.dispatch(Bytes::from_static(&[2, 0, 0, 0, 0x97, 1])));
        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap()[0].as_ref(), &[2, 0, 0, 0, 0x97, 1]);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = SubscriptionRegistry::new();
        let (first, seen_first) = recorder();
        let (second, seen_second) = recorder();

        assert!(!registry.register(5, first));
        assert!(registry.register(5, second));
        assert_eq!(registry.len(), 1);

        registry.dispatch(Bytes::from_static(&[5, 0, 0, 0, 0x97]));
        assert!(seen_first.lock().unwrap().is_empty());
        assert_eq!(seen_second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unmatched_and_empty_frames_are_discarded() {
        let registry = SubscriptionRegistry::new();
        let (callback, seen) = recorder();
        registry.register(1, callback);

        assert!(!registry.dispatch(Bytes::from_static(&[9, 0, 0, 0, 0x97])));
        assert!(!registry.dispatch(Bytes::new()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register(
            3,
            Arc::new(move |_| {
                let (callback, _) = recorder();
                inner.register(4, callback);
            }),
        );

        assert!(registry.dispatch(Bytes::from_static(&[3])));
        assert!(registry.contains(4));
    }
}
