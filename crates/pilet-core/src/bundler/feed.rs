//! Bundle hand-off between the session and the server.
//!
//! The coordinator owns the [`BundlePublisher`]; the server reaches the same
//! state through the [`BundleFeed`] carried by the session injector. The
//! latest good bundle is always available, so a failed rebuild leaves the
//! server serving the previous artifact.

use super::Bundle;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Reload signal capacity. Slow clients skip missed signals, they only need the last one.
const READY_CAPACITY: usize = 16;

/// Emitted after a bundle has been post-processed and published.
#[derive(Debug, Clone)]
pub struct BundleReady {
    pub hash: String,
}

/// Write side, held by the session coordinator.
#[derive(Debug)]
pub struct BundlePublisher {
    latest: watch::Sender<Option<Arc<Bundle>>>,
    ready: broadcast::Sender<BundleReady>,
}

/// Read side, handed to the server through the session injector.
#[derive(Debug, Clone)]
pub struct BundleFeed {
    latest: watch::Receiver<Option<Arc<Bundle>>>,
    ready: broadcast::Sender<BundleReady>,
}

impl BundleFeed {
    /// Create a connected publisher/feed pair.
    #[must_use]
    pub fn channel() -> (BundlePublisher, BundleFeed) {
        let (latest_tx, latest_rx) = watch::channel(None);
        let (ready_tx, _) = broadcast::channel(READY_CAPACITY);
        (
            BundlePublisher {
                latest: latest_tx,
                ready: ready_tx.clone(),
            },
            BundleFeed {
                latest: latest_rx,
                ready: ready_tx,
            },
        )
    }

    /// The most recent successfully built bundle.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Bundle>> {
        self.latest.borrow().clone()
    }

    /// Subscribe to bundle-ready signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BundleReady> {
        self.ready.subscribe()
    }
}

impl BundlePublisher {
    /// Make `bundle` the one the server serves.
    pub fn publish(&self, bundle: Bundle) {
        self.latest.send_replace(Some(Arc::new(bundle)));
    }

    /// Signal connected clients that a new bundle is ready.
    /// Returns how many subscribers received it.
    pub fn signal_ready(&self) -> usize {
        let hash = self
            .latest
            .borrow()
            .as_ref()
            .map(|b| b.hash.clone())
            .unwrap_or_default();
        self.ready.send(BundleReady { hash }).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn bundle(hash: &str) -> Bundle {
        Bundle {
            entry: PathBuf::from("/out/index.js"),
            out_dir: PathBuf::from("/out"),
            files: Vec::new(),
            hash: hash.to_string(),
            duration: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_publish_then_signal() {
        let (publisher, feed) = BundleFeed::channel();
        assert!(feed.latest().is_none());

        let mut rx = feed.subscribe();
        publisher.publish(bundle("abc"));
        assert_eq!(feed.latest().unwrap().hash, "abc");

        assert_eq!(publisher.signal_ready(), 1);
        assert_eq!(rx.recv().await.unwrap().hash, "abc");
    }

    #[test]
    fn test_signal_without_subscribers() {
        let (publisher, _feed) = BundleFeed::channel();
        publisher.publish(bundle("abc"));
        assert_eq!(publisher.signal_ready(), 0);
    }

    #[test]
    fn test_clones_share_latest() {
        let (publisher, feed) = BundleFeed::channel();
        let other = feed.clone();
        publisher.publish(bundle("one"));
        publisher.publish(bundle("two"));
        assert_eq!(other.latest().unwrap().hash, "two");
    }
}
