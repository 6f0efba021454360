//! Dial deduplication and backoff.
//!
//! Concurrent `dial_peer` calls for one peer share a single attempt: the first caller
//! starts it on the network scope, everyone (the first caller included) waits for its
//! outcome. A failed attempt puts the peer into backoff for a while.

use crate::error::DialError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strand_core::{PeerId, Scope};
use tokio::sync::watch;

type Outcome = Option<Result<(), DialError>>;

/// At most one in-flight dial per peer.
#[derive(Default)]
pub(crate) struct DialSync {
    pending: Arc<DashMap<PeerId, watch::Receiver<Outcome>>>,
}

impl DialSync {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight dial for `peer`, or run `start` as a new one on `scope`.
    pub(crate) async fn dial<F, Fut>(&self, peer: &PeerId, scope: &Scope, start: F) -> Result<(), DialError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), DialError>> + Send + 'static,
    {
        let (mut rx, leader) = match self.pending.entry(peer.clone()) {
            Entry::Occupied(e) => (e.get().clone(), None),
            Entry::Vacant(v) => {
                let (tx, rx) = watch::channel(None);
                v.insert(rx.clone());
                (rx, Some(tx))
            }
        };

        if let Some(tx) = leader {
            let attempt = start();
            let pending = Arc::clone(&self.pending);
            let peer = peer.clone();
            scope.spawn(move |scope| async move {
                let closing = scope.closing();
                let outcome = tokio::select! {
                    res = attempt => res,
                    () = closing.wait() => Err(DialError::Cancelled),
                };
                pending.remove(&peer);
                tx.send_replace(Some(outcome));
            });
        } else {
            tracing::trace!(peer = %peer.short(), "joining in-flight dial");
        }

        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(DialError::Cancelled)),
            Err(_) => Err(DialError::Cancelled),
        }
    }

    /// Whether a dial to `peer` is in flight.
    pub(crate) fn is_dialing(&self, peer: &PeerId) -> bool {
        self.pending.contains_key(peer)
    }
}

/// Peers that recently failed to dial.
pub(crate) struct DialBackoff {
    until: DashMap<PeerId, Instant>,
    period: Duration,
}

impl DialBackoff {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            until: DashMap::new(),
            period,
        }
    }

    /// Whether `peer` is still backing off. Expired entries are dropped.
    pub(crate) fn is_backing_off(&self, peer: &PeerId) -> bool {
        let now = Instant::now();
        let active = self.until.get(peer).is_some_and(|until| *until > now);
        if !active {
            self.until.remove_if(peer, |_, until| *until <= now);
        }
        active
    }

    pub(crate) fn add(&self, peer: &PeerId) {
        tracing::debug!(peer = %peer.short(), backoff = ?self.period, "dial failed, backing off");
        self.until.insert(peer.clone(), Instant::now() + self.period);
    }

    pub(crate) fn clear(&self, peer: &PeerId) {
        self.until.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strand_crypto::KeyType;

    fn peer() -> PeerId {
        strand_core::peer::generate(KeyType::Ed25519).2
    }

    #[tokio::test]
    async fn test_concurrent_dials_share_one_attempt() {
        let sync = Arc::new(DialSync::new());
        let scope = Scope::new("dials");
        let p = peer();
        let starts = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let sync = Arc::clone(&sync);
            let scope = scope.clone();
            let p = p.clone();
            let starts = Arc::clone(&starts);
            waiters.push(tokio::spawn(async move {
                sync.dial(&p, &scope, || {
                    starts.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(DialError::Timeout)
                    }
                })
                .await
            }));
        }
        for w in waiters {
            assert_eq!(w.await.unwrap(), Err(DialError::Timeout));
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!sync.is_dialing(&p));
    }

    #[tokio::test]
    async fn test_closing_scope_cancels_dial() {
        let sync = DialSync::new();
        let scope = Scope::new("dials");
        let p = peer();

        let closer = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = closer.close().await;
        });
        let res = sync
            .dial(&p, &scope, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(DialError::Cancelled));
    }

    #[test]
    fn test_backoff_expires() {
        let backoff = DialBackoff::new(Duration::from_millis(30));
        let p = peer();
        assert!(!backoff.is_backing_off(&p));
        backoff.add(&p);
        assert!(backoff.is_backing_off(&p));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!backoff.is_backing_off(&p));

        backoff.add(&p);
        backoff.clear(&p);
        assert!(!backoff.is_backing_off(&p));
    }
}
