//! Challenge Index (component B) — §4.1 "Challenge Index"
//!
//! Bounded, time-expiring, at-most-once set of outstanding server-issued
//! nonces. `issue` draws 32 bytes from a CSPRNG and records the insertion
//! time; `consume` atomically removes and returns true iff the nonce was
//! present and inserted within the last `ttl` seconds. Because consumption
//! removes the entry, replay of an already-verified bundle is rejected once
//! its nonce has been consumed (property 1, §8).

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
struct ChallengeEntry {
    issued_at: DateTime<Utc>,
}

/// Thread-safe, capacity-bounded, time-expiring nonce index.
#[derive(Debug)]
pub struct ChallengeStore {
    challenges: RwLock<HashMap<[u8; 32], ChallengeEntry>>,
    /// Insertion order, oldest first, used to evict once `capacity` is
    /// exceeded regardless of expiry (§4.1: "Eviction is driven by write
    /// count and age; the cap exists to bound memory under challenge-flood
    /// attacks").
    insertion_order: RwLock<VecDeque<[u8; 32]>>,
    ttl: Duration,
    capacity: usize,
}

impl ChallengeStore {
    pub fn new(ttl_secs: i64, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            challenges: RwLock::new(HashMap::new()),
            insertion_order: RwLock::new(VecDeque::new()),
            ttl: Duration::seconds(ttl_secs),
            capacity,
        })
    }

    /// Draws a fresh nonce and inserts it with the current timestamp.
    pub async fn issue(&self) -> [u8; 32] {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);

        let now = Utc::now();
        {
            let mut challenges = self.challenges.write().await;
            let mut order = self.insertion_order.write().await;
            challenges.insert(nonce, ChallengeEntry { issued_at: now });
            order.push_back(nonce);

            while challenges.len() > self.capacity {
                if let Some(oldest) = order.pop_front() {
                    challenges.remove(&oldest);
                } else {
                    break;
                }
            }
        }

        nonce
    }

    /// Atomically removes `nonce` and returns true iff it was present and
    /// issued within `ttl` of now (§8 properties 1 and 2).
    pub async fn consume(&self, nonce: &[u8; 32]) -> bool {
        let mut challenges = self.challenges.write().await;
        match challenges.remove(nonce) {
            Some(entry) => Utc::now() - entry.issued_at <= self.ttl,
            None => false,
        }
    }

    /// Removes entries older than `ttl`, independent of the capacity-driven
    /// eviction `issue` performs inline. Intended to be called periodically.
    pub async fn cleanup_expired(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        let mut challenges = self.challenges.write().await;
        let before = challenges.len();
        challenges.retain(|_, entry| now - entry.issued_at <= ttl);
        let removed = before - challenges.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired challenges");
        }
    }

    /// Spawns a background task that periodically sweeps expired entries,
    /// matching this codebase's existing `spawn_cleanup_task` idiom.
    pub fn spawn_cleanup_task(store: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                store.cleanup_expired().await;
            }
        })
    }
}
