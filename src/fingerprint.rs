//! Content-addressed fingerprints and the in-flight dedup cache.
//!
//! A [`Fingerprint`] is the first 128 bits of the BLAKE3 hash of a tool
//! call's canonical form. Collisions are treated as equality for dedup
//! purposes.
//!
//! The [`InflightCache`] maps fingerprints to shared pending-result
//! handles so that duplicate calls share a single execution: the first
//! caller becomes the owner and runs the dispatch, later callers follow
//! the owner's `watch` channel. Entries are evicted in insertion order
//! once the capacity is exceeded, bounding memory.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::watch;

/// A 128-bit content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Fingerprint a canonical UTF-8 serialization.
    pub fn of(canonical: &str) -> Self {
        let hash = blake3::hash(canonical.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..16]);
        Self(bytes)
    }

    /// Lowercase 32-character hex form (the `hex128` wire shape).
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(32);
        for b in &self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    /// Parse the 32-character hex form.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).ok_or_else(|| D::Error::custom("expected 32 hex characters"))
    }
}

/// The caller's role for one fingerprint in the [`InflightCache`].
pub enum InflightSlot<T> {
    /// First caller: run the work and publish the result.
    Owner(watch::Sender<Option<T>>),
    /// Duplicate caller: await the owner's published result.
    Follower(watch::Receiver<Option<T>>),
}

struct CacheInner<T> {
    entries: HashMap<Fingerprint, watch::Receiver<Option<T>>>,
    order: VecDeque<Fingerprint>,
}

/// Bounded fingerprint → pending-result map.
///
/// The map is shared across streams; at most one execution is in flight
/// per unique fingerprint. Completed results stay cached until evicted,
/// so a later identical call in the same stream reuses the payload.
pub struct InflightCache<T> {
    inner: Mutex<CacheInner<T>>,
    capacity: usize,
}

impl<T: Clone> InflightCache<T> {
    /// Create a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Claim a slot for `fingerprint`.
    ///
    /// The first caller receives [`InflightSlot::Owner`] and must publish
    /// exactly one result on the sender. Every later caller receives a
    /// [`InflightSlot::Follower`] receiver for the same channel.
    pub fn claim(&self, fingerprint: Fingerprint) -> InflightSlot<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(rx) = inner.entries.get(&fingerprint) {
            return InflightSlot::Follower(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        inner.entries.insert(fingerprint, rx);
        inner.order.push_back(fingerprint);
        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
        InflightSlot::Owner(tx)
    }

    /// Number of cached fingerprints.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Await a published result on a follower receiver.
///
/// Returns `None` when the owner was dropped without publishing
/// (cancellation).
pub async fn await_result<T: Clone>(mut rx: watch::Receiver<Option<T>>) -> Option<T> {
    match rx.wait_for(|v| v.is_some()).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    }
}
