//! Log anchor registry.
//!
//! In-memory structures that were rebuilt from the write-ahead log (an
//! unflushed delta memstore, chiefly) must prevent the log from truncating
//! the entries they still depend on. Each such holder registers an anchor
//! at the lowest log index it needs; log GC may only truncate strictly
//! below the minimum registered index.
//!
//! The registry is a sorted multimap from log index to anchors, guarded by
//! a single mutex held only for map operations. Anchors are plain handles
//! owned by their holders; leaking a registered anchor is a programming
//! error, and the registry asserts emptiness when dropped.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::types::INVALID_LOG_INDEX;

/// A handle pinning one log index. Created unregistered; the registry
/// manages its registration state.
#[derive(Debug)]
pub struct LogAnchor {
    id: u64,
    registered: bool,
    log_index: i64,
}

impl LogAnchor {
    pub fn new() -> Self {
        Self {
            id: 0,
            registered: false,
            log_index: INVALID_LOG_INDEX,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn log_index(&self) -> i64 {
        self.log_index
    }
}

impl Default for LogAnchor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogAnchor {
    fn drop(&mut self) {
        debug_assert!(
            !self.registered,
            "dropped a LogAnchor still registered at index {}",
            self.log_index
        );
    }
}

#[derive(Debug)]
struct AnchorEntry {
    id: u64,
    owner: String,
    when_registered: Instant,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// index -> anchors registered at that index, insertion-ordered.
    anchors: BTreeMap<i64, Vec<AnchorEntry>>,
    next_anchor_id: u64,
    count: usize,
}

impl RegistryInner {
    fn register(&mut self, log_index: i64, owner: &str, anchor: &mut LogAnchor) {
        debug_assert!(!anchor.registered);
        self.next_anchor_id += 1;
        anchor.id = self.next_anchor_id;
        anchor.log_index = log_index;
        anchor.registered = true;
        self.anchors.entry(log_index).or_default().push(AnchorEntry {
            id: anchor.id,
            owner: owner.to_string(),
            when_registered: Instant::now(),
        });
        self.count += 1;
    }

    fn unregister(&mut self, anchor: &mut LogAnchor) -> Result<()> {
        let entries = self.anchors.get_mut(&anchor.log_index).ok_or_else(|| {
            Error::NotFound(format!("no anchors at index {}", anchor.log_index))
        })?;
        let pos = entries.iter().position(|e| e.id == anchor.id).ok_or_else(|| {
            Error::NotFound(format!(
                "anchor {} not registered at index {}",
                anchor.id, anchor.log_index
            ))
        })?;
        entries.remove(pos);
        if entries.is_empty() {
            self.anchors.remove(&anchor.log_index);
        }
        anchor.registered = false;
        self.count -= 1;
        Ok(())
    }
}

/// Tracks the minimum log index required by any in-memory structure.
#[derive(Debug, Default)]
pub struct LogAnchorRegistry {
    inner: Mutex<RegistryInner>,
}

impl LogAnchorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `anchor` at `log_index`. The anchor must not already be
    /// registered.
    pub fn register(&self, log_index: i64, owner: &str, anchor: &mut LogAnchor) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if anchor.registered {
            return Err(Error::IllegalState(format!(
                "anchor already registered at index {}",
                anchor.log_index
            )));
        }
        inner.register(log_index, owner, anchor);
        Ok(())
    }

    /// Register `anchor` at `log_index`, atomically unregistering it first
    /// if it is currently registered elsewhere.
    pub fn register_or_update(
        &self,
        log_index: i64,
        owner: &str,
        anchor: &mut LogAnchor,
    ) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if anchor.registered {
            inner.unregister(anchor)?;
        }
        inner.register(log_index, owner, anchor);
        Ok(())
    }

    /// Remove `anchor`; fails with NotFound if it is not registered.
    pub fn unregister(&self, anchor: &mut LogAnchor) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if !anchor.registered {
            return Err(Error::NotFound("anchor is not registered".to_string()));
        }
        inner.unregister(anchor)
    }

    /// Remove `anchor` if registered; a no-op otherwise.
    pub fn unregister_if_anchored(&self, anchor: &mut LogAnchor) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if !anchor.registered {
            return Ok(());
        }
        inner.unregister(anchor)
    }

    /// The smallest registered index, or NotFound when no anchors are held.
    pub fn earliest_registered_log_index(&self) -> Result<i64> {
        let inner = self.inner.lock()?;
        inner
            .anchors
            .keys()
            .next()
            .copied()
            .ok_or_else(|| Error::NotFound("no anchors in registry".to_string()))
    }

    /// Number of registered anchors.
    pub fn anchor_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.count).unwrap_or(0)
    }

    /// Human-readable dump of every registered anchor, for diagnostics.
    pub fn dump_anchor_info(&self) -> String {
        let mut buf = String::new();
        let Ok(inner) = self.inner.lock() else {
            return buf;
        };
        let now = Instant::now();
        for (index, entries) in &inner.anchors {
            for entry in entries {
                if !buf.is_empty() {
                    buf.push_str(", ");
                }
                let _ = write!(
                    buf,
                    "LogAnchor[index={}, age={:.3}s, owner={}]",
                    index,
                    now.duration_since(entry.when_registered).as_secs_f64(),
                    entry.owner
                );
            }
        }
        buf
    }
}

impl Drop for LogAnchorRegistry {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let inner = self
            .inner
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        assert!(
            inner.anchors.is_empty(),
            "log anchor registry dropped with {} anchors still registered",
            inner.count
        );
    }
}

/// Wraps a single anchor for a holder that wants "pin the lowest index I
/// have ever seen". Typical holder: a delta memstore pinning the log entry
/// of its first mutation.
#[derive(Debug)]
pub struct MinLogIndexAnchorer {
    registry: Arc<LogAnchorRegistry>,
    owner: String,
    inner: Mutex<AnchorerInner>,
}

#[derive(Debug)]
struct AnchorerInner {
    anchor: LogAnchor,
    minimum_log_index: i64,
}

impl MinLogIndexAnchorer {
    pub fn new(registry: Arc<LogAnchorRegistry>, owner: impl Into<String>) -> Self {
        Self {
            registry,
            owner: owner.into(),
            inner: Mutex::new(AnchorerInner {
                anchor: LogAnchor::new(),
                minimum_log_index: INVALID_LOG_INDEX,
            }),
        }
    }

    /// Anchor at `log_index` if it is lower than the current minimum (or no
    /// anchor is held yet).
    pub fn anchor_if_minimum(&self, log_index: i64) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if inner.minimum_log_index == INVALID_LOG_INDEX || log_index < inner.minimum_log_index {
            inner.minimum_log_index = log_index;
            return self
                .registry
                .register_or_update(log_index, &self.owner, &mut inner.anchor);
        }
        Ok(())
    }

    /// Release the anchor if held. Idempotent.
    pub fn release_anchor(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        self.registry.unregister_if_anchored(&mut inner.anchor)
    }

    /// The lowest index ever anchored, or `INVALID_LOG_INDEX` if none.
    pub fn minimum_log_index(&self) -> i64 {
        self.inner
            .lock()
            .map(|inner| inner.minimum_log_index)
            .unwrap_or(INVALID_LOG_INDEX)
    }
}

impl Drop for MinLogIndexAnchorer {
    fn drop(&mut self) {
        let released = self.release_anchor();
        debug_assert!(released.is_ok(), "release on drop failed: {released:?}");
    }
}
