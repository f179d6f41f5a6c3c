//! Snapshot cache: the single most-recent snapshot plus its refresh policy.
//!
//! One writer, cooperative model: captures replace the cached snapshot
//! wholesale, readers clone a reference for the duration of one
//! interpretation and never re-read mid-flight. Page lifecycle wiring forces
//! a capture on document-ready and on full load as well as on mutation
//! settle, so up to three captures can land during initial page load; that
//! overhead is accepted rather than deduplicated.

use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};

use crate::CAPTURE_MAX_DEPTH;
use crate::dom::RawDomNode;
use crate::snapshot::{self, Snapshot};

/// Anything that can dump the live element tree.
pub trait DomSource {
    fn raw_dom(&self) -> Result<RawDomNode>;
}

/// Quiet period after the last mutation before a recapture fires.
pub const MUTATION_QUIET_MS: u64 = 500;

/// Holds the most recent snapshot for one page context.
pub struct SnapshotCache {
    snapshot: Option<Snapshot>,
    max_depth: usize,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(CAPTURE_MAX_DEPTH)
    }
}

impl SnapshotCache {
    pub fn new(max_depth: usize) -> Self {
        Self {
            snapshot: None,
            max_depth,
        }
    }

    /// Force a fresh serialize from the document root, replacing the cache.
    pub fn capture(&mut self, source: &dyn DomSource) -> Result<&Snapshot> {
        let raw = source.raw_dom()?;
        let tree = snapshot::serialize(&raw, self.max_depth)
            .context("document root was filtered out of the snapshot")?;
        self.snapshot = Some(Snapshot::new(tree));
        tracing::debug!(
            nodes = self.snapshot.as_ref().map(|s| s.tree.count_nodes()),
            "snapshot captured"
        );
        Ok(self.snapshot.as_ref().unwrap())
    }

    /// Cached snapshot, capturing first when absent.
    pub fn get(&mut self, source: &dyn DomSource) -> Result<&Snapshot> {
        if self.snapshot.is_none() {
            self.capture(source)?;
        }
        Ok(self.snapshot.as_ref().unwrap())
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.snapshot = None;
    }
}

/// Debounced recapture scheduling for DOM mutation bursts.
///
/// Each mutation resets the timer; the recapture fires only after a full
/// quiet period. Attribute-only mutations are not reported by the observer
/// wiring, so they never reach this type.
pub struct MutationDebouncer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Default for MutationDebouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(MUTATION_QUIET_MS))
    }
}

impl MutationDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    /// A subtree/child-list mutation was observed.
    pub fn record_mutation(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    /// True exactly once when the quiet period has elapsed.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Explicit staleness enforcement: snapshots older than `max_age` are
/// recaptured before they ride along on a DOM-bearing request.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    pub max_age: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30),
        }
    }
}

impl StalenessPolicy {
    pub fn is_stale(&self, snapshot: &Snapshot, now: SystemTime) -> bool {
        snapshot.age(now) > self.max_age
    }

    /// A snapshot no older than `max_age`, recapturing when needed.
    pub fn fresh<'a>(
        &self,
        cache: &'a mut SnapshotCache,
        source: &dyn DomSource,
        now: SystemTime,
    ) -> Result<&'a Snapshot> {
        let stale = match cache.current() {
            Some(snapshot) => self.is_stale(snapshot, now),
            None => true,
        };
        if stale {
            cache.capture(source)?;
        }
        Ok(cache.current().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::test_support::{el, with_text};
    use std::cell::Cell;

    struct FakeSource {
        captures: Cell<usize>,
        text: &'static str,
    }

    impl FakeSource {
        fn new(text: &'static str) -> Self {
            Self {
                captures: Cell::new(0),
                text,
            }
        }
    }

    impl DomSource for FakeSource {
        fn raw_dom(&self) -> Result<RawDomNode> {
            self.captures.set(self.captures.get() + 1);
            Ok(el("body", vec![with_text(el("p", vec![]), self.text)]))
        }
    }

    #[test]
    fn get_captures_when_empty_and_reuses_afterwards() {
        let source = FakeSource::new("hello");
        let mut cache = SnapshotCache::default();
        cache.get(&source).unwrap();
        cache.get(&source).unwrap();
        assert_eq!(source.captures.get(), 1);
    }

    #[test]
    fn capture_replaces_the_snapshot_wholesale() {
        let first = FakeSource::new("one");
        let second = FakeSource::new("two");
        let mut cache = SnapshotCache::default();
        cache.capture(&first).unwrap();
        cache.capture(&second).unwrap();
        assert_eq!(cache.current().unwrap().tree.children[0].text, "two");
    }

    #[test]
    fn each_mutation_resets_the_quiet_period() {
        let mut debouncer = MutationDebouncer::default();
        let start = Instant::now();
        debouncer.record_mutation(start);
        debouncer.record_mutation(start + Duration::from_millis(400));
        // 500ms after the first mutation, but only 100ms after the second.
        assert!(!debouncer.fire_due(start + Duration::from_millis(500)));
        assert!(debouncer.fire_due(start + Duration::from_millis(900)));
        // Fires exactly once.
        assert!(!debouncer.fire_due(start + Duration::from_millis(901)));
    }

    #[test]
    fn staleness_policy_recaptures_old_snapshots() {
        let source = FakeSource::new("fresh");
        let mut cache = SnapshotCache::default();
        let policy = StalenessPolicy {
            max_age: Duration::from_secs(30),
        };
        cache.capture(&source).unwrap();
        let captured_at = cache.current().unwrap().captured_at;

        // Within the bound: untouched.
        policy
            .fresh(&mut cache, &source, captured_at + Duration::from_secs(10))
            .unwrap();
        assert_eq!(source.captures.get(), 1);

        // Beyond the bound: recaptured.
        policy
            .fresh(&mut cache, &source, captured_at + Duration::from_secs(31))
            .unwrap();
        assert_eq!(source.captures.get(), 2);
    }
}
