//! Fixed-capacity registry of in-flight files.
//!
//! The tracker backs the live progress display: each file being processed
//! occupies one slot from acquisition to release, and the display renders a
//! snapshot of the occupied slots. Identity is the opaque `SlotId` only;
//! the tracker knows nothing about threads or file names.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::error;

/// Lifecycle phase of one in-flight file. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileStatus {
    Starting,
    Chunking,
    Vectorizing,
    Finalizing,
    Complete,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Chunking => write!(f, "chunking"),
            Self::Vectorizing => write!(f, "vectorizing"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Display entry for one occupied slot.
#[derive(Debug, Clone)]
pub struct FileData {
    pub filename: String,
    pub file_size: u64,
    pub status: FileStatus,
    pub started_at: Instant,
}

impl FileData {
    pub fn new(filename: String, file_size: u64) -> Self {
        Self {
            filename,
            file_size,
            status: FileStatus::Starting,
            started_at: Instant::now(),
        }
    }
}

/// Opaque handle for one acquired slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Slot registry with a hard capacity; acquisition waits for a free slot.
pub struct SlotTracker {
    permits: Semaphore,
    slots: Mutex<Vec<Option<FileData>>>,
    capacity: usize,
    acquired: AtomicU64,
    released: AtomicU64,
    double_releases: AtomicU64,
}

impl SlotTracker {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(capacity),
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            capacity,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            double_releases: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire a slot, waiting until one is free. The returned guard releases
    /// the slot exactly once when dropped, on every exit path.
    pub async fn acquire_slot(self: &Arc<Self>, file: FileData) -> SlotGuard {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("slot tracker semaphore closed");
        // The slot table hands the permit's lifetime over to release_slot.
        permit.forget();

        let id = {
            let mut slots = self.lock_slots();
            let index = slots
                .iter()
                .position(|slot| slot.is_none())
                .expect("free permit implies a free slot");
            slots[index] = Some(file);
            SlotId(index)
        };
        self.acquired.fetch_add(1, Ordering::Relaxed);

        SlotGuard {
            tracker: Arc::clone(self),
            id,
        }
    }

    /// Advance a slot's status. Regressions are rejected and logged; the
    /// stored status never moves backwards.
    pub fn update_slot(&self, id: SlotId, status: FileStatus) {
        let mut slots = self.lock_slots();
        match slots.get_mut(id.index()).and_then(|s| s.as_mut()) {
            Some(entry) => {
                if status < entry.status {
                    error!(
                        "rejected status regression {} -> {} on slot {}",
                        entry.status,
                        status,
                        id.index()
                    );
                    return;
                }
                entry.status = status;
            }
            None => error!("update_slot on unoccupied slot {}", id.index()),
        }
    }

    /// Free a slot. Releasing a slot twice is a defect; the second release is
    /// refused, counted, and logged rather than corrupting the permit count.
    pub fn release_slot(&self, id: SlotId) {
        let freed = {
            let mut slots = self.lock_slots();
            slots.get_mut(id.index()).and_then(|slot| slot.take())
        };
        match freed {
            Some(_) => {
                self.released.fetch_add(1, Ordering::Relaxed);
                self.permits.add_permits(1);
            }
            None => {
                self.double_releases.fetch_add(1, Ordering::Relaxed);
                error!("slot {} released twice", id.index());
            }
        }
    }

    /// Point-in-time copy of all occupied slots for the display.
    pub fn get_concurrent_files_data(&self) -> Vec<(SlotId, FileData)> {
        let slots = self.lock_slots();
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|data| (SlotId(i), data.clone())))
            .collect()
    }

    /// Number of currently occupied slots.
    pub fn occupied(&self) -> usize {
        self.lock_slots().iter().filter(|s| s.is_some()).count()
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn release_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn double_release_count(&self) -> u64 {
        self.double_releases.load(Ordering::Relaxed)
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Option<FileData>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// RAII handle for an acquired slot: drop releases it exactly once.
pub struct SlotGuard {
    tracker: Arc<SlotTracker>,
    id: SlotId,
}

impl SlotGuard {
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn update(&self, status: FileStatus) {
        self.tracker.update_slot(self.id, status);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.tracker.release_slot(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_update_release() {
        let tracker = SlotTracker::new(4);

        let guard = tracker
            .acquire_slot(FileData::new("a.rs".to_string(), 100))
            .await;
        assert_eq!(tracker.occupied(), 1);

        guard.update(FileStatus::Chunking);
        guard.update(FileStatus::Vectorizing);

        let snapshot = tracker.get_concurrent_files_data();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.filename, "a.rs");
        assert_eq!(snapshot[0].1.status, FileStatus::Vectorizing);

        drop(guard);
        assert_eq!(tracker.occupied(), 0);
        assert_eq!(tracker.acquire_count(), 1);
        assert_eq!(tracker.release_count(), 1);
        assert_eq!(tracker.double_release_count(), 0);
    }

    #[tokio::test]
    async fn test_status_regression_rejected() {
        let tracker = SlotTracker::new(2);
        let guard = tracker
            .acquire_slot(FileData::new("a.rs".to_string(), 1))
            .await;

        guard.update(FileStatus::Finalizing);
        guard.update(FileStatus::Chunking); // regression, ignored

        let snapshot = tracker.get_concurrent_files_data();
        assert_eq!(snapshot[0].1.status, FileStatus::Finalizing);
    }

    #[tokio::test]
    async fn test_double_release_detected() {
        let tracker = SlotTracker::new(2);
        let guard = tracker
            .acquire_slot(FileData::new("a.rs".to_string(), 1))
            .await;
        let id = guard.id();

        tracker.release_slot(id);
        assert_eq!(tracker.release_count(), 1);

        // Guard drop is the second release of the same slot
        drop(guard);
        assert_eq!(tracker.release_count(), 1);
        assert_eq!(tracker.double_release_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let tracker = SlotTracker::new(1);
        let held = tracker
            .acquire_slot(FileData::new("held.rs".to_string(), 1))
            .await;

        let tracker2 = Arc::clone(&tracker);
        let waiter = tokio::spawn(async move {
            tracker2
                .acquire_slot(FileData::new("waiting.rs".to_string(), 1))
                .await
        });

        // The second acquisition cannot complete while the slot is held
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let guard = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("acquire should proceed after release")
            .unwrap();
        assert_eq!(tracker.occupied(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let tracker = SlotTracker::new(2);
        let guard = tracker
            .acquire_slot(FileData::new("a.rs".to_string(), 1))
            .await;

        let snapshot = tracker.get_concurrent_files_data();
        guard.update(FileStatus::Complete);

        // The earlier snapshot still shows the status at capture time
        assert_eq!(snapshot[0].1.status, FileStatus::Starting);
    }
}
