//! Version-guarded state cell
//!
//! The shared local lock keeps its whole mutable state in one snapshot and
//! advances it with compare-and-set. `VersionedCell` is that primitive: a
//! mutex-guarded value paired with a version counter.

use std::sync::Mutex;

/// A value guarded by a version counter.
///
/// Writers read a snapshot together with its version, compute the next
/// snapshot, and install it with [`compare_and_set`]. A failed install means
/// a concurrent writer got there first; callers re-read and retry.
///
/// [`compare_and_set`]: VersionedCell::compare_and_set
pub struct VersionedCell<T> {
    inner: Mutex<Versioned<T>>,
}

struct Versioned<T> {
    version: u64,
    value: T,
}

impl<T: Clone> VersionedCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Versioned { version: 0, value }),
        }
    }

    /// Returns the current version and a clone of the value.
    pub fn load(&self) -> (u64, T) {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (guard.version, guard.value.clone())
    }

    /// Installs `next` and bumps the version iff the version still equals
    /// `expected`.
    pub fn compare_and_set(&self, expected: u64, next: T) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.version != expected {
            return false;
        }
        guard.version = guard.version.wrapping_add(1);
        guard.value = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_load_returns_initial_value() {
        let cell = VersionedCell::new(7u32);
        let (version, value) = cell.load();
        assert_eq!(version, 0);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_compare_and_set_advances_version() {
        let cell = VersionedCell::new(1u32);
        let (version, value) = cell.load();
        assert!(cell.compare_and_set(version, value + 1));
        let (version, value) = cell.load();
        assert_eq!(version, 1);
        assert_eq!(value, 2);
    }

    #[test]
    fn test_stale_compare_and_set_fails() {
        let cell = VersionedCell::new(1u32);
        let (version, _) = cell.load();
        assert!(cell.compare_and_set(version, 2));
        assert!(!cell.compare_and_set(version, 3));
        let (_, value) = cell.load();
        assert_eq!(value, 2);
    }

    #[test]
    fn test_concurrent_increments_all_land() {
        let cell = Arc::new(VersionedCell::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cell = Arc::clone(&cell);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    loop {
                        let (version, value) = cell.load();
                        if cell.compare_and_set(version, value + 1) {
                            break;
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let (version, value) = cell.load();
        assert_eq!(value, 1000);
        assert_eq!(version, 1000);
    }
}
