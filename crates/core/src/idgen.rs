//! ID generation with recycling

use parking_lot::Mutex;
use std::sync::atomic::{self, AtomicU64};

/// Thread-safe ID generator that hands released IDs back out before
/// allocating fresh ones
pub struct IdGenerator<T: Copy + Into<u64> + From<u64> + Eq> {
    released: Mutex<Vec<T>>,
    next_id: AtomicU64,
}

impl<T: Copy + Into<u64> + From<u64> + Eq> IdGenerator<T> {
    /// Create a generator whose first ID is `start`
    pub fn starting_at(start: u64) -> Self {
        Self {
            released: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(start),
        }
    }

    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Get the next available ID
    pub fn get_available_id(&self) -> T {
        if let Some(id) = self.released.lock().pop() {
            return id;
        }
        T::from(self.next_id.fetch_add(1, atomic::Ordering::Relaxed))
    }

    /// Return an ID to the pool
    pub fn release(&self, id: T) {
        let mut released = self.released.lock();
        if !released.contains(&id) {
            released.push(id);
        }
    }
}

impl<T: Copy + Into<u64> + From<u64> + Eq> Default for IdGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptId;

    #[test]
    fn test_id_generation() {
        let gen = IdGenerator::<ScriptId>::new();
        let id1 = gen.get_available_id();
        let id2 = gen.get_available_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_released_ids_are_reused() {
        let gen = IdGenerator::<ScriptId>::new();
        let id1 = gen.get_available_id();
        let _id2 = gen.get_available_id();
        gen.release(id1);
        assert_eq!(gen.get_available_id(), id1);
    }
}
