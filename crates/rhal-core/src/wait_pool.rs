use parking_lot::Mutex;

use crate::fence::Fence;

/// A reusable array of wait handles. Slots keep whatever the previous
/// user left in them; callers overwrite every slot before waiting.
pub type WaitHandleArray = Box<[Option<Fence>]>;

/// Per-device pool of wait-handle arrays keyed by length.
pub struct WaitHandlePool {
    arrays: Mutex<Vec<WaitHandleArray>>,
    limit: usize,
}

impl WaitHandlePool {
    /// `limit` caps how many returned arrays are retained.
    pub fn new(limit: usize) -> Self {
        Self {
            arrays: Mutex::new(Vec::new()),
            limit,
        }
    }

    /// Take the most recently returned array of `len` slots, or allocate one.
    pub fn checkout(&self, len: usize) -> WaitHandleArray {
        {
            let mut arrays = self.arrays.lock();
            if let Some(index) = arrays.iter().rposition(|a| a.len() == len) {
                return arrays.remove(index);
            }
        }
        vec![None; len].into_boxed_slice()
    }

    /// Push an array back onto the pool without clearing it.
    pub fn give_back(&self, array: WaitHandleArray) {
        if self.limit == 0 {
            return;
        }
        let mut arrays = self.arrays.lock();
        if arrays.len() >= self.limit {
            arrays.remove(0);
        }
        arrays.push(array);
    }

    /// Number of arrays currently pooled.
    pub fn pooled(&self) -> usize {
        self.arrays.lock().len()
    }
}

impl Default for WaitHandlePool {
    fn default() -> Self {
        Self::new(32)
    }
}
