//! Bookkeeping for submitted command batches and their fences.

use parking_lot::Mutex;
use tracing::debug;

use crate::fence::Fence;

/// The driver side of completion tracking.
pub trait CompletionSource {
    /// What the registry keeps per in-flight batch.
    type Batch;
    /// Cheap copyable key used to query the driver without holding the batch.
    type Token: Copy;

    fn token(&self, batch: &Self::Batch) -> Self::Token;

    fn is_complete(&self, token: Self::Token) -> bool;

    /// Block until the driver reports the batch complete.
    fn wait_until_complete(&self, token: Self::Token);

    /// Drop the registry's reference to a completed batch.
    fn release(&self, batch: Self::Batch);
}

pub struct SubmittedBatch<B> {
    pub batch: B,
    pub fence: Option<Fence>,
}

/// Tracks in-flight batches, retiring them in submission order.
pub struct FenceSyncRegistry<B> {
    in_flight: Mutex<Vec<SubmittedBatch<B>>>,
    /// Held for a whole retire pass, so a poll that finds nothing left
    /// still waits for a concurrent pass to finish releasing.
    retiring: Mutex<()>,
}

impl<B> FenceSyncRegistry<B> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(Vec::new()),
            retiring: Mutex::new(()),
        }
    }

    /// Record `batch` as in flight, then retire whatever has completed,
    /// so a synchronously executed batch signals its fence before return.
    pub fn submit<S>(&self, source: &S, batch: B, fence: Option<Fence>)
    where
        S: CompletionSource<Batch = B>,
    {
        self.in_flight.lock().push(SubmittedBatch { batch, fence });
        self.poll_completions(source);
    }

    /// Retire every batch the driver reports complete. Returns how many
    /// batches were retired.
    pub fn poll_completions<S>(&self, source: &S) -> usize
    where
        S: CompletionSource<Batch = B>,
    {
        let _retiring = self.retiring.lock();
        let retired = {
            let mut in_flight = self.in_flight.lock();
            let mut retired = Vec::new();
            let mut i = 0;
            while i < in_flight.len() {
                if source.is_complete(source.token(&in_flight[i].batch)) {
                    retired.push(in_flight.remove(i));
                } else {
                    i += 1;
                }
            }
            retired
        };

        let count = retired.len();
        for submitted in retired {
            if let Some(fence) = &submitted.fence {
                fence.set();
            }
            source.release(submitted.batch);
        }
        if count > 0 {
            debug!("retired {} batch(es)", count);
        }
        count
    }

    /// Block until every batch in flight at the time of the call has
    /// completed, then retire them.
    pub fn wait_for_idle<S>(&self, source: &S)
    where
        S: CompletionSource<Batch = B>,
    {
        let tokens: Vec<S::Token> = self
            .in_flight
            .lock()
            .iter()
            .map(|submitted| source.token(&submitted.batch))
            .collect();

        for token in tokens {
            source.wait_until_complete(token);
        }
        self.poll_completions(source);
    }

    /// Number of batches still in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl<B> Default for FenceSyncRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}
