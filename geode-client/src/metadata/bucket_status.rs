//! Buckets whose primary recently timed out.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Timeout marks of the buckets of one region.
///
/// While a bucket is marked, requests that need its primary are sent to a
/// secondary instead. A mark expires after the pool's bucket wait timeout.
#[derive(Debug)]
pub struct PrBucketStatus {
    marks: Vec<Mutex<Option<Instant>>>,
}

impl PrBucketStatus {
    /// Creates unmarked status for `total_buckets` buckets.
    pub fn new(total_buckets: i32) -> Self {
        let mut marks = Vec::with_capacity(total_buckets.max(0) as usize);
        marks.resize_with(total_buckets.max(0) as usize, || Mutex::new(None));
        Self { marks }
    }

    fn mark(&self, bucket_id: i32) -> Option<&Mutex<Option<Instant>>> {
        usize::try_from(bucket_id).ok().and_then(|i| self.marks.get(i))
    }

    /// Marks `bucket_id` as timed out now. An existing mark is kept.
    pub fn set_timeout(&self, bucket_id: i32) {
        if let Some(mark) = self.mark(bucket_id) {
            let mut mark = mark.lock().unwrap_or_else(PoisonError::into_inner);
            if mark.is_none() {
                *mark = Some(Instant::now());
            }
        }
    }

    /// Returns true if `bucket_id` was marked less than `window` ago.
    ///
    /// An expired mark is cleared.
    pub fn is_timed_out(&self, bucket_id: i32, window: Duration) -> bool {
        let Some(mark) = self.mark(bucket_id) else {
            return false;
        };
        let mut mark = mark.lock().unwrap_or_else(PoisonError::into_inner);
        match *mark {
            None => false,
            Some(at) if at.elapsed() < window => true,
            Some(_) => {
                *mark = None;
                false
            }
        }
    }

    /// Returns the number of buckets tracked.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Returns true if no buckets are tracked.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
