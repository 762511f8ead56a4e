use std::sync::atomic::{AtomicU64, Ordering};

/// Routes each message to the partition with the smallest outstanding byte
/// backlog, i.e. bytes handed to the broker but not yet acknowledged.
#[derive(Debug)]
pub struct LeastBytes {
    backlog: Vec<AtomicU64>,
}

impl LeastBytes {
    pub fn new(partitions: usize) -> Self {
        LeastBytes {
            backlog: (0..partitions).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn partitions(&self) -> usize {
        self.backlog.len()
    }

    /// Pick a partition for `size` bytes and charge them to its backlog.
    /// Ties go to the lowest partition number.
    pub fn pick(&self, size: u64) -> Option<i32> {
        let (partition, load) = self
            .backlog
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| load.load(Ordering::Acquire))?;
        load.fetch_add(size, Ordering::AcqRel);
        i32::try_from(partition).ok()
    }

    /// Settle `size` bytes once the broker has answered for them.
    pub fn release(&self, partition: i32, size: u64) {
        let Some(load) = usize::try_from(partition)
            .ok()
            .and_then(|p| self.backlog.get(p))
        else {
            return;
        };
        // Never wraps below zero
        let _ = load.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_sub(size))
        });
    }

    pub fn backlog(&self, partition: i32) -> Option<u64> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.backlog.get(p))
            .map(|load| load.load(Ordering::Acquire))
    }
}
