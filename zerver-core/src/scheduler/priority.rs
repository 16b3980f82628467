//! Priority bands and the fairness/aging policy the scheduler applies
//! when picking the next job to run, per `spec.md` §4.6.

use std::collections::VecDeque;

/// The three priority bands a job can be submitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Batch = 0,
    Default = 1,
    Interactive = 2,
}

/// After a job has been passed over this many times in favor of a
/// higher band, it is promoted one band up, per `spec.md` §4.6's aging
/// rule — this bounds how long a `Batch` job can starve behind a steady
/// stream of `Interactive` work.
pub const AGING_REQUEUE_THRESHOLD: u32 = 16;

/// The scheduler serves up to this many jobs from a band before giving
/// the next-lower band a turn, per `spec.md` §4.6's `K=8` fairness
/// constant — prevents a band from being served only when strictly
/// empty above it (strict priority), while still favoring higher bands.
pub const FAIRNESS_K: u32 = 8;

struct Bucket<T> {
    queue: VecDeque<(T, u32)>,
}

impl<T> Bucket<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

/// A three-band FIFO with `K`-fair dequeue order and requeue-count aging.
/// Not thread-safe by itself; the scheduler wraps one behind a
/// `parking_lot::Mutex` per pool.
pub struct PriorityQueue<T> {
    interactive: Bucket<T>,
    default: Bucket<T>,
    batch: Bucket<T>,
    /// How many consecutive jobs have been served from the currently
    /// favored band since last yielding to the band below it.
    served_in_band: u32,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            interactive: Bucket::new(),
            default: Bucket::new(),
            batch: Bucket::new(),
            served_in_band: 0,
        }
    }

    pub fn push(&mut self, priority: Priority, item: T) {
        self.bucket_mut(priority).queue.push_back((item, 0));
    }

    fn bucket_mut(&mut self, priority: Priority) -> &mut Bucket<T> {
        match priority {
            Priority::Interactive => &mut self.interactive,
            Priority::Default => &mut self.default,
            Priority::Batch => &mut self.batch,
        }
    }

    pub fn len(&self) -> usize {
        self.interactive.queue.len() + self.default.queue.len() + self.batch.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops the next job to run, applying `K`-fairness across bands and
    /// aging jobs that have been requeued past the threshold.
    pub fn pop(&mut self) -> Option<(T, Priority)> {
        self.age();

        let order = if self.served_in_band < FAIRNESS_K {
            [Priority::Interactive, Priority::Default, Priority::Batch]
        } else {
            self.served_in_band = 0;
            [Priority::Default, Priority::Batch, Priority::Interactive]
        };

        for priority in order {
            if let Some((item, _)) = self.bucket_mut(priority).queue.pop_front() {
                if priority == Priority::Interactive {
                    self.served_in_band += 1;
                } else {
                    self.served_in_band = 0;
                }
                return Some((item, priority));
            }
        }
        None
    }

    /// Increments every still-queued job's requeue count and promotes any
    /// that crossed [`AGING_REQUEUE_THRESHOLD`] to the next band up.
    fn age(&mut self) {
        if let Some(promoted) = age_bucket(&mut self.batch) {
            for (item, count) in promoted {
                self.default.queue.push_back((item, count));
            }
        }
        if let Some(promoted) = age_bucket(&mut self.default) {
            for (item, count) in promoted {
                self.interactive.queue.push_back((item, count));
            }
        }
        for (_, count) in self.interactive.queue.iter_mut() {
            *count += 1;
        }
    }
}

fn age_bucket<T>(bucket: &mut Bucket<T>) -> Option<Vec<(T, u32)>> {
    let mut promote = Vec::new();
    let mut keep = VecDeque::with_capacity(bucket.queue.len());
    while let Some((item, count)) = bucket.queue.pop_front() {
        let count = count + 1;
        if count >= AGING_REQUEUE_THRESHOLD {
            promote.push((item, 0));
        } else {
            keep.push_back((item, count));
        }
    }
    bucket.queue = keep;
    if promote.is_empty() {
        None
    } else {
        Some(promote)
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_is_favored_up_to_fairness_k() {
        let mut q = PriorityQueue::new();
        for i in 0..(FAIRNESS_K + 2) {
            q.push(Priority::Interactive, i);
        }
        q.push(Priority::Default, 100);

        for _ in 0..FAIRNESS_K {
            let (_, p) = q.pop().unwrap();
            assert_eq!(p, Priority::Interactive);
        }
        let (item, p) = q.pop().unwrap();
        assert_eq!(p, Priority::Default);
        assert_eq!(item, 100);
    }

    #[test]
    fn batch_jobs_age_into_higher_bands() {
        let mut q = PriorityQueue::new();
        q.push(Priority::Batch, "job");
        for _ in 0..AGING_REQUEUE_THRESHOLD {
            q.age();
        }
        assert_eq!(q.default.queue.len(), 1);
    }
}
