//! The kernel-wide pool of notification records.
//!
//! Records are linked into per-destination queues through their `next`
//! index. The pool never grows; [`NotifyPool::alloc`] fails when every record
//! is in use.
use crate::{
    cfg::NR_NOTIFY_BUFS,
    utils::{bitmap_groups, Init, PrioBitmap, TwoLevelPrioBitmap},
};

/// A pending notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NotifyRecord {
    /// The slot of the notifying process.
    pub(crate) source: usize,
    pub(crate) ntf_type: i32,
    pub(crate) flags: u32,
    pub(crate) arg: i64,
    pub(crate) next: Option<usize>,
}

impl Init for NotifyRecord {
    const INIT: Self = Self {
        source: 0,
        ntf_type: 0,
        flags: 0,
        arg: 0,
        next: None,
    };
}

type FreeSet = TwoLevelPrioBitmap<{ bitmap_groups(NR_NOTIFY_BUFS) }>;

#[derive(Debug)]
pub(crate) struct NotifyPool {
    records: [NotifyRecord; NR_NOTIFY_BUFS],
    /// A set bit means the record is free.
    free: FreeSet,
}

impl NotifyPool {
    pub(crate) fn new() -> Self {
        let mut free = FreeSet::INIT;
        for i in 0..NR_NOTIFY_BUFS {
            free.set(i);
        }
        Self {
            records: [NotifyRecord::INIT; NR_NOTIFY_BUFS],
            free,
        }
    }

    /// Take a free record and fill it with `record`.
    pub(crate) fn alloc(&mut self, record: NotifyRecord) -> Option<usize> {
        let i = self.free.find_set()?;
        self.free.clear(i);
        self.records[i] = record;
        Some(i)
    }

    pub(crate) fn free(&mut self, i: usize) {
        debug_assert!(!self.free.get(i), "double free of notification record {i}");
        self.records[i] = NotifyRecord::INIT;
        self.free.set(i);
    }

    pub(crate) fn num_free(&self) -> usize {
        self.free.count()
    }

    pub(crate) fn get(&self, i: usize) -> &NotifyRecord {
        &self.records[i]
    }

    pub(crate) fn get_mut(&mut self, i: usize) -> &mut NotifyRecord {
        &mut self.records[i]
    }

    /// Iterate over the records of the queue starting at `head`.
    pub(crate) fn iter_queue(&self, head: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(head, move |&i| self.records[i].next)
    }

    /// Append `i` to the queue starting at `*head`.
    pub(crate) fn push_back(&mut self, head: &mut Option<usize>, i: usize) {
        self.records[i].next = None;
        let tail = self.iter_queue(*head).last();
        match tail {
            Some(tail) => self.records[tail].next = Some(i),
            None => *head = Some(i),
        }
    }

    /// Unlink `i`, whose predecessor is `prev`, from the queue starting at
    /// `*head`.
    pub(crate) fn unlink(&mut self, head: &mut Option<usize>, prev: Option<usize>, i: usize) {
        let next = self.records[i].next.take();
        match prev {
            Some(prev) => self.records[prev].next = next,
            None => *head = next,
        }
    }
}
