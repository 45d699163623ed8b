//! The ready queues: one singly-linked FIFO per priority level, threaded
//! through [`ProcCb::next_ready`], plus an occupancy bitmap for finding the
//! most urgent non-empty level in constant time.
//!
//! [`ProcCb::next_ready`]: crate::proc::ProcCb
use crate::{
    cfg::NR_SCHED_QUEUES,
    proc::ProcKind,
    state::State,
    utils::{Init, OneLevelPrioBitmap, PrioBitmap},
};

#[derive(Debug)]
pub(crate) struct ReadyQueues {
    pub(crate) head: [Option<usize>; NR_SCHED_QUEUES],
    pub(crate) tail: [Option<usize>; NR_SCHED_QUEUES],
    /// A set bit means the corresponding queue is non-empty.
    pub(crate) occupied: OneLevelPrioBitmap<NR_SCHED_QUEUES>,
}

impl Init for ReadyQueues {
    const INIT: Self = Self {
        head: [None; NR_SCHED_QUEUES],
        tail: [None; NR_SCHED_QUEUES],
        occupied: Init::INIT,
    };
}

impl State {
    /// Insert `slot` into the queue of its priority.
    ///
    /// User processes go to the head, everything else to the tail. If `slot`
    /// is more urgent than the process slated to run next, it replaces it.
    pub(crate) fn ready(&mut self, slot: usize) {
        debug_assert!(self.procs[slot].is_ready());
        let q = self.procs[slot].priority;

        if self.procs[slot].kind == ProcKind::User {
            self.procs[slot].next_ready = self.rdy.head[q];
            if self.rdy.head[q].is_none() {
                self.rdy.tail[q] = Some(slot);
            }
            self.rdy.head[q] = Some(slot);
        } else {
            self.procs[slot].next_ready = None;
            match self.rdy.tail[q] {
                Some(tail) => self.procs[tail].next_ready = Some(slot),
                None => self.rdy.head[q] = Some(slot),
            }
            self.rdy.tail[q] = Some(slot);
        }
        self.rdy.occupied.set(q);

        if q < self.procs[self.next].priority {
            log::trace!(
                "{:?} preempts {:?}",
                self.endpoint(slot),
                self.endpoint(self.next)
            );
            self.set_next(slot);
        }
    }

    /// Remove `slot` from its ready queue. `slot` must be queued.
    ///
    /// If `slot` is running or slated to run next, a replacement is picked.
    pub(crate) fn unready(&mut self, slot: usize) {
        self.unlink(slot);
        if slot == self.running || slot == self.next {
            self.pick_proc();
        }
    }

    /// Move `slot` to the tail of its queue regardless of its kind, then pick
    /// the next process to run. `slot` must be queued.
    pub(crate) fn requeue_at_tail(&mut self, slot: usize) {
        let q = self.procs[slot].priority;
        self.unlink(slot);
        match self.rdy.tail[q] {
            Some(tail) => self.procs[tail].next_ready = Some(slot),
            None => self.rdy.head[q] = Some(slot),
        }
        self.rdy.tail[q] = Some(slot);
        self.rdy.occupied.set(q);
        self.pick_proc();
    }

    fn unlink(&mut self, slot: usize) {
        let q = self.procs[slot].priority;

        let mut prev = None;
        let mut cur = self.rdy.head[q];
        while let Some(c) = cur {
            if c == slot {
                break;
            }
            prev = cur;
            cur = self.procs[c].next_ready;
        }
        if cur.is_none() {
            panic!("slot {slot} is not in ready queue {q}");
        }

        let next = self.procs[slot].next_ready.take();
        match prev {
            Some(prev) => self.procs[prev].next_ready = next,
            None => self.rdy.head[q] = next,
        }
        if self.rdy.tail[q] == Some(slot) {
            self.rdy.tail[q] = prev;
        }
        if self.rdy.head[q].is_none() {
            self.rdy.occupied.clear(q);
        }
    }

    /// Choose the head of the most urgent non-empty queue as the next process
    /// to run.
    pub(crate) fn pick_proc(&mut self) {
        let q = match self.rdy.occupied.find_set() {
            Some(q) => q,
            None => panic!("no ready process, not even idle"),
        };
        match self.rdy.head[q] {
            Some(head) => self.set_next(head),
            None => panic!("ready queue {q} is marked occupied but empty"),
        }
    }

    /// Rotate queue `q` (its head moves to the tail) and pick the next
    /// process to run.
    pub(crate) fn sched(&mut self, q: usize) {
        if let (Some(head), Some(tail)) = (self.rdy.head[q], self.rdy.tail[q]) {
            if head != tail {
                self.rdy.head[q] = self.procs[head].next_ready.take();
                self.procs[tail].next_ready = Some(head);
                self.rdy.tail[q] = Some(head);
            }
        }
        self.pick_proc();
    }

    /// Make `slot` the next process to run. Billable processes also become the
    /// target of system-time accounting.
    fn set_next(&mut self, slot: usize) {
        self.next = slot;
        if self.procs[slot].kind.is_billable() {
            self.bill = slot;
        }
    }

    /// Iterate over the members of queue `q`, head first.
    pub(crate) fn iter_ready_queue(&self, q: usize) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(self.rdy.head[q], move |&s| self.procs[s].next_ready)
    }
}
