//! Consistency checks of the scheduler state.
use crate::{
    cfg::{NR_SCHED_QUEUES, NR_TOTAL},
    state::State,
    utils::PrioBitmap,
};

impl State {
    /// Validate the ready queues against the process table. A violation means
    /// the kernel's own bookkeeping is broken, so it's reported by panicking.
    ///
    /// Checked:
    ///
    ///  - Every queue is acyclic and its tail is its last node.
    ///  - Every member is a ready process of the queue's priority.
    ///  - No process appears twice.
    ///  - The occupancy bitmap matches the queues.
    ///  - Every ready process is queued.
    ///  - The process slated to run next is ready.
    pub(crate) fn check_runqueues(&self) {
        let mut queued = [false; NR_TOTAL];

        for q in 0..NR_SCHED_QUEUES {
            let mut last = None;
            let mut len = 0;
            let mut cur = self.rdy.head[q];
            while let Some(slot) = cur {
                len += 1;
                if len > NR_TOTAL {
                    panic!("ready queue {q} is cyclic");
                }
                let p = &self.procs[slot];
                if !p.is_ready() {
                    panic!("slot {slot} is in ready queue {q} but isn't ready: {p:?}");
                }
                if p.priority != q {
                    panic!(
                        "slot {slot} has priority {} but is in ready queue {q}",
                        p.priority
                    );
                }
                if queued[slot] {
                    panic!("slot {slot} is queued twice");
                }
                queued[slot] = true;
                last = Some(slot);
                cur = p.next_ready;
            }

            if self.rdy.tail[q] != last {
                panic!(
                    "ready queue {q} has tail {:?} but ends at {last:?}",
                    self.rdy.tail[q]
                );
            }
            if self.rdy.occupied.get(q) != last.is_some() {
                panic!("occupancy bit of ready queue {q} is wrong");
            }
        }

        for (slot, p) in self.procs.iter().enumerate() {
            if p.is_ready() && !queued[slot] {
                panic!("slot {slot} is ready but not queued: {p:?}");
            }
        }

        if !queued[self.next] {
            panic!("slot {} is slated to run next but isn't ready", self.next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{endpoint::task_slot, proc::IDLE};

    #[test]
    fn boot_state_is_consistent() {
        State::new().check_runqueues();
    }

    #[test]
    #[should_panic(expected = "is ready but not queued")]
    fn missing_ready_process() {
        let mut state = State::new();
        let idle = task_slot(IDLE);
        state.rdy.head[15] = None;
        state.rdy.tail[15] = None;
        state.rdy.occupied.clear(15);
        state.procs[idle].next_ready = None;
        state.check_runqueues();
    }

    #[test]
    #[should_panic(expected = "is queued twice")]
    fn cyclic_queue() {
        let mut state = State::new();
        let idle = task_slot(IDLE);
        state.procs[idle].next_ready = Some(idle);
        state.check_runqueues();
    }
}
