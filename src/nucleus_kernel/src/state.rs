//! The kernel state: the process table and everything hanging off it.
use crate::{
    cfg::{NR_TOTAL, TASK_QUANTUM},
    endpoint::{next_generation, proc_nr_of, slot_of, task_slot, Endpoint},
    error::{EndpointError, SpawnError},
    notify::NotifyPool,
    proc::{
        CallMask, IpcState, ProcAttr, ProcCb, ProcKind, RtsFlags, SendMask, Source, CLOCK,
        HARDWARE, IDLE, SYSTEM,
    },
    readyqueue::ReadyQueues,
    utils::{Init, PrioBitmap},
    Port, ProcNr, ResultCode,
};

/// The kernel tasks, in slot order.
const TASK_TABLE: [(ProcNr, &str, ProcKind); 4] = [
    (IDLE, "idle", ProcKind::Idle),
    (CLOCK, "clock", ProcKind::Task),
    (SYSTEM, "system", ProcKind::System),
    (HARDWARE, "kernel", ProcKind::Task),
];

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) procs: [ProcCb; NR_TOTAL],
    pub(crate) rdy: ReadyQueues,
    pub(crate) ntf: NotifyPool,
    /// The process whose context is loaded on the processor.
    pub(crate) running: usize,
    /// The process to switch to on the next dispatch.
    pub(crate) next: usize,
    /// The process charged for system time.
    pub(crate) bill: usize,
    /// The number of clock ticks since boot.
    pub(crate) realtime: u64,
}

impl State {
    /// Construct the boot state: the kernel tasks installed, `IDLE` ready and
    /// dispatched, and every ordinary slot empty.
    pub(crate) fn new() -> Self {
        let idle = task_slot(IDLE);
        let mut this = Self {
            procs: [ProcCb::INIT; NR_TOTAL],
            rdy: Init::INIT,
            ntf: NotifyPool::new(),
            running: idle,
            next: idle,
            bill: idle,
            realtime: 0,
        };

        for (nr, name, kind) in TASK_TABLE {
            this.install_task(nr, name, kind);
        }

        this.pick_proc();
        this.running = this.next;
        this
    }

    fn install_task(&mut self, nr: ProcNr, name: &'static str, kind: ProcKind) {
        let slot = task_slot(nr);
        let send_mask = if kind == ProcKind::Idle {
            SendMask::empty()
        } else {
            SendMask::all()
        };
        let ipc = match nr {
            // Parked at the top of their request loops
            CLOCK | SYSTEM => IpcState::Receiving {
                from: Source::Any,
                buf: 0,
            },
            _ => IpcState::Runnable,
        };
        let rts = if nr == HARDWARE {
            RtsFlags::NO_MAP
        } else {
            RtsFlags::empty()
        };

        self.procs[slot] = ProcCb {
            in_use: true,
            kind,
            name,
            priority: kind.default_priority(),
            quantum: TASK_QUANTUM,
            ticks_left: TASK_QUANTUM,
            ipc,
            rts,
            call_mask: CallMask::all(),
            send_mask,
            ..ProcCb::INIT
        };

        if self.procs[slot].is_ready() {
            self.ready(slot);
        }
    }

    /// Map an endpoint to the slot of the live process it names.
    pub(crate) fn resolve(&self, ep: Endpoint) -> Result<usize, EndpointError> {
        if ep.is_magic() {
            return Err(EndpointError::BadSrcDst);
        }
        let slot = slot_of(ep.proc_nr()).ok_or(EndpointError::BadSrcDst)?;
        let p = &self.procs[slot];
        if p.in_use && p.generation == ep.generation() {
            Ok(slot)
        } else {
            Err(EndpointError::DeadSrcDst)
        }
    }

    pub(crate) fn endpoint(&self, slot: usize) -> Endpoint {
        self.procs[slot].endpoint(slot)
    }

    /// Enter or leave the ready queue if the readiness of `slot` changed.
    fn sync_readiness(&mut self, slot: usize, was_ready: bool) {
        match (was_ready, self.procs[slot].is_ready()) {
            (false, true) => self.ready(slot),
            (true, false) => self.unready(slot),
            _ => {}
        }
    }

    /// Replace the IPC state of `slot`, updating the ready queues.
    pub(crate) fn set_ipc(&mut self, slot: usize, ipc: IpcState) {
        let was_ready = self.procs[slot].is_ready();
        self.procs[slot].ipc = ipc;
        self.sync_readiness(slot, was_ready);
    }

    /// Add scheduling blockers to `slot`, updating the ready queues.
    pub(crate) fn set_rts(&mut self, slot: usize, flags: RtsFlags) {
        let was_ready = self.procs[slot].is_ready();
        self.procs[slot].rts.insert(flags);
        self.sync_readiness(slot, was_ready);
    }

    /// Remove scheduling blockers from `slot`, updating the ready queues.
    pub(crate) fn clear_rts(&mut self, slot: usize, flags: RtsFlags) {
        let was_ready = self.procs[slot].is_ready();
        self.procs[slot].rts.remove(flags);
        self.sync_readiness(slot, was_ready);
    }

    /// Append `sender` to the list of processes blocked sending to `dst`.
    pub(crate) fn push_sender(&mut self, dst: usize, sender: usize) {
        self.procs[sender].q_link = None;
        let tail = self.iter_senders(dst).last();
        match tail {
            Some(tail) => self.procs[tail].q_link = Some(sender),
            None => self.procs[dst].caller_q = Some(sender),
        }
    }

    /// Remove `sender` from the list of processes blocked sending to `dst`.
    /// Does nothing if it's not there.
    pub(crate) fn unlink_sender(&mut self, dst: usize, sender: usize) {
        let mut prev = None;
        let mut found = false;
        for s in self.iter_senders(dst) {
            if s == sender {
                found = true;
                break;
            }
            prev = Some(s);
        }
        if !found {
            return;
        }

        let next = self.procs[sender].q_link.take();
        match prev {
            Some(prev) => self.procs[prev].q_link = next,
            None => self.procs[dst].caller_q = next,
        }
    }

    /// Iterate over the processes blocked sending to `dst`, in arrival order.
    pub(crate) fn iter_senders(&self, dst: usize) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(self.procs[dst].caller_q, move |&s| self.procs[s].q_link)
    }

    /// Claim an ordinary slot. The new process starts with `NO_MAP` set.
    pub(crate) fn claim(&mut self, proc_nr: ProcNr, attr: &ProcAttr) -> Result<Endpoint, SpawnError> {
        let slot = match slot_of(proc_nr) {
            Some(slot) if proc_nr >= 0 => slot,
            _ => return Err(SpawnError::BadParam),
        };
        if !matches!(
            attr.kind,
            ProcKind::Driver | ProcKind::Server | ProcKind::User
        ) || !attr.kind.accepts_priority(attr.priority)
            || attr.quantum == 0
        {
            return Err(SpawnError::BadParam);
        }
        if self.procs[slot].in_use {
            return Err(SpawnError::Busy);
        }

        let generation = next_generation(self.procs[slot].generation);
        self.procs[slot] = ProcCb {
            in_use: true,
            generation,
            kind: attr.kind,
            name: attr.name,
            priority: attr.priority,
            quantum: attr.quantum,
            ticks_left: attr.quantum,
            rts: RtsFlags::NO_MAP,
            call_mask: attr.call_mask,
            send_mask: attr.send_mask,
            memmap: attr.memmap,
            ..ProcCb::INIT
        };

        let ep = self.endpoint(slot);
        log::debug!("claimed slot {slot} for {:?} ({ep:?})", attr.name);
        Ok(ep)
    }

    /// Tear down the process in `slot` and release the slot.
    ///
    /// Every reference to the process held by other processes is dropped:
    /// processes blocked sending to it or receiving specifically from it are
    /// woken with `DeadSrcDst`, and its notifications are purged everywhere.
    pub(crate) fn release(&mut self, port: &impl Port, slot: usize) {
        let ep = self.endpoint(slot);
        log::debug!("releasing slot {slot} ({ep:?})");

        if self.procs[slot].is_ready() {
            self.unready(slot);
        }
        if let Some(to) = self.procs[slot].ipc.send_target() {
            self.unlink_sender(to, slot);
        }
        self.procs[slot].ipc = IpcState::Runnable;
        self.procs[slot].in_use = false;

        // Drop its own pending notifications
        while let Some(i) = self.procs[slot].ntf_q {
            self.ntf.unlink(&mut self.procs[slot].ntf_q, None, i);
            self.ntf.free(i);
        }
        self.procs[slot].ntf_pending = Init::INIT;

        // Drop notifications it sent
        for other in 0..NR_TOTAL {
            if self.procs[other].ntf_pending.get(slot) {
                self.purge_notifications(other, slot);
            }
        }

        // Fail the senders blocked on it
        while let Some(sender) = self.procs[slot].caller_q {
            self.procs[slot].caller_q = self.procs[sender].q_link.take();
            let ipc = match self.procs[sender].ipc.send_completed() {
                IpcState::Receiving {
                    from: Source::Slot(from),
                    ..
                } if from == slot => IpcState::Runnable,
                ipc => ipc,
            };
            log::trace!("waking {:?}: destination died", self.endpoint(sender));
            port.set_result(proc_nr_of(sender), ResultCode::DeadSrcDst);
            self.set_ipc(sender, ipc);
        }

        // Fail the receivers waiting for it
        for other in 0..NR_TOTAL {
            let ipc = match self.procs[other].ipc {
                IpcState::Receiving {
                    from: Source::Slot(from),
                    ..
                } if from == slot => IpcState::Runnable,
                IpcState::SendThenReceive {
                    to,
                    from: Source::Slot(from),
                    buf,
                } if from == slot => IpcState::Sending { to, buf },
                _ => continue,
            };
            log::trace!("waking {:?}: source died", self.endpoint(other));
            port.set_result(proc_nr_of(other), ResultCode::DeadSrcDst);
            self.set_ipc(other, ipc);
        }

        self.procs[slot].release();

        if self.bill == slot {
            self.bill = task_slot(IDLE);
        }
        if self.running == slot {
            self.running = self.next;
        }
    }

    /// Remove every notification from `source` queued at `dst`.
    fn purge_notifications(&mut self, dst: usize, source: usize) {
        let mut prev = None;
        let mut cur = self.procs[dst].ntf_q;
        while let Some(i) = cur {
            cur = self.ntf.get(i).next;
            if self.ntf.get(i).source == source {
                self.ntf.unlink(&mut self.procs[dst].ntf_q, prev, i);
                self.ntf.free(i);
            } else {
                prev = Some(i);
            }
        }
        self.procs[dst].ntf_pending.clear(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{NR_TASKS, USER_Q};

    #[test]
    fn boot_state() {
        let state = State::new();
        assert_eq!(state.running, task_slot(IDLE));
        assert_eq!(state.next, task_slot(IDLE));
        assert!(state.procs[task_slot(IDLE)].is_ready());
        assert!(!state.procs[task_slot(CLOCK)].is_ready());
        assert!(!state.procs[task_slot(SYSTEM)].is_ready());
        assert!(!state.procs[task_slot(HARDWARE)].is_ready());
        assert!(state.procs[NR_TASKS..].iter().all(|p| !p.in_use));
        state.check_runqueues();
    }

    #[test]
    fn resolve_endpoints() {
        let mut state = State::new();
        assert_eq!(state.resolve(Endpoint::new(0, SYSTEM)), Ok(task_slot(SYSTEM)));
        assert_eq!(state.resolve(Endpoint::ANY), Err(EndpointError::BadSrcDst));
        assert_eq!(
            state.resolve(Endpoint::new(1, 3)),
            Err(EndpointError::DeadSrcDst)
        );

        let ep = state
            .claim(3, &ProcAttr::new("user", ProcKind::User))
            .unwrap();
        assert_eq!(ep, Endpoint::new(1, 3));
        assert_eq!(state.resolve(ep), Ok(NR_TASKS + 3));
        assert_eq!(state.procs[NR_TASKS + 3].priority, USER_Q);
        assert_eq!(state.procs[NR_TASKS + 3].rts, RtsFlags::NO_MAP);
    }

    #[test]
    fn claim_validation() {
        let mut state = State::new();
        let user = ProcAttr::new("user", ProcKind::User);
        assert_eq!(state.claim(-1, &user), Err(SpawnError::BadParam));
        assert_eq!(state.claim(1000, &user), Err(SpawnError::BadParam));
        assert_eq!(
            state.claim(0, &ProcAttr::new("task", ProcKind::Task)),
            Err(SpawnError::BadParam)
        );
        assert_eq!(
            state.claim(0, &ProcAttr::new("srv", ProcKind::Server).with_priority(0)),
            Err(SpawnError::BadParam)
        );
        assert_eq!(
            state.claim(0, &user.with_quantum(0)),
            Err(SpawnError::BadParam)
        );
        assert!(state.claim(0, &user).is_ok());
        assert_eq!(state.claim(0, &user), Err(SpawnError::Busy));
    }

    #[test]
    fn generation_bumps_on_reclaim() {
        let port = crate::tests::TestPort::default();
        let mut state = State::new();
        let user = ProcAttr::new("user", ProcKind::User);
        let old = state.claim(2, &user).unwrap();
        state.release(&port, NR_TASKS + 2);
        assert_eq!(state.resolve(old), Err(EndpointError::DeadSrcDst));

        let new = state.claim(2, &user).unwrap();
        assert_eq!(new.proc_nr(), old.proc_nr());
        assert_eq!(new.generation(), old.generation() + 1);
        assert_eq!(state.resolve(old), Err(EndpointError::DeadSrcDst));
    }

    #[test]
    fn sender_list() {
        let mut state = State::new();
        let dst = task_slot(SYSTEM);
        for s in [5, 6, 7] {
            state.push_sender(dst, s);
        }
        assert_eq!(state.iter_senders(dst).collect::<Vec<_>>(), [5, 6, 7]);
        state.unlink_sender(dst, 6);
        assert_eq!(state.iter_senders(dst).collect::<Vec<_>>(), [5, 7]);
        state.unlink_sender(dst, 9);
        assert_eq!(state.iter_senders(dst).collect::<Vec<_>>(), [5, 7]);
        state.unlink_sender(dst, 5);
        state.unlink_sender(dst, 7);
        assert_eq!(state.procs[dst].caller_q, None);
    }
}
