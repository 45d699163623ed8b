//! Point-in-time copies of the process table for diagnostics.
use arrayvec::ArrayVec;

use crate::{
    cfg::{NR_NOTIFY_BUFS, NR_SCHED_QUEUES, NR_TOTAL},
    endpoint::proc_nr_of,
    proc::{CallMask, IpcState, ProcKind, RtsFlags, Source},
    state::State,
    Endpoint, ProcNr, VirAddr,
};

/// The IPC state of a process, with endpoints in place of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcStatus {
    Runnable,
    Sending {
        to: Endpoint,
        buf: VirAddr,
    },
    /// `from` is [`Endpoint::ANY`] for a wildcard receive.
    Receiving {
        from: Endpoint,
        buf: VirAddr,
    },
    SendThenReceive {
        to: Endpoint,
        from: Endpoint,
        buf: VirAddr,
    },
}

/// A queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingNotification {
    pub source: Endpoint,
    pub ntf_type: i32,
    pub flags: u32,
    pub arg: i64,
}

/// A copy of one process control block.
#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub endpoint: Endpoint,
    pub proc_nr: ProcNr,
    pub name: &'static str,
    pub kind: ProcKind,
    pub priority: usize,
    pub quantum: u32,
    pub ticks_left: u32,
    pub ipc: IpcStatus,
    pub rts: RtsFlags,
    pub is_ready: bool,
    /// The processes blocked sending to this one, in arrival order.
    pub senders: ArrayVec<Endpoint, NR_TOTAL>,
    /// The pending notifications, in delivery order.
    pub notifications: ArrayVec<PendingNotification, NR_NOTIFY_BUFS>,
    pub call_mask: CallMask,
    pub user_time: u64,
    pub sys_time: u64,
    /// The tick count at which the alarm is due.
    pub alarm: Option<u64>,
}

/// A copy of the process table, taken by [`Kernel::proc_table`].
///
/// [`Kernel::proc_table`]: crate::Kernel::proc_table
#[derive(Debug, Clone)]
pub struct ProcTable {
    /// The live processes, in slot order.
    pub procs: ArrayVec<ProcInfo, NR_TOTAL>,
    /// The members of each ready queue, head first.
    pub ready_queues: [ArrayVec<Endpoint, NR_TOTAL>; NR_SCHED_QUEUES],
    pub running: Endpoint,
    pub next: Endpoint,
    pub bill: Endpoint,
    pub realtime: u64,
    pub free_notify_bufs: usize,
}

impl ProcTable {
    /// Find the process named by `ep`.
    pub fn get(&self, ep: Endpoint) -> Option<&ProcInfo> {
        self.procs.iter().find(|p| p.endpoint == ep)
    }
}

impl State {
    fn source_endpoint(&self, source: Source) -> Endpoint {
        match source {
            Source::Any => Endpoint::ANY,
            Source::Slot(slot) => self.endpoint(slot),
        }
    }

    fn ipc_status(&self, ipc: IpcState) -> IpcStatus {
        match ipc {
            IpcState::Runnable => IpcStatus::Runnable,
            IpcState::Sending { to, buf } => IpcStatus::Sending {
                to: self.endpoint(to),
                buf,
            },
            IpcState::Receiving { from, buf } => IpcStatus::Receiving {
                from: self.source_endpoint(from),
                buf,
            },
            IpcState::SendThenReceive { to, from, buf } => IpcStatus::SendThenReceive {
                to: self.endpoint(to),
                from: self.source_endpoint(from),
                buf,
            },
        }
    }

    pub(crate) fn proc_table(&self) -> ProcTable {
        let procs = self
            .procs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.in_use)
            .map(|(slot, p)| ProcInfo {
                endpoint: self.endpoint(slot),
                proc_nr: proc_nr_of(slot),
                name: p.name,
                kind: p.kind,
                priority: p.priority,
                quantum: p.quantum,
                ticks_left: p.ticks_left,
                ipc: self.ipc_status(p.ipc),
                rts: p.rts,
                is_ready: p.is_ready(),
                senders: self.iter_senders(slot).map(|s| self.endpoint(s)).collect(),
                notifications: self
                    .ntf
                    .iter_queue(p.ntf_q)
                    .map(|i| {
                        let record = self.ntf.get(i);
                        PendingNotification {
                            source: self.endpoint(record.source),
                            ntf_type: record.ntf_type,
                            flags: record.flags,
                            arg: record.arg,
                        }
                    })
                    .collect(),
                call_mask: p.call_mask,
                user_time: p.user_time,
                sys_time: p.sys_time,
                alarm: p.alarm,
            })
            .collect();

        ProcTable {
            procs,
            ready_queues: core::array::from_fn(|q| {
                self.iter_ready_queue(q).map(|s| self.endpoint(s)).collect()
            }),
            running: self.endpoint(self.running),
            next: self.endpoint(self.next),
            bill: self.endpoint(self.bill),
            realtime: self.realtime,
            free_notify_bufs: self.ntf.num_free(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{IDLE, SYSTEM};

    #[test]
    fn boot_snapshot() {
        let table = State::new().proc_table();
        assert_eq!(table.procs.len(), 4);
        assert_eq!(table.running, Endpoint::new(0, IDLE));
        assert_eq!(
            table.ready_queues[15].as_slice(),
            [Endpoint::new(0, IDLE)]
        );
        assert_eq!(table.free_notify_bufs, NR_NOTIFY_BUFS);

        let system = table.get(Endpoint::new(0, SYSTEM)).unwrap();
        assert_eq!(system.name, "system");
        assert_eq!(
            system.ipc,
            IpcStatus::Receiving {
                from: Endpoint::ANY,
                buf: 0
            }
        );
        assert!(!system.is_ready);
    }
}
