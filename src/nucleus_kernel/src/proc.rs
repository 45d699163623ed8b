//! Process control blocks and their attributes.
use crate::{
    cfg::{SlotSet, DRIVER_Q, IDLE_Q, NR_TOTAL, PROC_QUANTUM, SERVER_Q, TASK_Q, USER_Q},
    endpoint::{proc_nr_of, Endpoint},
    utils::{Init, PrioBitmap},
    ProcNr, VirAddr,
};

/// The idle process. Runs when nothing else is ready.
pub const IDLE: ProcNr = -4;
/// The clock task. The source of alarm notifications.
pub const CLOCK: ProcNr = -3;
/// The system task. Serves kernel calls from system processes.
pub const SYSTEM: ProcNr = -2;
/// The pseudo-process that interrupt handlers act as.
pub const HARDWARE: ProcNr = -1;

/// The class of a process. Determines its priority band, and whether it's
/// preempted on quantum expiry and billed for system time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcKind {
    /// A kernel task (`CLOCK`, `HARDWARE`).
    Task,
    /// The system task.
    System,
    Driver,
    Server,
    User,
    Idle,
}

impl ProcKind {
    /// Get a flag indicating whether the process is rotated when its quantum
    /// expires.
    pub fn is_preemptible(self) -> bool {
        matches!(self, Self::Driver | Self::Server | Self::User)
    }

    /// Get a flag indicating whether the process is charged for the system
    /// time spent in kernel tasks on its behalf.
    pub fn is_billable(self) -> bool {
        matches!(self, Self::User | Self::Idle)
    }

    /// Get a flag indicating whether the process belongs to the kernel's most
    /// privileged class, which may not block without replying.
    pub fn is_task(self) -> bool {
        matches!(self, Self::Task | Self::System)
    }

    /// Get the default priority of the kind.
    pub fn default_priority(self) -> usize {
        match self {
            Self::Task | Self::System => TASK_Q,
            Self::Driver => DRIVER_Q,
            Self::Server => SERVER_Q,
            Self::User => USER_Q,
            Self::Idle => IDLE_Q,
        }
    }

    /// Get a flag indicating whether `priority` is allowed for the kind.
    pub fn accepts_priority(self, priority: usize) -> bool {
        match self {
            Self::Driver | Self::Server => (TASK_Q + 1..USER_Q).contains(&priority),
            _ => priority == self.default_priority(),
        }
    }
}

/// The desired source of a receive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Any,
    Slot(usize),
}

impl Source {
    pub(crate) fn accepts(self, slot: usize) -> bool {
        match self {
            Self::Any => true,
            Self::Slot(s) => s == slot,
        }
    }
}

/// The IPC state of a process. Slots are process table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IpcState {
    /// Not blocked on IPC.
    Runnable,
    /// Blocked until `to` receives the message at `buf`.
    Sending { to: usize, buf: VirAddr },
    /// Blocked until a message from `from` is written to `buf`.
    Receiving { from: Source, buf: VirAddr },
    /// Inside `SENDREC`: the send is still pending, and the reply will be
    /// written to the same buffer.
    SendThenReceive {
        to: usize,
        from: Source,
        buf: VirAddr,
    },
}

impl IpcState {
    /// Get the destination if the process is blocked sending.
    pub(crate) fn send_target(self) -> Option<usize> {
        match self {
            Self::Sending { to, .. } | Self::SendThenReceive { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Get the message buffer of a blocked process.
    pub(crate) fn buf(self) -> Option<VirAddr> {
        match self {
            Self::Runnable => None,
            Self::Sending { buf, .. }
            | Self::Receiving { buf, .. }
            | Self::SendThenReceive { buf, .. } => Some(buf),
        }
    }

    /// Get the state after the pending send has been consumed.
    pub(crate) fn send_completed(self) -> Self {
        match self {
            Self::SendThenReceive { from, buf, .. } => Self::Receiving { from, buf },
            _ => Self::Runnable,
        }
    }
}

bitflags::bitflags! {
    /// Scheduling blockers other than IPC.
    pub struct RtsFlags: u32 {
        /// The process is not yet (or no longer) mapped into memory.
        const NO_MAP = 1 << 0;
        /// The process is stopped by a tracer.
        const P_STOP = 1 << 1;
    }
}

bitflags::bitflags! {
    /// The IPC functions a process may trap with.
    pub struct CallMask: u32 {
        const SEND = 1 << 1;
        const RECEIVE = 1 << 2;
        const SENDREC = 1 << 3;
        const NOTIFY = 1 << 4;
        const ECHO = 1 << 8;
    }
}

/// The set of processes a process may send to or notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendMask(SlotSet);

impl SendMask {
    /// Allow nothing.
    pub fn empty() -> Self {
        Self(Init::INIT)
    }

    /// Allow every process.
    pub fn all() -> Self {
        let mut set = SlotSet::INIT;
        for slot in 0..NR_TOTAL {
            set.set(slot);
        }
        Self(set)
    }

    /// Additionally allow `proc_nr`. Out-of-range numbers are ignored.
    pub fn with(mut self, proc_nr: ProcNr) -> Self {
        if let Some(slot) = crate::endpoint::slot_of(proc_nr) {
            self.0.set(slot);
        }
        self
    }

    /// Get a flag indicating whether `proc_nr` is allowed.
    pub fn allows(&self, proc_nr: ProcNr) -> bool {
        crate::endpoint::slot_of(proc_nr).map_or(false, |slot| self.0.get(slot))
    }

    pub(crate) fn allows_slot(&self, slot: usize) -> bool {
        self.0.get(slot)
    }
}

/// A contiguous region of a process's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub base: VirAddr,
    pub len: usize,
}

impl Segment {
    fn end(&self) -> Option<VirAddr> {
        self.base.checked_add(self.len)
    }

    fn contains_range(&self, start: VirAddr, len: usize) -> bool {
        match (start.checked_add(len), self.end()) {
            (Some(end), Some(seg_end)) => start >= self.base && end <= seg_end,
            _ => false,
        }
    }
}

/// The mapped memory of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemMap {
    pub data: Segment,
    pub stack: Segment,
}

impl MemMap {
    /// Get a flag indicating whether a message buffer at `addr` lies entirely
    /// within the mapped memory.
    ///
    /// With the `strict_msg_check` feature the buffer must be inside the data
    /// segment or inside the stack segment. Otherwise anything between the
    /// start of data and the end of stack is accepted, gap included.
    pub fn contains_message(&self, addr: VirAddr) -> bool {
        let len = crate::message::MESSAGE_SIZE;
        if cfg!(feature = "strict_msg_check") {
            self.data.contains_range(addr, len) || self.stack.contains_range(addr, len)
        } else {
            match self.stack.end() {
                Some(end) if end > self.data.base => Segment {
                    base: self.data.base,
                    len: end - self.data.base,
                }
                .contains_range(addr, len),
                _ => false,
            }
        }
    }
}

/// The parameters of a process created by [`Kernel::spawn`].
///
/// [`Kernel::spawn`]: crate::Kernel::spawn
#[derive(Debug, Clone, Copy)]
pub struct ProcAttr {
    pub name: &'static str,
    pub kind: ProcKind,
    pub priority: usize,
    pub quantum: u32,
    pub call_mask: CallMask,
    pub send_mask: SendMask,
    pub memmap: MemMap,
}

impl ProcAttr {
    /// Construct attributes with the defaults of `kind`: its default
    /// priority, every trap function allowed, and no send targets.
    pub fn new(name: &'static str, kind: ProcKind) -> Self {
        Self {
            name,
            kind,
            priority: kind.default_priority(),
            quantum: PROC_QUANTUM,
            call_mask: CallMask::all(),
            send_mask: SendMask::empty(),
            memmap: MemMap::default(),
        }
    }

    pub fn with_priority(self, priority: usize) -> Self {
        Self { priority, ..self }
    }

    pub fn with_quantum(self, quantum: u32) -> Self {
        Self { quantum, ..self }
    }

    pub fn with_call_mask(self, call_mask: CallMask) -> Self {
        Self { call_mask, ..self }
    }

    pub fn with_send_mask(self, send_mask: SendMask) -> Self {
        Self { send_mask, ..self }
    }

    pub fn with_memmap(self, memmap: MemMap) -> Self {
        Self { memmap, ..self }
    }
}

/// Process control block.
#[derive(Debug, Clone)]
pub(crate) struct ProcCb {
    pub(crate) in_use: bool,
    pub(crate) generation: i32,
    pub(crate) kind: ProcKind,
    pub(crate) name: &'static str,

    pub(crate) priority: usize,
    pub(crate) quantum: u32,
    pub(crate) ticks_left: u32,

    pub(crate) ipc: IpcState,
    pub(crate) rts: RtsFlags,

    /// The next process in the same ready queue.
    pub(crate) next_ready: Option<usize>,
    /// The head of the list of processes blocked sending to this one.
    pub(crate) caller_q: Option<usize>,
    /// The next process in the `caller_q` this process is linked into.
    pub(crate) q_link: Option<usize>,
    /// The head of the queue of pending notification records.
    pub(crate) ntf_q: Option<usize>,
    /// The slots that have at least one record in `ntf_q`.
    pub(crate) ntf_pending: SlotSet,

    pub(crate) call_mask: CallMask,
    pub(crate) send_mask: SendMask,
    pub(crate) memmap: MemMap,

    pub(crate) user_time: u64,
    pub(crate) sys_time: u64,
    /// The absolute tick count at which `SYN_ALARM` is due.
    pub(crate) alarm: Option<u64>,
}

impl Init for ProcCb {
    const INIT: Self = Self {
        in_use: false,
        generation: 0,
        kind: ProcKind::User,
        name: "",
        priority: USER_Q,
        quantum: 0,
        ticks_left: 0,
        ipc: IpcState::Runnable,
        rts: RtsFlags::empty(),
        next_ready: None,
        caller_q: None,
        q_link: None,
        ntf_q: None,
        ntf_pending: Init::INIT,
        call_mask: CallMask::empty(),
        send_mask: SendMask(Init::INIT),
        memmap: MemMap {
            data: Segment { base: 0, len: 0 },
            stack: Segment { base: 0, len: 0 },
        },
        user_time: 0,
        sys_time: 0,
        alarm: None,
    };
}

impl ProcCb {
    /// Get a flag indicating whether the process belongs in a ready queue.
    pub(crate) fn is_ready(&self) -> bool {
        self.in_use && self.ipc == IpcState::Runnable && self.rts.is_empty()
    }

    pub(crate) fn endpoint(&self, slot: usize) -> Endpoint {
        Endpoint::new(self.generation, proc_nr_of(slot))
    }

    /// Reset everything but the generation.
    pub(crate) fn release(&mut self) {
        *self = Self {
            generation: self.generation,
            ..Self::INIT
        };
    }
}
