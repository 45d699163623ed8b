//! The kernel object and its locked entry points.
use crate::{
    cfg::NR_SCHED_QUEUES,
    clock::TickReport,
    endpoint::{is_kernel_task, task_slot, Endpoint},
    error::{
        BadContextError, ExitError, NotifyError, ReadyError, ReceiveError, ResultCode,
        SchedError, SendError, SetAlarmError, SpawnError,
    },
    klock::{lock_cpu, CpuLockCell, CpuLockGuard},
    message::Message,
    proc::{ProcAttr, ProcKind, RtsFlags, Source, HARDWARE},
    state::State,
    syscall::IpcFlags,
    sysinfo::ProcTable,
    Port, ProcNr, VirAddr,
};

/// The context a locked entry point is called from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    /// On behalf of the running process (a kernel task or a process that
    /// trapped).
    Process,
    /// From an interrupt handler, `depth` levels deep. Interrupt handlers act
    /// as `HARDWARE` and can't block at any depth; `depth` only shows up in
    /// the trace log.
    Interrupt { depth: u32 },
}

impl ExecContext {
    fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt { .. })
    }
}

/// The IPC and scheduling core.
///
/// Every method acquires CPU Lock for its whole duration and fails with
/// `BadContext` if the calling context already holds it.
pub struct Kernel<P: Port> {
    port: P,
    state: CpuLockCell<State>,
}

impl<P: Port> core::fmt::Debug for Kernel<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<P: Port> Kernel<P> {
    /// Boot the kernel: install the kernel tasks and dispatch `IDLE`.
    pub fn new(port: P) -> Self {
        let state = State::new();
        log::debug!("booted; {:?} is running", state.endpoint(state.running));
        Self {
            port,
            state: CpuLockCell::new(state),
        }
    }

    /// Get the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    fn lock(&self) -> Result<CpuLockGuard<'_, P, State>, BadContextError> {
        lock_cpu(&self.port, &self.state)
    }

    /// Get the effective caller for `ctx`.
    fn caller_of(state: &State, ctx: ExecContext) -> usize {
        match ctx {
            ExecContext::Process => state.running,
            ExecContext::Interrupt { depth } => {
                log::trace!("acting as HARDWARE at interrupt depth {depth}");
                task_slot(HARDWARE)
            }
        }
    }

    /// Validate the scheduler state after a mutation.
    #[inline]
    fn checkpoint(state: &State) {
        if cfg!(debug_assertions) {
            state.check_runqueues();
        }
    }

    /// The trap entry point. `caller` is the process that trapped; `call` is
    /// a function code combined with [`IpcFlags`].
    pub fn sys_call(
        &self,
        caller: Endpoint,
        call: u32,
        src_dst: Endpoint,
        m_ptr: VirAddr,
    ) -> ResultCode {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => return e.into(),
        };
        let result = state.sys_call(&self.port, caller, call, src_dst, m_ptr);
        Self::checkpoint(&state);
        result.into()
    }

    /// Notify `dst` with the type, flags, and argument of `msg`.
    pub fn lock_notify(
        &self,
        ctx: ExecContext,
        dst: Endpoint,
        msg: &Message,
    ) -> Result<(), NotifyError> {
        let mut state = self.lock()?;
        let caller = Self::caller_of(&state, ctx);
        let dst = state.resolve(dst)?;
        state.mini_notify(&self.port, caller, dst, msg)?;
        Self::checkpoint(&state);
        Ok(())
    }

    /// Send the message at `m_ptr` to `dst`. Interrupt handlers always send
    /// with `NON_BLOCKING`.
    pub fn lock_send(
        &self,
        ctx: ExecContext,
        dst: Endpoint,
        m_ptr: VirAddr,
        flags: IpcFlags,
    ) -> Result<(), SendError> {
        let mut state = self.lock()?;
        let caller = Self::caller_of(&state, ctx);
        let dst = state.resolve(dst)?;
        let flags = if ctx.is_interrupt() {
            flags | IpcFlags::NON_BLOCKING
        } else {
            flags
        };
        let result = state.mini_send(&self.port, caller, dst, m_ptr, flags);
        Self::checkpoint(&state);
        result
    }

    /// Receive a message from `src` (or [`Endpoint::ANY`]) into `m_ptr` of the
    /// running process. This is how kernel tasks wait for requests.
    pub fn lock_receive(
        &self,
        src: Endpoint,
        m_ptr: VirAddr,
        flags: IpcFlags,
    ) -> Result<(), ReceiveError> {
        let mut state = self.lock()?;
        let caller = state.running;
        let src = if src == Endpoint::ANY {
            Source::Any
        } else {
            Source::Slot(state.resolve(src)?)
        };
        let result = state.mini_receive(&self.port, caller, src, m_ptr, flags);
        Self::checkpoint(&state);
        result
    }

    /// Remove scheduling blockers from `ep`, readying it if nothing else
    /// blocks it.
    pub fn lock_ready(&self, ep: Endpoint, flags: RtsFlags) -> Result<(), ReadyError> {
        let mut state = self.lock()?;
        let slot = state.resolve(ep)?;
        if slot == task_slot(HARDWARE) {
            return Err(ReadyError::BadParam);
        }
        state.clear_rts(slot, flags);
        Self::checkpoint(&state);
        Ok(())
    }

    /// Add scheduling blockers to `ep`, taking it off the ready queues.
    pub fn lock_unready(&self, ep: Endpoint, flags: RtsFlags) -> Result<(), ReadyError> {
        let mut state = self.lock()?;
        let slot = state.resolve(ep)?;
        if slot == task_slot(HARDWARE) || state.procs[slot].kind == ProcKind::Idle {
            return Err(ReadyError::BadParam);
        }
        state.set_rts(slot, flags);
        Self::checkpoint(&state);
        Ok(())
    }

    /// Rotate ready queue `queue` and pick the next process to run.
    pub fn lock_sched(&self, queue: usize) -> Result<(), SchedError> {
        if queue >= NR_SCHED_QUEUES {
            return Err(SchedError::BadParam);
        }
        let mut state = self.lock()?;
        state.sched(queue);
        Self::checkpoint(&state);
        Ok(())
    }

    /// Switch to the process slated to run next and return it.
    pub fn dispatch(&self) -> Result<Endpoint, BadContextError> {
        let mut state = self.lock()?;
        if state.running != state.next {
            log::trace!(
                "switching {:?} -> {:?}",
                state.endpoint(state.running),
                state.endpoint(state.next)
            );
        }
        state.running = state.next;
        Ok(state.endpoint(state.running))
    }

    /// Get the running process.
    pub fn running(&self) -> Result<Endpoint, BadContextError> {
        let state = self.lock()?;
        Ok(state.endpoint(state.running))
    }

    /// Get the process slated to run next.
    pub fn next_to_run(&self) -> Result<Endpoint, BadContextError> {
        let state = self.lock()?;
        Ok(state.endpoint(state.next))
    }

    /// Create a process in the empty slot `proc_nr`. The process starts with
    /// `NO_MAP` set; [`lock_ready`](Self::lock_ready) it once it's loaded.
    pub fn spawn(&self, proc_nr: ProcNr, attr: &ProcAttr) -> Result<Endpoint, SpawnError> {
        let mut state = self.lock()?;
        let ep = state.claim(proc_nr, attr)?;
        Self::checkpoint(&state);
        Ok(ep)
    }

    /// Destroy the process `ep` and release its slot.
    ///
    /// Processes blocked on IPC with it are woken, and see `DeadSrcDst` in
    /// their result register ([`Port::set_result`]).
    pub fn exit(&self, ep: Endpoint) -> Result<(), ExitError> {
        let mut state = self.lock()?;
        let slot = state.resolve(ep)?;
        if is_kernel_task(ep.proc_nr()) {
            return Err(ExitError::BadParam);
        }
        state.release(&self.port, slot);
        Self::checkpoint(&state);
        Ok(())
    }

    /// Process one clock tick.
    pub fn clock_tick(&self, ctx: ExecContext) -> Result<TickReport, BadContextError> {
        let mut state = self.lock()?;
        log::trace!("clock_tick {ctx:?}");
        let report = state.clock_tick(&self.port);
        Self::checkpoint(&state);
        Ok(report)
    }

    /// Arm an alarm that notifies `ep` with `SYN_ALARM` after `ticks` ticks.
    /// `ticks == 0` cancels the alarm. Returns the ticks that were left on the
    /// previous alarm.
    pub fn set_alarm(&self, ep: Endpoint, ticks: u64) -> Result<u64, SetAlarmError> {
        let mut state = self.lock()?;
        let slot = state.resolve(ep)?;
        Ok(state.set_alarm(slot, ticks))
    }

    /// Get the number of ticks since boot.
    pub fn uptime(&self) -> Result<u64, BadContextError> {
        Ok(self.lock()?.realtime)
    }

    /// Take a consistent copy of the process table.
    pub fn proc_table(&self) -> Result<ProcTable, BadContextError> {
        Ok(self.lock()?.proc_table())
    }

    /// Validate the ready queues against the process table. Panics on any
    /// inconsistency.
    pub fn check_runqueues(&self) -> Result<(), BadContextError> {
        self.lock()?.check_runqueues();
        Ok(())
    }
}
