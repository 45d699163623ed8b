//! The trap entry point: decoding, validation, and dispatch of IPC calls.
use crate::{
    endpoint::{is_kernel_task, proc_nr_of, Endpoint},
    error::SysCallError,
    proc::{CallMask, Source},
    state::State,
    Port, VirAddr,
};

/// Send a message and block until it's received.
pub const SEND: u32 = 1;
/// Block until a message arrives.
pub const RECEIVE: u32 = 2;
/// `SEND` followed by `RECEIVE` from the same process.
pub const SENDREC: u32 = 3;
/// Send a notification without blocking.
pub const NOTIFY: u32 = 4;
/// Copy the message buffer back to itself, with `m_source` filled in.
pub const ECHO: u32 = 8;

const FUNCTION_MASK: u32 = 0x0f;

/// An IPC function, decoded from the low bits of a call word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Send,
    Receive,
    SendRec,
    Notify,
    Echo,
}

impl Function {
    /// Split a call word into the function and the flags. Returns `None` if
    /// either part contains unknown bits.
    pub fn decode(call: u32) -> Option<(Self, IpcFlags)> {
        let function = match call & FUNCTION_MASK {
            SEND => Self::Send,
            RECEIVE => Self::Receive,
            SENDREC => Self::SendRec,
            NOTIFY => Self::Notify,
            ECHO => Self::Echo,
            _ => return None,
        };
        let flags = IpcFlags::from_bits(call & !FUNCTION_MASK)?;
        Some((function, flags))
    }

    /// Get the call mask bit that permits this function.
    pub fn call_mask(self) -> CallMask {
        match self {
            Self::Send => CallMask::SEND,
            Self::Receive => CallMask::RECEIVE,
            Self::SendRec => CallMask::SENDREC,
            Self::Notify => CallMask::NOTIFY,
            Self::Echo => CallMask::ECHO,
        }
    }

    /// Get a flag indicating whether the function delivers something to the
    /// addressed process.
    fn sends(self) -> bool {
        matches!(self, Self::Send | Self::SendRec | Self::Notify)
    }
}

bitflags::bitflags! {
    /// Flags accompanying an IPC function in a call word.
    pub struct IpcFlags: u32 {
        /// Fail with `NotReady` instead of blocking.
        const NON_BLOCKING = 0x10;
        /// Only accept a reply from a sender, not a pending notification.
        /// Applied to the receive half of `SENDREC`.
        const FRESH_ANSWER = 0x20;
    }
}

/// The validated target of a call.
#[derive(Debug, Clone, Copy)]
enum Target {
    None,
    Slot(usize),
    Any,
}

impl State {
    /// Validate and perform an IPC call trapped by `caller`.
    ///
    /// Nothing is modified until every check has passed.
    pub(crate) fn sys_call(
        &mut self,
        port: &impl Port,
        caller_ep: Endpoint,
        call: u32,
        src_dst: Endpoint,
        m_ptr: VirAddr,
    ) -> Result<(), SysCallError> {
        // A blocked process can't trap
        let caller = self
            .resolve(caller_ep)
            .map_err(|_| SysCallError::BadContext)?;
        if !self.procs[caller].is_ready() {
            return Err(SysCallError::BadContext);
        }
        let caller_nr = proc_nr_of(caller);

        let (function, flags) = Function::decode(call).ok_or(SysCallError::BadCall)?;

        let p = &self.procs[caller];
        if !p.call_mask.contains(function.call_mask()) {
            return Err(SysCallError::CallDenied);
        }
        // Tasks must not block without replying
        if p.kind.is_task() && matches!(function, Function::Send | Function::Receive) {
            return Err(SysCallError::CallDenied);
        }

        let target = if function == Function::Echo {
            Target::None
        } else if src_dst == Endpoint::SELF {
            Target::Slot(caller)
        } else if src_dst == Endpoint::ANY {
            if function != Function::Receive {
                return Err(SysCallError::BadSrcDst);
            }
            Target::Any
        } else {
            Target::Slot(self.resolve(src_dst)?)
        };

        if let (true, Target::Slot(dst)) = (function.sends(), target) {
            if !self.procs[caller].send_mask.allows_slot(dst) {
                return Err(SysCallError::CallDenied);
            }
            if is_kernel_task(proc_nr_of(dst)) && function != Function::SendRec {
                return Err(SysCallError::CallDenied);
            }
        }

        // Kernel tasks' buffers are in kernel space
        if !is_kernel_task(caller_nr) && !self.procs[caller].memmap.contains_message(m_ptr) {
            return Err(SysCallError::Fault);
        }

        log::trace!(
            "sys_call {:?} {function:?} {flags:?} {src_dst:?} {m_ptr:#x}",
            self.endpoint(caller)
        );

        match (function, target) {
            (Function::Echo, _) => {
                let mut msg = port.read_message(caller_nr, m_ptr);
                msg.m_source = self.endpoint(caller);
                port.write_message(caller_nr, m_ptr, &msg);
                Ok(())
            }
            (Function::Send, Target::Slot(dst)) => {
                Ok(self.mini_send(port, caller, dst, m_ptr, flags)?)
            }
            (Function::SendRec, Target::Slot(dst)) => {
                self.mini_send(port, caller, dst, m_ptr, flags)?;
                Ok(self.mini_receive(
                    port,
                    caller,
                    Source::Slot(dst),
                    m_ptr,
                    flags | IpcFlags::FRESH_ANSWER,
                )?)
            }
            (Function::Receive, Target::Slot(src)) => {
                Ok(self.mini_receive(port, caller, Source::Slot(src), m_ptr, flags)?)
            }
            (Function::Receive, Target::Any) => {
                Ok(self.mini_receive(port, caller, Source::Any, m_ptr, flags)?)
            }
            (Function::Notify, Target::Slot(dst)) => {
                let msg = port.read_message(caller_nr, m_ptr);
                Ok(self.mini_notify(port, caller, dst, &msg)?)
            }
            // `ANY` is only resolved for `RECEIVE`, and only `ECHO` has no
            // target
            (_, Target::Any | Target::None) => Err(SysCallError::BadSrcDst),
        }
    }
}
