use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use nucleus_kernel::ResultCode;
            /// assert_eq!(ResultCode::DeadSrcDst.as_str(), "DeadSrcDst");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            /// Convert a raw trap return value back into a `ResultCode`.
            pub fn from_raw(raw: i32) -> Option<Self> {
                match raw {
                    $(
                        x if x == Self::$vname as i32 => Some(Self::$vname),
                    )*
                    _ => None,
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the trap entry point can
    /// return to a process.
    ///
    /// The values match MINIX's `errno` encoding so that a process sees the
    /// same integers it would see on that system.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i32)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// A message buffer lies outside the caller's mapped memory.
        Fault = -14,
        /// The process slot is already occupied.
        Busy = -16,
        /// A parameter is invalid in a way that is not covered by any other
        /// error codes.
        BadParam = -22,
        /// The notification pool is exhausted.
        NoSpace = -28,
        /// The send would close a cycle of blocked senders.
        Locked = -101,
        /// The function code is not one of the known IPC functions.
        BadCall = -102,
        /// The endpoint doesn't name a process table slot.
        BadSrcDst = -103,
        /// The caller isn't allowed to perform the call, or to address the
        /// given destination.
        CallDenied = -104,
        /// The endpoint names a slot that is empty or has been reused since
        /// the endpoint was handed out.
        DeadSrcDst = -105,
        /// `NON_BLOCKING` was requested and the operation would have blocked.
        NotReady = -106,
        /// The current context disallows the operation, e.g., because CPU Lock
        /// is already held or the caller is blocked.
        BadContext = -108,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i32) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i32)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i32
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// Error type for operations that only fail when the calling context is
    /// wrong.
    pub enum BadContextError {
        /// CPU Lock is already held by the current context.
        BadContext,
    }
}

define_error! {
    mod endpoint_error {}
    /// Error type for endpoint resolution.
    pub enum EndpointError {
        /// The endpoint is not a valid process number encoding.
        BadSrcDst,
        /// The slot is empty, or the endpoint's generation is stale.
        DeadSrcDst,
    }
}

define_error! {
    mod send_error {}
    /// Error type for [`Kernel::lock_send`] and the send primitive.
    ///
    /// [`Kernel::lock_send`]: crate::Kernel::lock_send
    pub enum SendError: BadContextError, EndpointError {
        /// CPU Lock is active, or the caller is already blocked.
        BadContext,
        BadSrcDst,
        DeadSrcDst,
        /// The destination is (transitively) blocked sending to the caller.
        Locked,
        /// `NON_BLOCKING` was requested and the destination is not waiting.
        NotReady,
    }
}

define_error! {
    mod receive_error {}
    /// Error type for [`Kernel::lock_receive`] and the receive primitive.
    ///
    /// [`Kernel::lock_receive`]: crate::Kernel::lock_receive
    pub enum ReceiveError: BadContextError, EndpointError {
        /// CPU Lock is active, or the caller is already receiving.
        BadContext,
        BadSrcDst,
        DeadSrcDst,
        /// `NON_BLOCKING` was requested and no message is pending.
        NotReady,
    }
}

define_error! {
    mod notify_error {}
    /// Error type for [`Kernel::lock_notify`] and the notify primitive.
    ///
    /// [`Kernel::lock_notify`]: crate::Kernel::lock_notify
    pub enum NotifyError: BadContextError, EndpointError {
        BadContext,
        BadSrcDst,
        DeadSrcDst,
        /// Every notification record is in use. The notification is lost.
        NoSpace,
    }
}

define_error! {
    mod sys_call_error {}
    /// Error type for [`Kernel::sys_call`].
    ///
    /// [`Kernel::sys_call`]: crate::Kernel::sys_call
    pub enum SysCallError: BadContextError, EndpointError, SendError, ReceiveError, NotifyError {
        /// CPU Lock is active, or the caller is not a live runnable process.
        BadContext,
        /// The function code or flags are not recognized.
        BadCall,
        /// The call mask or the send mask forbids the call.
        CallDenied,
        BadSrcDst,
        DeadSrcDst,
        /// The message buffer is not within the caller's memory map.
        Fault,
        Locked,
        NotReady,
        NoSpace,
    }
}

define_error! {
    mod spawn_error {}
    /// Error type for [`Kernel::spawn`].
    ///
    /// [`Kernel::spawn`]: crate::Kernel::spawn
    pub enum SpawnError: BadContextError {
        BadContext,
        /// The process number, the kind, the priority, or the quantum is out
        /// of range.
        BadParam,
        /// The slot is already in use.
        Busy,
    }
}

define_error! {
    mod exit_error {}
    /// Error type for [`Kernel::exit`].
    ///
    /// [`Kernel::exit`]: crate::Kernel::exit
    pub enum ExitError: BadContextError, EndpointError {
        BadContext,
        BadSrcDst,
        DeadSrcDst,
        /// Kernel tasks can't exit.
        BadParam,
    }
}

define_error! {
    mod ready_error {}
    /// Error type for [`Kernel::lock_ready`] and [`Kernel::lock_unready`].
    ///
    /// [`Kernel::lock_ready`]: crate::Kernel::lock_ready
    /// [`Kernel::lock_unready`]: crate::Kernel::lock_unready
    pub enum ReadyError: BadContextError, EndpointError {
        BadContext,
        BadSrcDst,
        DeadSrcDst,
        /// The flags can't be changed on this process (`HARDWARE` is never
        /// schedulable).
        BadParam,
    }
}

define_error! {
    mod sched_error {}
    /// Error type for [`Kernel::lock_sched`].
    ///
    /// [`Kernel::lock_sched`]: crate::Kernel::lock_sched
    pub enum SchedError: BadContextError {
        BadContext,
        /// The queue number is out of range.
        BadParam,
    }
}

define_error! {
    mod set_alarm_error {}
    /// Error type for [`Kernel::set_alarm`].
    ///
    /// [`Kernel::set_alarm`]: crate::Kernel::set_alarm
    pub enum SetAlarmError: BadContextError, EndpointError {
        BadContext,
        BadSrcDst,
        DeadSrcDst,
    }
}
