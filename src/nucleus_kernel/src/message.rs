//! The fixed-size IPC message.
//!
//! Every message is [`MESSAGE_SIZE`] bytes. The first two words are the
//! source endpoint (always stamped by the kernel) and the type; the rest is
//! an untyped payload whose layout is a convention between the two parties.
//!
//! Messages synthesized from notifications use this payload layout:
//!
//! | Bytes   | Field                        |
//! |---------|------------------------------|
//! | `0..4`  | `flags: u32` (little endian) |
//! | `8..16` | `arg: i64` (little endian)   |
use core::fmt;

use crate::{cfg::NR_TASKS, endpoint::Endpoint, utils::Init, ProcNr};

/// The size of a message in bytes.
pub const MESSAGE_SIZE: usize = 64;

/// The size of the untyped payload.
pub const PAYLOAD_LEN: usize = MESSAGE_SIZE - 8;

/// The bit that marks a message type as a notification.
pub const NOTIFY_MESSAGE: i32 = 0x1000;

/// The notification type used by the kernel on behalf of `proc_nr`.
pub const fn notify_from(proc_nr: ProcNr) -> i32 {
    NOTIFY_MESSAGE | (proc_nr + NR_TASKS as i32)
}

/// A hardware interrupt occurred.
pub const HARD_INT: i32 = notify_from(crate::HARDWARE);

/// An alarm set by [`Kernel::set_alarm`] expired.
///
/// [`Kernel::set_alarm`]: crate::Kernel::set_alarm
pub const SYN_ALARM: i32 = notify_from(crate::CLOCK);

const FLAGS_RANGE: core::ops::Range<usize> = 0..4;
const ARG_RANGE: core::ops::Range<usize> = 8..16;

/// An IPC message.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct Message {
    /// The sender. Overwritten by the kernel on every delivery.
    pub m_source: Endpoint,
    /// The message type.
    pub m_type: i32,
    /// The untyped payload.
    pub payload: [u8; PAYLOAD_LEN],
}

const _: () = assert!(core::mem::size_of::<Message>() == MESSAGE_SIZE);

impl Init for Message {
    const INIT: Self = Self {
        m_source: Endpoint::NONE,
        m_type: 0,
        payload: [0; PAYLOAD_LEN],
    };
}

impl Default for Message {
    fn default() -> Self {
        Self::INIT
    }
}

impl Message {
    /// Construct an empty message of the given type.
    pub const fn new(m_type: i32) -> Self {
        Self {
            m_type,
            ..Self::INIT
        }
    }

    /// Copy `bytes` to the start of the payload. Excess bytes are dropped.
    pub fn with_payload(mut self, bytes: &[u8]) -> Self {
        let len = bytes.len().min(PAYLOAD_LEN);
        self.payload[..len].copy_from_slice(&bytes[..len]);
        self
    }

    /// Construct the message a receiver sees for a notification.
    pub fn notification(source: Endpoint, ntf_type: i32, flags: u32, arg: i64) -> Self {
        let mut this = Self::new(ntf_type);
        this.m_source = source;
        this.payload[FLAGS_RANGE].copy_from_slice(&flags.to_le_bytes());
        this.payload[ARG_RANGE].copy_from_slice(&arg.to_le_bytes());
        this
    }

    /// Get the `flags` field of a notification message.
    pub fn notify_flags(&self) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.payload[FLAGS_RANGE]);
        u32::from_le_bytes(bytes)
    }

    /// Get the `arg` field of a notification message.
    pub fn notify_arg(&self) -> i64 {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(&self.payload[ARG_RANGE]);
        i64::from_le_bytes(bytes)
    }

    /// Get a flag indicating whether the message type is a notification type.
    pub fn is_notification(&self) -> bool {
        self.m_type & NOTIFY_MESSAGE != 0
    }

    /// Get the wire image of the message (native-endian header words).
    pub fn to_bytes(&self) -> [u8; MESSAGE_SIZE] {
        let mut bytes = [0; MESSAGE_SIZE];
        bytes[0..4].copy_from_slice(&self.m_source.raw().to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.m_type.to_ne_bytes());
        bytes[8..].copy_from_slice(&self.payload);
        bytes
    }

    /// Reconstruct a message from its wire image.
    pub fn from_bytes(bytes: &[u8; MESSAGE_SIZE]) -> Self {
        let mut word = [0; 4];
        word.copy_from_slice(&bytes[0..4]);
        let m_source = Endpoint::from_raw(i32::from_ne_bytes(word));
        word.copy_from_slice(&bytes[4..8]);
        let m_type = i32::from_ne_bytes(word);
        let mut payload = [0; PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[8..]);
        Self {
            m_source,
            m_type,
            payload,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let used = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        f.debug_struct("Message")
            .field("m_source", &self.m_source)
            .field("m_type", &self.m_type)
            .field("payload", &&self.payload[..used])
            .finish()
    }
}
