//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because the bitmap types appear in the configuration constants.
mod init;
mod prio_bitmap;
pub use self::{init::*, prio_bitmap::*};
