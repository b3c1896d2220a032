//! Architecture-neutral re-export of the task context type.
//!
//! The scheduler stores one [`Context`] per task and calls
//! [`context_switch`] through this module; the concrete layout and the
//! switch assembly live with the owning architecture.

#[cfg(target_arch = "aarch64")]
pub use super::aarch64::context::{context_switch, Context};
#[cfg(target_arch = "x86_64")]
pub use super::x86_64::context::{context_switch, Context};
