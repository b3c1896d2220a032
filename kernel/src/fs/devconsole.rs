//! Console character device exposed to the VFS.
//!
//! Backs fds 0/1/2 of every task. Reads block until input arrives;
//! writes stream to the bound UART through the console layer.

use alloc::sync::Arc;

use spin::Once;

use super::{Vnode, VnodeKind};
use crate::error::KernelResult;

pub struct ConsoleNode;

impl Vnode for ConsoleNode {
    fn kind(&self) -> VnodeKind {
        VnodeKind::CharDevice
    }

    fn read(&self, _offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        #[cfg(target_os = "none")]
        {
            Ok(crate::drivers::console::read_blocking(buf))
        }
        #[cfg(not(target_os = "none"))]
        {
            Ok(crate::drivers::console::read_available(buf))
        }
    }

    fn write(&self, _offset: usize, data: &[u8]) -> KernelResult<usize> {
        Ok(crate::drivers::console::write_bytes(data))
    }
}

static CONSOLE_NODE: Once<Arc<ConsoleNode>> = Once::new();

/// The shared console vnode, created on first use.
pub fn console_vnode() -> Arc<dyn Vnode> {
    CONSOLE_NODE.call_once(|| Arc::new(ConsoleNode)).clone()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn console_is_a_char_device() {
        let node = console_vnode();
        assert_eq!(node.kind(), VnodeKind::CharDevice);
        // Position is meaningless for a character device; writes always
        // succeed and report full length.
        assert_eq!(node.write(123, b"hello").expect("write"), 5);
    }
}
