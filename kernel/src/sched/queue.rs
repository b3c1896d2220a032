//! Ready queues: one FIFO per priority level.

use alloc::collections::VecDeque;

use super::task::{Pid, PRIORITY_LEVELS};

/// Per-priority FIFO ready queues. Selection order is strict priority,
/// FIFO within a level.
pub struct ReadyQueues {
    queues: [VecDeque<Pid>; PRIORITY_LEVELS],
}

impl ReadyQueues {
    pub const fn new() -> Self {
        Self {
            queues: [const { VecDeque::new() }; PRIORITY_LEVELS],
        }
    }

    /// Append at the tail of the task's priority level.
    pub fn enqueue(&mut self, pid: Pid, priority: u8) {
        self.queues[priority as usize % PRIORITY_LEVELS].push_back(pid);
    }

    /// Pop the head of the highest non-empty priority queue.
    pub fn pick_next(&mut self) -> Option<Pid> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Drop a pid wherever it is queued (task died while Ready).
    pub fn remove(&mut self, pid: Pid) {
        for queue in &mut self.queues {
            queue.retain(|&p| p != pid);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

impl Default for ReadyQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_always_wins() {
        let mut queues = ReadyQueues::new();
        queues.enqueue(10, 20);
        queues.enqueue(11, 5);
        queues.enqueue(12, 31);
        assert_eq!(queues.pick_next(), Some(11));
        assert_eq!(queues.pick_next(), Some(10));
        assert_eq!(queues.pick_next(), Some(12));
        assert_eq!(queues.pick_next(), None);
    }

    #[test]
    fn equal_priority_is_fifo_over_requeues() {
        let mut queues = ReadyQueues::new();
        let (a, b, c) = (1, 2, 3);
        queues.enqueue(a, 10);
        queues.enqueue(b, 10);
        queues.enqueue(c, 10);

        // Six quanta: each pick re-enqueues at the tail, like quantum
        // expiry does. The observed order must cycle A B C A B C.
        let mut order = alloc::vec::Vec::new();
        for _ in 0..6 {
            let pid = queues.pick_next().expect("task ready");
            order.push(pid);
            queues.enqueue(pid, 10);
        }
        assert_eq!(order, [a, b, c, a, b, c]);
    }

    #[test]
    fn remove_unqueues_everywhere() {
        let mut queues = ReadyQueues::new();
        queues.enqueue(7, 3);
        queues.enqueue(8, 3);
        queues.remove(7);
        assert_eq!(queues.pick_next(), Some(8));
        assert_eq!(queues.pick_next(), None);
        assert!(queues.is_empty());
    }
}
