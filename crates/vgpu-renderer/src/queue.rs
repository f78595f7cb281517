//! Multi-producer, single-consumer queue of submitted command lists.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::command::CommandList;
use crate::error::SubmitError;

#[derive(Debug, Default)]
struct QueueState {
    lists: VecDeque<CommandList>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `list`. Never blocks beyond the queue mutex.
    ///
    /// After [`CommandQueue::close`] the list is dropped (releasing its commands) and
    /// `SubmitError::Closed` is returned.
    pub fn submit(&self, list: CommandList) -> Result<(), SubmitError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SubmitError::Closed);
        }
        trace!(
            context = list.context().id().0,
            commands = list.len(),
            queued = state.lists.len() + 1,
            "command list submitted"
        );
        state.lists.push_back(list);
        drop(state);
        self.cond.notify_one();
        Ok(())
    }

    /// Rejects further submissions. Lists already queued can still be drained.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` on the head list without removing it.
    pub fn with_head<R>(&self, f: impl FnOnce(&CommandList) -> R) -> Option<R> {
        let state = self.state.lock().unwrap();
        state.lists.front().map(f)
    }

    pub fn pop_head(&self) -> Option<CommandList> {
        self.state.lock().unwrap().lists.pop_front()
    }

    /// Blocks until a list is queued, the queue is closed, or `timeout` elapses. Returns whether
    /// a list is available.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while state.lists.is_empty() && !state.closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
        !state.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AllocatorKind, CommandListBuilder, ContextId, ExecutionContext};
    use std::sync::Arc;
    use std::thread;

    fn list(ctx: &Arc<ExecutionContext>, draws: usize) -> CommandList {
        let mut builder = CommandListBuilder::new(Arc::clone(ctx));
        for _ in 0..draws {
            builder.draw(0, 3, 1);
        }
        builder.finish()
    }

    fn context() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::with_kind(ContextId(1), AllocatorKind::Heap))
    }

    #[test]
    fn lists_pop_in_submission_order() {
        let ctx = context();
        let queue = CommandQueue::new();
        for draws in 1..=3 {
            queue.submit(list(&ctx, draws)).unwrap();
        }
        assert_eq!(queue.with_head(CommandList::len), Some(1));
        let lens: Vec<_> = std::iter::from_fn(|| queue.pop_head()).map(|l| l.len()).collect();
        assert_eq!(lens, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn closed_queue_rejects_submissions_but_drains() {
        let ctx = context();
        let queue = CommandQueue::new();
        queue.submit(list(&ctx, 1)).unwrap();
        queue.close();
        assert_eq!(queue.submit(list(&ctx, 1)), Err(SubmitError::Closed));
        assert_eq!(queue.len(), 1);
        assert!(queue.wait_for_work(Duration::from_millis(1)));
        assert!(queue.pop_head().is_some());
        assert!(!queue.wait_for_work(Duration::from_secs(5)));
    }

    #[test]
    fn wait_for_work_wakes_on_submit() {
        let ctx = context();
        let queue = Arc::new(CommandQueue::new());
        assert!(!queue.wait_for_work(Duration::from_millis(1)));

        let producer = {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || queue.submit(list(&ctx, 1)).unwrap())
        };
        assert!(queue.wait_for_work(Duration::from_secs(5)));
        producer.join().unwrap();
    }
}
