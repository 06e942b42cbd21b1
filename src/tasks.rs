//! Background preparation work.
//!
//! Tasks run on worker threads (on the browser event loop for wasm) and send
//! their results through a completion queue, which the control thread drains
//! at the start of a frame. Results are tagged with the selection generation
//! they were computed for; results of an older generation are discarded.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_channel::{Receiver, Sender};

use crate::error::ConcurrencyError;

/// Owner side of a cancellation flag.
#[derive(Debug, Default)]
pub struct CancellationSource {
    flag: Arc<AtomicBool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            flag: self.flag.clone(),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Polled by a task between chunks of work.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), ConcurrencyError> {
        if self.is_cancelled() {
            Err(ConcurrencyError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct Completion<T> {
    generation: u64,
    result: Result<T, ConcurrencyError>,
}

/// Runs at most one live task at a time; spawning cancels the previous one.
#[derive(Debug)]
pub struct TaskQueue<T> {
    sender: Sender<Completion<T>>,
    receiver: Receiver<Completion<T>>,
    running: Option<CancellationSource>,
}

impl<T: Send + 'static> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            running: None,
        }
    }

    /// Cancels the running task, if any.
    pub fn cancel(&mut self) {
        if let Some(source) = self.running.take() {
            source.cancel();
        }
    }

    pub fn spawn<F>(&mut self, generation: u64, work: F)
    where
        F: FnOnce(&CancellationToken) -> Result<T, ConcurrencyError> + Send + 'static,
    {
        self.cancel();
        let source = CancellationSource::new();
        let token = source.token();
        self.running = Some(source);

        let sender = self.sender.clone();
        let run = move || {
            let result = work(&token);
            // The queue may have been dropped in the meantime.
            let _ = sender.try_send(Completion { generation, result });
        };

        #[cfg(not(target_arch = "wasm32"))]
        std::thread::spawn(run);

        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(async move { run() });
    }

    fn accept(completion: Completion<T>, generation: u64) -> Option<T> {
        if completion.generation != generation {
            let stale = ConcurrencyError::StaleResult {
                result: completion.generation,
                current: generation,
            };
            tracing::trace!("discarding task result: {stale}");
            return None;
        }

        match completion.result {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::trace!("discarding task result: {err}");
                None
            }
        }
    }

    /// Completed results for `generation`, in completion order.
    pub fn drain(&mut self, generation: u64) -> Vec<T> {
        let mut results = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            results.extend(Self::accept(completion, generation));
        }
        results
    }

    /// Blocks until a result for `generation` arrives.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait(&mut self, generation: u64) -> T {
        loop {
            let completion = self
                .receiver
                .recv_blocking()
                .expect("the queue owns a sender, the channel cannot close");
            if let Some(value) = Self::accept(completion, generation) {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn results_are_delivered_on_drain() {
        let mut queue = TaskQueue::new();
        queue.spawn(3, |_| Ok(42));
        assert_eq!(queue.wait(3), 42);
        assert!(queue.drain(3).is_empty());
    }

    #[test]
    fn stale_and_cancelled_results_are_discarded() {
        let mut queue = TaskQueue::new();
        let (release, blocked) = mpsc::channel::<()>();

        queue.spawn(1, move |token| {
            blocked.recv().ok();
            token.check()?;
            Ok("cancelled")
        });
        // Spawning cancels the first task.
        queue.spawn(1, |_| Ok("old generation"));
        release.send(()).ok();
        queue.spawn(2, |_| Ok("current"));

        assert_eq!(queue.wait(2), "current");
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(queue.drain(2).is_empty());
    }

    #[test]
    fn tokens_observe_cancellation() {
        let source = CancellationSource::new();
        let token = source.token();
        assert_eq!(token.check(), Ok(()));
        source.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(ConcurrencyError::Cancelled));
    }
}
