//! Ordered, single-consumer event processing with backpressure.
//!
//! The queue guarantees events are handled one at a time and in enqueue
//! order; a processing pass is scheduled onto the runtime whenever work
//! arrives and no pass is active, never run inline from `enqueue`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

/// Error returned by an event handler; processing policy decides whether the
/// remaining backlog of the pass still runs.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type EventHandler<T> = Box<dyn Fn(T) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
type ErrorCallback<T> = Box<dyn Fn(T, &HandlerError) + Send + Sync>;

/// Queue construction options.
#[derive(Default)]
pub struct AsyncEventQueueOptions {
    /// Name used in log records.
    pub name: Option<String>,

    /// Backlog cap; when exceeded the oldest queued events are dropped first.
    pub max_size: Option<usize>,

    /// Return an error from `enqueue` after termination instead of silently
    /// dropping the event.
    pub error_on_termination: bool,

    /// Keep processing the remaining backlog of a pass after a handler
    /// error. Default halts the pass so ordered commands are not skipped
    /// past an unexplained failure.
    pub continue_on_error: bool,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("enqueue on terminated event queue")]
    Terminated,
}

struct QueueState<T> {
    events: VecDeque<T>,
    running: bool,
    terminated: bool,
}

struct QueueInner<T> {
    options: AsyncEventQueueOptions,
    handler: EventHandler<T>,
    error_callback: Mutex<Option<ErrorCallback<T>>>,
    state: Mutex<QueueState<T>>,
    drained: Notify,
}

impl<T> QueueInner<T> {
    fn name(&self) -> &str {
        self.options.name.as_deref().unwrap_or("events")
    }
}

/// Generic ordered event processor.
pub struct AsyncEventQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Clone + Send + 'static> AsyncEventQueue<T> {
    /// Create a queue processing events through `handler`.
    pub fn new(
        options: AsyncEventQueueOptions,
        handler: impl Fn(T) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                options,
                handler: Box::new(handler),
                error_callback: Mutex::new(None),
                state: Mutex::new(QueueState {
                    events: VecDeque::new(),
                    running: false,
                    terminated: false,
                }),
                drained: Notify::new(),
            }),
        }
    }

    /// Install a callback invoked with the event and error when a handler
    /// fails.
    pub fn on_error(&self, callback: impl Fn(T, &HandlerError) + Send + Sync + 'static) {
        *self.inner.error_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Append an event to the backlog and schedule processing.
    pub fn enqueue(&self, event: T) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.terminated {
            warn!(queue = self.inner.name(), "enqueue while the event queue is terminated");
            if self.inner.options.error_on_termination {
                return Err(QueueError::Terminated);
            }
            return Ok(());
        }

        state.events.push_back(event);

        if let Some(max_size) = self.inner.options.max_size {
            if state.events.len() > max_size {
                warn!(
                    queue = self.inner.name(),
                    backlog = state.events.len(),
                    max_size,
                    "backlog exceeds the maximum allowed length, dropping oldest"
                );
                while state.events.len() > max_size {
                    state.events.pop_front();
                }
            }
        }

        if !state.running {
            state.running = true;
            drop(state);
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }
        Ok(())
    }

    /// Close the queue to new events and wait for the backlog to drain.
    ///
    /// The closed flag is set before the returned future is first polled, so
    /// an enqueue racing with termination is rejected deterministically.
    pub fn terminate(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.inner.state.lock().unwrap().terminated = true;
        let inner = Arc::clone(&self.inner);
        async move {
            loop {
                let drained = inner.drained.notified();
                {
                    let mut state = inner.state.lock().unwrap();
                    if !state.running {
                        if state.events.is_empty() {
                            return;
                        }
                        // A previous pass halted on error; drain the rest.
                        state.running = true;
                        drop(state);
                        tokio::spawn(drain(Arc::clone(&inner)));
                    }
                }
                drained.await;
            }
        }
    }
}

async fn drain<T: Clone + Send + 'static>(inner: Arc<QueueInner<T>>) {
    loop {
        let event = {
            let mut state = inner.state.lock().unwrap();
            match state.events.pop_front() {
                Some(event) => event,
                None => {
                    state.running = false;
                    drop(state);
                    inner.drained.notify_waiters();
                    return;
                }
            }
        };

        let retained = event.clone();
        if let Err(err) = (inner.handler)(event).await {
            warn!(queue = inner.name(), error = %err, "event handler failed");
            if let Some(callback) = inner.error_callback.lock().unwrap().as_ref() {
                callback(retained, &err);
            }
            if !inner.options.continue_on_error {
                let mut state = inner.state.lock().unwrap();
                state.running = false;
                drop(state);
                inner.drained.notify_waiters();
                return;
            }
        }
    }
}
