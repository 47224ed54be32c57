//! Result delivery: [`DbFuture`] and the single completion thread.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use futures::channel::{mpsc, oneshot};
use futures::executor::{block_on, LocalPool};
use futures::future::BoxFuture;
use futures::task::LocalSpawnExt;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{DbError, Result};

/// Owns the thread on which `on_complete` callbacks run, one at a time.
pub(crate) struct CompletionContext {
    sender: Mutex<Option<mpsc::UnboundedSender<BoxFuture<'static, ()>>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl CompletionContext {
    pub(crate) fn start(name: &str) -> Result<Arc<Self>> {
        let (sender, mut receiver) = mpsc::unbounded::<BoxFuture<'static, ()>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut pool = LocalPool::new();
                let spawner = pool.spawner();
                pool.run_until(async move {
                    while let Some(task) = receiver.next().await {
                        if let Err(e) = spawner.spawn_local(task) {
                            error!(error = %e, "completion pool rejected a task");
                        }
                    }
                });
                // deliver whatever was accepted before shutdown
                pool.run();
                debug!("completion context stopped");
            })?;
        Ok(Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        }))
    }

    /// Queues a delivery; after shutdown it runs on the calling thread.
    fn dispatch(&self, task: BoxFuture<'static, ()>) {
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => sender.unbounded_send(task).err().map(|e| e.into_inner()),
            None => Some(task),
        };
        if let Some(task) = rejected {
            block_on(task);
        }
    }

    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops accepting deliveries and waits for the queued ones to run.
    pub(crate) fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("completion thread panicked");
            }
        }
    }
}

/// The eventual outcome of one submitted operation.
///
/// Resolves exactly once, to the operation's value or its error. Dropping the
/// future before the operation starts cancels it; a started operation always
/// runs to completion.
#[must_use = "dropping a DbFuture before it runs cancels the operation"]
pub struct DbFuture<T> {
    receiver: oneshot::Receiver<Result<T>>,
    completion: Arc<CompletionContext>,
}

impl<T> DbFuture<T> {
    pub(crate) fn new(
        receiver: oneshot::Receiver<Result<T>>,
        completion: Arc<CompletionContext>,
    ) -> Self {
        Self {
            receiver,
            completion,
        }
    }

    /// Blocks the current thread until the outcome is available.
    pub fn wait(self) -> Result<T> {
        block_on(self)
    }
}

impl<T: Send + 'static> DbFuture<T> {
    /// Delivers the outcome to `callback` on the completion thread.
    ///
    /// Callbacks from every operation of a database run one at a time. A
    /// panicking callback is logged and does not affect later deliveries.
    pub fn on_complete(self, callback: impl FnOnce(Result<T>) + Send + 'static) {
        let completion = Arc::clone(&self.completion);
        let delivery = async move {
            let outcome = self.await;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(outcome))) {
                error!(panic = %panic_message(panic.as_ref()), "completion callback panicked");
            }
        };
        completion.dispatch(delivery.boxed());
    }
}

impl<T> Future for DbFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(DbError::Abandoned(
                "the worker dropped the operation before it completed".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
