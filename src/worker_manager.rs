//! Container that creates [`Worker`] instances.


use crate::worker::{EngineLink, RequestError, Worker, WorkerSettings};
use async_executor::Executor;
use async_oneshot::Sender;
use event_listener_primitives::{Bag, HandlerId};
use futures_lite::future;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_worker: Bag<Arc<dyn Fn(&Worker) + Send + Sync>, Worker>,
}

struct Inner {
    executor: Arc<Executor<'static>>,
    handlers: Handlers,
    /// This field is only used in order to be dropped with the worker manager itself to stop the
    /// thread created with `WorkerManager::new()` call
    _stop_sender: Option<Sender<()>>,
}

/// Container that creates [`Worker`] instances.
///
/// # Examples
/// ```no_run
/// use futures_lite::future;
/// use mediaplane::worker::{EngineLink, WorkerSettings};
/// use mediaplane::worker_manager::WorkerManager;
///
/// let worker_manager = WorkerManager::new();
///
/// // Messages to and from the engine, framing on the actual pipe is up to the caller
/// let (to_engine, _engine_receiver) = async_channel::unbounded();
/// let (_engine_sender, from_engine) = async_channel::unbounded();
///
/// future::block_on(async move {
///     let worker = worker_manager
///         .create_worker(
///             EngineLink::new(to_engine, from_engine),
///             WorkerSettings::default(),
///         )
///         .await
///         .unwrap();
/// })
/// ```
///
/// If you already happen to have [`async_executor::Executor`] instance available,
/// [`WorkerManager::with_executor()`] can be used to create an instance instead.
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerManager").finish()
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerManager {
    /// Create new worker manager, internally a new thread with executor will be created.
    #[must_use]
    pub fn new() -> Self {
        let executor = Arc::new(Executor::new());
        let (stop_sender, stop_receiver) = async_oneshot::oneshot::<()>();
        {
            let executor = Arc::clone(&executor);
            std::thread::spawn(move || {
                // Will return Err(Closed) when `WorkerManager` struct is dropped
                let _ = future::block_on(executor.run(stop_receiver));
            });
        }

        let inner = Arc::new(Inner {
            executor,
            handlers: Handlers::default(),
            _stop_sender: Some(stop_sender),
        });

        Self { inner }
    }

    /// Create new worker manager, uses externally provided executor.
    #[must_use]
    pub fn with_executor(executor: Arc<Executor<'static>>) -> Self {
        let inner = Arc::new(Inner {
            executor,
            handlers: Handlers::default(),
            _stop_sender: None,
        });

        Self { inner }
    }

    /// Create a Worker talking to the engine over given link.
    ///
    /// Worker manager will be kept alive as long as at least one worker instance is alive.
    pub async fn create_worker(
        &self,
        link: EngineLink,
        worker_settings: WorkerSettings,
    ) -> Result<Worker, RequestError> {
        let worker = Worker::new(
            Arc::clone(&self.inner.executor),
            link,
            worker_settings,
            self.clone(),
        )
        .await?;

        self.inner.handlers.new_worker.call_simple(&worker);

        Ok(worker)
    }

    /// Callback is called when a new worker is created.
    pub fn on_new_worker<F: Fn(&Worker) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.new_worker.add(Arc::new(callback))
    }
}
