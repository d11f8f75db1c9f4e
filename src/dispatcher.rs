use crate::config::{LogConfig, ThreadPoolConfig};
use crate::error::DispatchError;
use crate::handler::{DefaultLogHandler, LogHandler};
use crate::record::LogRecord;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Routes finished [`LogRecord`]s to every registered [`LogHandler`].
///
/// In synchronous mode the fan-out runs on the dispatching task before
/// [`dispatch`](Dispatcher::dispatch) returns. In asynchronous mode records
/// are pushed onto a bounded queue drained by a small pool of background
/// tasks; when the queue is full and the pool is at its maximum size the
/// record is handled on the dispatching task instead of being dropped.
///
/// The handler list is fixed at build time.
pub struct Dispatcher {
    shared: Arc<Shared>,
    pool: Option<WorkerPool>,
}

struct Shared {
    handlers: Vec<Arc<dyn LogHandler>>,
    dispatched: AtomicU64,
    enqueued: AtomicU64,
    caller_runs: AtomicU64,
    completed: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records passed to `dispatch`.
    pub dispatched: u64,
    /// Records accepted by the worker pool.
    pub enqueued: u64,
    /// Records handled on the dispatching task because the pool was saturated
    /// or already shut down.
    pub caller_runs: u64,
    /// Records whose fan-out has finished.
    pub completed: u64,
    /// Individual handler invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Live background workers.
    pub workers: usize,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    handlers: Vec<Arc<dyn LogHandler>>,
    async_dispatch: bool,
    pool: ThreadPoolConfig,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            async_dispatch: false,
            pool: ThreadPoolConfig::default(),
        }
    }
}

impl DispatcherBuilder {
    /// Take dispatch mode and pool sizing from a [`LogConfig`].
    pub fn from_config(config: &LogConfig) -> Self {
        Self {
            handlers: Vec::new(),
            async_dispatch: config.async_dispatch,
            pool: config.thread_pool.clone(),
        }
    }

    /// Register a handler. Handlers with equal [`order`](LogHandler::order)
    /// run in registration order.
    pub fn handler(mut self, handler: Arc<dyn LogHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn async_dispatch(mut self, enabled: bool) -> Self {
        self.async_dispatch = enabled;
        self
    }

    pub fn pool(mut self, pool: ThreadPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sort handlers and, in async mode, start the core workers.
    ///
    /// **Returns**
    /// - `Err(DispatchError::NoRuntime)` if async mode was requested outside a
    ///   tokio runtime.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let shared = Shared::new(self.handlers);
        let pool = if self.async_dispatch {
            let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
            Some(WorkerPool::start(runtime, &self.pool, &shared))
        } else {
            None
        };

        Ok(Dispatcher { shared, pool })
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Synchronous dispatcher with the given handlers.
    pub fn inline(handlers: Vec<Arc<dyn LogHandler>>) -> Dispatcher {
        Dispatcher {
            shared: Shared::new(handlers),
            pool: None,
        }
    }

    pub fn is_async(&self) -> bool {
        self.pool.is_some()
    }

    /// Handler names in invocation order.
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.shared.handlers.iter().map(|h| h.name()).collect()
    }

    /// Hand a finalized record to every handler.
    ///
    /// Never fails: handler errors are logged and counted, and a saturated
    /// pool makes the caller run the fan-out itself.
    pub async fn dispatch(&self, record: impl Into<Arc<LogRecord>>) {
        let record = record.into();
        self.shared.dispatched.fetch_add(1, Ordering::Relaxed);

        let Some(pool) = &self.pool else {
            self.shared.fan_out(&record).await;
            return;
        };

        if let Err(record) = pool.submit(record, &self.shared) {
            self.shared.caller_runs.fetch_add(1, Ordering::Relaxed);
            debug!(log_id = %record.log_id, "log queue saturated, running handlers on caller");
            self.shared.fan_out(&record).await;
        }
    }

    /// Non-async variant used where awaiting is impossible (drop guards).
    ///
    /// If the pool cannot take the record it is handed to a fresh task on the
    /// current runtime; without a runtime the record is dropped with a warning.
    pub fn dispatch_detached(&self, record: impl Into<Arc<LogRecord>>) {
        let record = record.into();
        self.shared.dispatched.fetch_add(1, Ordering::Relaxed);

        let record = match &self.pool {
            Some(pool) => match pool.submit(record, &self.shared) {
                Ok(()) => return,
                Err(record) => record,
            },
            None => record,
        };

        match Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(&self.shared);
                runtime.spawn(async move { shared.fan_out(&record).await });
            }
            Err(_) => {
                warn!(log_id = %record.log_id, "no runtime available, dropping log record");
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let s = &self.shared;
        DispatchStats {
            dispatched: s.dispatched.load(Ordering::Relaxed),
            enqueued: s.enqueued.load(Ordering::Relaxed),
            caller_runs: s.caller_runs.load(Ordering::Relaxed),
            completed: s.completed.load(Ordering::Relaxed),
            handler_failures: s.handler_failures.load(Ordering::Relaxed),
            workers: self.pool.as_ref().map_or(0, |p| p.live.load(Ordering::Relaxed)),
        }
    }

    /// Close the queue and wait up to the configured `await_termination` for
    /// the workers to finish what is already queued.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        let timeout = self
            .pool
            .as_ref()
            .map_or(Duration::ZERO, |p| p.await_termination);
        self.shutdown_timeout(timeout).await
    }

    /// Like [`shutdown`](Dispatcher::shutdown) with an explicit bound.
    /// Records dispatched afterwards run on the caller.
    pub async fn shutdown_timeout(&self, timeout: Duration) -> Result<(), DispatchError> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        lock(&pool.sender).take();
        let handles: Vec<JoinHandle<()>> = lock(&pool.workers).drain(..).collect();
        let count = handles.len();

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                info!(workers = count, "log workers drained");
                Ok(())
            }
            Err(_) => {
                warn!(workers = count, ?timeout, "log workers did not drain in time");
                Err(DispatchError::ShutdownTimeout(timeout))
            }
        }
    }
}

impl Shared {
    fn new(mut handlers: Vec<Arc<dyn LogHandler>>) -> Arc<Self> {
        if handlers.is_empty() {
            debug!("no log handlers registered, using DefaultLogHandler");
            handlers.push(Arc::new(DefaultLogHandler));
        }
        // Stable sort keeps registration order for equal priorities.
        handlers.sort_by_key(|h| h.order());

        Arc::new(Shared {
            handlers,
            dispatched: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            caller_runs: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        })
    }

    /// Invoke every handler in order, isolating failures.
    async fn fan_out(&self, record: &LogRecord) {
        for handler in &self.handlers {
            match AssertUnwindSafe(handler.handle(record)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(handler = handler.name(), log_id = %record.log_id, error = %e, "log handler failed");
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(handler = handler.name(), log_id = %record.log_id, "log handler panicked");
                }
            }
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

type Queue = Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<LogRecord>>>>;

struct WorkerPool {
    runtime: Handle,
    sender: Mutex<Option<mpsc::Sender<Arc<LogRecord>>>>,
    receiver: Queue,
    workers: Mutex<Vec<JoinHandle<()>>>,
    live: Arc<AtomicUsize>,
    spawned: AtomicUsize,
    max_size: usize,
    keep_alive: Duration,
    await_termination: Duration,
    name_prefix: String,
}

impl WorkerPool {
    fn start(runtime: Handle, config: &ThreadPoolConfig, shared: &Arc<Shared>) -> Self {
        // Enforce minimal sizes to avoid degenerate configs.
        let core_size = config.core_size.max(1);
        let max_size = config.max_size.max(core_size);
        let capacity = config.queue_capacity.max(1);

        let (tx, rx) = mpsc::channel::<Arc<LogRecord>>(capacity);
        let pool = WorkerPool {
            runtime,
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            workers: Mutex::new(Vec::with_capacity(max_size)),
            live: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            max_size,
            keep_alive: config.keep_alive(),
            await_termination: config.await_termination(),
            name_prefix: config.name_prefix.clone(),
        };

        {
            let mut workers = lock(&pool.workers);
            for _ in 0..core_size {
                workers.push(pool.spawn_worker(true, None, shared));
            }
        }
        debug!(core_size, max_size, capacity, "log worker pool started");
        pool
    }

    /// Queue the record or start an extra worker for it. Gives the record
    /// back when neither is possible.
    fn submit(&self, record: Arc<LogRecord>, shared: &Arc<Shared>) -> Result<(), Arc<LogRecord>> {
        let sender = lock(&self.sender).clone();
        let Some(sender) = sender else {
            return Err(record);
        };

        match sender.try_send(record) {
            Ok(()) => {
                shared.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Closed(record)) => Err(record),
            Err(TrySendError::Full(record)) => {
                let mut workers = lock(&self.workers);
                workers.retain(|h| !h.is_finished());
                if self.live.load(Ordering::Acquire) < self.max_size {
                    shared.enqueued.fetch_add(1, Ordering::Relaxed);
                    workers.push(self.spawn_worker(false, Some(record), shared));
                    Ok(())
                } else {
                    Err(record)
                }
            }
        }
    }

    fn spawn_worker(&self, core: bool, first: Option<Arc<LogRecord>>, shared: &Arc<Shared>) -> JoinHandle<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}{}", self.name_prefix, n);
        let receiver = Arc::clone(&self.receiver);
        let shared = Arc::clone(shared);
        let live = Arc::clone(&self.live);
        // Idle extra workers exit after `keep_alive`; core workers never do.
        let idle_limit = if core { None } else { Some(self.keep_alive) };

        live.fetch_add(1, Ordering::AcqRel);
        self.runtime.spawn(async move {
            debug!(worker = %name, core, "log worker started");
            if let Some(record) = first {
                shared.fan_out(&record).await;
            }
            loop {
                let next = match idle_limit {
                    None => receiver.lock().await.recv().await,
                    Some(limit) => {
                        match tokio::time::timeout(limit, async { receiver.lock().await.recv().await }).await {
                            Ok(next) => next,
                            Err(_) => break,
                        }
                    }
                };
                match next {
                    Some(record) => shared.fan_out(&record).await,
                    None => break,
                }
            }
            live.fetch_sub(1, Ordering::AcqRel);
            debug!(worker = %name, "log worker stopped");
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
