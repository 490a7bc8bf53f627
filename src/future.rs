use crate::context::CalloutContext;
use crate::errors::{FutureError, FutureResult};
use crate::handle::ObserverHandle;
use log::{debug, trace, warn};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// The synchronous lazy computation type, executed on the triggering caller's thread.
type SyncComputation<T, E> = Box<dyn FnOnce() -> Result<T, E> + Send>;
/// The asynchronous lazy computation type, dispatched onto a [CalloutContext].
/// It receives a [FutureCompleter] and is expected to settle the future through it.
type AsyncComputation<T, E> = Box<dyn FnOnce(FutureCompleter<T, E>) + Send>;

type SuccessCallback<T> = Box<dyn FnOnce(Arc<T>) + Send>;
type FailureCallback<E> = Box<dyn FnOnce(Arc<E>) + Send>;
type CompletionCallback<T, E> = Box<dyn FnOnce(Result<Arc<T>, Arc<E>>) + Send>;

/// A handle to a pending or settled computation result.
///
/// A future is settled at most once, either with a success value or with an error value,
/// and notifies every registered observer exactly once on the [CalloutContext] the
/// observer requested. The handle is cheap to clone; all clones share the same
/// settlement state.
///
/// # Example
///
/// ```rust,no_run
/// use fx_future::Future;
///
/// let future = Future::<i32, String>::from_async("my-computation", |completer| {
///     // do the actual work
///     completer.succeed(42);
/// });
///
/// future.on_success(|value| {
///     println!("Received value {}", value);
/// });
/// ```
pub struct Future<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    inner: Arc<InnerFuture<T, E>>,
}

impl<T, E> Future<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    /// Creates a future which is settled with the given success value from creation.
    pub fn succeeded(name: &str, value: T) -> Self {
        Self::new(
            name,
            Settlement::Succeeded(Arc::new(value)),
            LazyComputation::None,
            TriggerPhase::Triggered,
        )
    }

    /// Creates a future which is settled with the given error value from creation.
    pub fn failed(name: &str, error: E) -> Self {
        Self::new(
            name,
            Settlement::Failed(Arc::new(error)),
            LazyComputation::None,
            TriggerPhase::Triggered,
        )
    }

    /// Creates a lazy future around a synchronous computation.
    ///
    /// The computation runs at most once, on the thread of whichever caller first
    /// triggers the future (first registration or first result retrieval), and the
    /// future settles with its returned value or error.
    pub fn from_sync<F>(name: &str, computation: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Self::new(
            name,
            Settlement::Unsettled,
            LazyComputation::Sync(Box::new(computation)),
            TriggerPhase::NotTriggered,
        )
    }

    /// Creates a lazy future around an asynchronous computation which is dispatched
    /// onto the default callout context on first trigger.
    ///
    /// The computation receives a [FutureCompleter] and is responsible for settling
    /// the future through it once done.
    pub fn from_async<F>(name: &str, computation: F) -> Self
    where
        F: FnOnce(FutureCompleter<T, E>) + Send + 'static,
    {
        Self::from_async_on(name, computation, CalloutContext::callout())
    }

    /// Creates a lazy future around an asynchronous computation which is dispatched
    /// onto the given context on first trigger.
    ///
    /// The computation receives a [FutureCompleter] and is responsible for settling
    /// the future through it once done.
    pub fn from_async_on<F>(name: &str, computation: F, context: CalloutContext) -> Self
    where
        F: FnOnce(FutureCompleter<T, E>) + Send + 'static,
    {
        Self::new(
            name,
            Settlement::Unsettled,
            LazyComputation::Async(Box::new(computation), context),
            TriggerPhase::NotTriggered,
        )
    }

    /// The diagnostic name of this future.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Verify if this future has been settled.
    ///
    /// This is a non-blocking read which doesn't acquire the settlement lock.
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// Trigger the lazy computation of this future if it hasn't run yet.
    ///
    /// Concurrent trigger attempts collapse into a single execution of the
    /// computation; any additional call is a no-op. Futures created from an
    /// immediate value don't carry a computation and ignore this call.
    pub fn trigger_if_needed(&self) {
        self.inner.trigger_if_needed();
    }

    /// Retrieve the settlement of this future, blocking the caller until the future
    /// settles or the given timeout elapses.
    ///
    /// This triggers the lazy computation if needed. On timeout, the future remains
    /// unsettled from the caller's perspective and a subsequent call may still
    /// observe the eventual settlement.
    ///
    /// This is the only blocking operation of the future.
    pub fn result(&self, timeout: Duration) -> FutureResult<T, E> {
        self.inner.trigger_if_needed();

        let state = self
            .inner
            .state
            .lock()
            .expect("failed to acquire settlement lock");
        let (state, _) = self
            .inner
            .settled_cond
            .wait_timeout_while(state, timeout, |state| {
                matches!(state.settlement, Settlement::Unsettled)
            })
            .expect("failed to acquire settlement lock");

        match &state.settlement {
            Settlement::Succeeded(value) => Ok(value.clone()),
            Settlement::Failed(error) => Err(FutureError::Failed(error.clone())),
            Settlement::Unsettled => {
                debug!(
                    "Future {} didn't settle within {:?}",
                    self.inner.name, timeout
                );
                Err(FutureError::Timeout(timeout))
            }
        }
    }

    /// Register a callback which is invoked with the success value once the future
    /// settles successfully, dispatched onto the default callout context.
    ///
    /// See [Future::on_success_on] for the registration semantics.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        self.on_success_on(callback, CalloutContext::callout())
    }

    /// Register a callback which is invoked with the success value once the future
    /// settles successfully, dispatched onto the given context.
    ///
    /// If the future already settled successfully, the callback is dispatched
    /// immediately without being stored; it is never invoked synchronously on the
    /// registering thread. If the future settled with an error, the callback is
    /// never invoked. Otherwise the callback is stored and the lazy computation
    /// is triggered.
    pub fn on_success_on<F>(&self, callback: F, context: CalloutContext) -> &Self
    where
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        let handle = ObserverHandle::new();
        let mut state = self
            .inner
            .state
            .lock()
            .expect("failed to acquire settlement lock");
        match &state.settlement {
            Settlement::Succeeded(value) => {
                let value = value.clone();
                drop(state);
                trace!(
                    "Future {} already succeeded, dispatching {} immediately",
                    self.inner.name,
                    handle
                );
                InnerFuture::<T, E>::dispatch_observer(&self.inner.name, handle, &context, move || {
                    callback(value)
                });
            }
            Settlement::Failed(_) => {
                drop(state);
                trace!(
                    "Future {} failed, skipping success {}",
                    self.inner.name,
                    handle
                );
            }
            Settlement::Unsettled => {
                state
                    .success_observers
                    .push((handle, context, Box::new(callback)));
                drop(state);
                trace!("Added success {} to future {}", handle, self.inner.name);
                self.inner.trigger_if_needed();
            }
        }
        self
    }

    /// Register a callback which is invoked with the error value once the future
    /// settles with an error, dispatched onto the default callout context.
    ///
    /// See [Future::on_failure_on] for the registration semantics.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Arc<E>) + Send + 'static,
    {
        self.on_failure_on(callback, CalloutContext::callout())
    }

    /// Register a callback which is invoked with the error value once the future
    /// settles with an error, dispatched onto the given context.
    ///
    /// The registration semantics mirror [Future::on_success_on] with the
    /// disjuncts swapped.
    pub fn on_failure_on<F>(&self, callback: F, context: CalloutContext) -> &Self
    where
        F: FnOnce(Arc<E>) + Send + 'static,
    {
        let handle = ObserverHandle::new();
        let mut state = self
            .inner
            .state
            .lock()
            .expect("failed to acquire settlement lock");
        match &state.settlement {
            Settlement::Failed(error) => {
                let error = error.clone();
                drop(state);
                trace!(
                    "Future {} already failed, dispatching {} immediately",
                    self.inner.name,
                    handle
                );
                InnerFuture::<T, E>::dispatch_observer(&self.inner.name, handle, &context, move || {
                    callback(error)
                });
            }
            Settlement::Succeeded(_) => {
                drop(state);
                trace!(
                    "Future {} succeeded, skipping failure {}",
                    self.inner.name,
                    handle
                );
            }
            Settlement::Unsettled => {
                state
                    .failure_observers
                    .push((handle, context, Box::new(callback)));
                drop(state);
                trace!("Added failure {} to future {}", handle, self.inner.name);
                self.inner.trigger_if_needed();
            }
        }
        self
    }

    /// Register a callback which is invoked with the settlement once the future
    /// settles, regardless of the outcome, dispatched onto the default callout context.
    ///
    /// See [Future::on_completion_on] for the registration semantics.
    pub fn on_completion<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Result<Arc<T>, Arc<E>>) + Send + 'static,
    {
        self.on_completion_on(callback, CalloutContext::callout())
    }

    /// Register a callback which is invoked with the settlement once the future
    /// settles, regardless of the outcome, dispatched onto the given context.
    ///
    /// If the future already settled, the callback is dispatched immediately without
    /// being stored. Otherwise the callback is stored and the lazy computation is
    /// triggered.
    pub fn on_completion_on<F>(&self, callback: F, context: CalloutContext) -> &Self
    where
        F: FnOnce(Result<Arc<T>, Arc<E>>) + Send + 'static,
    {
        let handle = ObserverHandle::new();
        let mut state = self
            .inner
            .state
            .lock()
            .expect("failed to acquire settlement lock");
        match &state.settlement {
            Settlement::Succeeded(value) => {
                let value = value.clone();
                drop(state);
                trace!(
                    "Future {} already settled, dispatching {} immediately",
                    self.inner.name,
                    handle
                );
                InnerFuture::<T, E>::dispatch_observer(&self.inner.name, handle, &context, move || {
                    callback(Ok(value))
                });
            }
            Settlement::Failed(error) => {
                let error = error.clone();
                drop(state);
                trace!(
                    "Future {} already settled, dispatching {} immediately",
                    self.inner.name,
                    handle
                );
                InnerFuture::<T, E>::dispatch_observer(&self.inner.name, handle, &context, move || {
                    callback(Err(error))
                });
            }
            Settlement::Unsettled => {
                state
                    .completion_observers
                    .push((handle, context, Box::new(callback)));
                drop(state);
                trace!("Added completion {} to future {}", handle, self.inner.name);
                self.inner.trigger_if_needed();
            }
        }
        self
    }

    fn new(
        name: &str,
        settlement: Settlement<T, E>,
        computation: LazyComputation<T, E>,
        phase: TriggerPhase,
    ) -> Self {
        let settled = !matches!(settlement, Settlement::Unsettled);
        Self {
            inner: Arc::new(InnerFuture {
                name: name.to_string(),
                state: Mutex::new(FutureState {
                    settlement,
                    success_observers: Vec::new(),
                    failure_observers: Vec::new(),
                    completion_observers: Vec::new(),
                }),
                settled_cond: Condvar::new(),
                settled: AtomicBool::new(settled),
                trigger: Mutex::new(TriggerState { phase, computation }),
            }),
        }
    }
}

impl<T, E> Clone for Future<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Debug for Future<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("name", &self.inner.name)
            .field("settled", &self.inner.is_settled())
            .finish()
    }
}

/// The settle handle of a future created around an asynchronous computation.
///
/// The completer is handed to the computation when it is dispatched and must be used
/// to settle the future exactly once. It keeps the settlement state of the future
/// alive, allowing the computation to outlive every [Future] handle.
pub struct FutureCompleter<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    inner: Arc<InnerFuture<T, E>>,
}

impl<T, E> FutureCompleter<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    /// The diagnostic name of the underlying future.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Verify if the underlying future has been settled.
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// Settle the underlying future with the given success value.
    ///
    /// # Panics
    ///
    /// Panics when the future has already been settled.
    pub fn succeed(self, value: T) {
        self.inner.settle(Ok(value));
    }

    /// Settle the underlying future with the given error value.
    ///
    /// # Panics
    ///
    /// Panics when the future has already been settled.
    pub fn fail(self, error: E) {
        self.inner.settle(Err(error));
    }

    /// Settle the underlying future with either a success value or an error value.
    ///
    /// # Panics
    ///
    /// Panics when both or neither of the values are supplied, or when the future
    /// has already been settled. These indicate a broken caller invariant rather
    /// than a runtime condition.
    pub fn complete(self, result: Option<T>, error: Option<E>) {
        match (result, error) {
            (Some(_), Some(_)) => panic!(
                "future {} was completed with both a result and an error",
                self.inner.name
            ),
            (None, None) => panic!(
                "future {} was completed with neither a result nor an error",
                self.inner.name
            ),
            (Some(value), None) => self.inner.settle(Ok(value)),
            (None, Some(error)) => self.inner.settle(Err(error)),
        }
    }
}

impl<T, E> Clone for FutureCompleter<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Debug for FutureCompleter<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureCompleter")
            .field("name", &self.inner.name)
            .field("settled", &self.inner.is_settled())
            .finish()
    }
}

/// The settlement of a future, written at most once.
enum Settlement<T, E> {
    Unsettled,
    Succeeded(Arc<T>),
    Failed(Arc<E>),
}

impl<T, E> Clone for Settlement<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Unsettled => Self::Unsettled,
            Self::Succeeded(value) => Self::Succeeded(value.clone()),
            Self::Failed(error) => Self::Failed(error.clone()),
        }
    }
}

/// The state guarded by the settlement lock of a future.
struct FutureState<T, E> {
    settlement: Settlement<T, E>,
    success_observers: Vec<(ObserverHandle, CalloutContext, SuccessCallback<T>)>,
    failure_observers: Vec<(ObserverHandle, CalloutContext, FailureCallback<E>)>,
    completion_observers: Vec<(ObserverHandle, CalloutContext, CompletionCallback<T, E>)>,
}

/// The lazy computation attached to a future, taken out of the slot on first trigger.
enum LazyComputation<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    None,
    Sync(SyncComputation<T, E>),
    Async(AsyncComputation<T, E>, CalloutContext),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TriggerPhase {
    NotTriggered,
    Triggering,
    Triggered,
}

/// The state guarded by the trigger lock, independent of the settlement lock so that
/// a trigger in progress never blocks settlement reads.
struct TriggerState<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    phase: TriggerPhase,
    computation: LazyComputation<T, E>,
}

struct InnerFuture<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    name: String,
    state: Mutex<FutureState<T, E>>,
    settled_cond: Condvar,
    settled: AtomicBool,
    trigger: Mutex<TriggerState<T, E>>,
}

impl<T, E> InnerFuture<T, E>
where
    T: Debug + Send + Sync + 'static,
    E: Debug + Send + Sync + 'static,
{
    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    fn trigger_if_needed(self: &Arc<Self>) {
        let mut trigger = self
            .trigger
            .lock()
            .expect("failed to acquire trigger lock");
        if trigger.phase != TriggerPhase::NotTriggered {
            return;
        }
        trigger.phase = TriggerPhase::Triggering;
        let computation = std::mem::replace(&mut trigger.computation, LazyComputation::None);
        drop(trigger);

        match computation {
            LazyComputation::None => {}
            LazyComputation::Sync(computation) => {
                debug!("Triggering sync computation of future {}", self.name);
                let result = computation();
                self.settle(result);
            }
            LazyComputation::Async(computation, context) => {
                debug!(
                    "Dispatching async computation of future {} onto context {}",
                    self.name,
                    context.name()
                );
                let completer = FutureCompleter {
                    inner: self.clone(),
                };
                context.dispatch(move || computation(completer));
            }
        }

        let mut trigger = self
            .trigger
            .lock()
            .expect("failed to acquire trigger lock");
        trigger.phase = TriggerPhase::Triggered;
    }

    /// Settle this future with the given result, waking blocked result retrievals and
    /// draining all observer lists.
    ///
    /// The settlement lock is released before any observer is invoked, which allows
    /// observers to re-enter the future.
    ///
    /// # Panics
    ///
    /// Panics when the future has already been settled.
    fn settle(self: &Arc<Self>, result: Result<T, E>) {
        let settlement = match result {
            Ok(value) => Settlement::Succeeded(Arc::new(value)),
            Err(error) => Settlement::Failed(Arc::new(error)),
        };

        let mut state = self
            .state
            .lock()
            .expect("failed to acquire settlement lock");
        if !matches!(state.settlement, Settlement::Unsettled) {
            drop(state);
            panic!("future {} has already been settled", self.name);
        }
        state.settlement = settlement.clone();
        self.settled.store(true, Ordering::Release);
        let success_observers = std::mem::take(&mut state.success_observers);
        let failure_observers = std::mem::take(&mut state.failure_observers);
        let completion_observers = std::mem::take(&mut state.completion_observers);
        drop(state);
        self.settled_cond.notify_all();

        match &settlement {
            Settlement::Succeeded(value) => {
                debug!(
                    "Future {} settled successfully, notifying {} success and {} completion observers",
                    self.name,
                    success_observers.len(),
                    completion_observers.len()
                );
                for (handle, context, callback) in success_observers {
                    let value = value.clone();
                    Self::dispatch_observer(&self.name, handle, &context, move || callback(value));
                }
                for (handle, _, _) in failure_observers {
                    trace!("Dropping failure {} of future {}", handle, self.name);
                }
                for (handle, context, callback) in completion_observers {
                    let value = value.clone();
                    Self::dispatch_observer(&self.name, handle, &context, move || {
                        callback(Ok(value))
                    });
                }
            }
            Settlement::Failed(error) => {
                debug!(
                    "Future {} settled with error {:?}, notifying {} failure and {} completion observers",
                    self.name,
                    error,
                    failure_observers.len(),
                    completion_observers.len()
                );
                for (handle, _, _) in success_observers {
                    trace!("Dropping success {} of future {}", handle, self.name);
                }
                for (handle, context, callback) in failure_observers {
                    let error = error.clone();
                    Self::dispatch_observer(&self.name, handle, &context, move || callback(error));
                }
                for (handle, context, callback) in completion_observers {
                    let error = error.clone();
                    Self::dispatch_observer(&self.name, handle, &context, move || {
                        callback(Err(error))
                    });
                }
            }
            Settlement::Unsettled => unreachable!(),
        }
    }

    /// Dispatch the given observer callback onto its context, accounting the time the
    /// callback takes to process the invocation.
    fn dispatch_observer<F>(name: &str, handle: ObserverHandle, context: &CalloutContext, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        trace!(
            "Dispatching {} of future {} onto context {}",
            handle,
            name,
            context.name()
        );
        context.dispatch(move || {
            let start_time = Instant::now();
            callback();
            let elapsed = start_time.elapsed();
            let message = format!(
                "Observer {} took {}.{:03}ms to process the invocation",
                handle,
                elapsed.as_millis(),
                elapsed.subsec_micros() % 1000
            );
            if elapsed.as_millis() >= 1000 {
                warn!("{}", message);
            } else {
                trace!("{}", message);
            }
        });
    }
}
