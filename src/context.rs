use log::{trace, warn};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// The job type that can be dispatched onto a [CalloutContext].
type ContextJob = Box<dyn FnOnce() + Send>;

/// The process-wide default callout context, created on first use.
static DEFAULT_CALLOUT: OnceLock<CalloutContext> = OnceLock::new();

/// A named serial execution context onto which jobs can be dispatched.
///
/// Jobs are executed in dispatch order on a dedicated worker thread, unblocking the
/// caller thread for other tasks. The context is a cheap handle and can be shared
/// across threads; the worker thread ends once the last handle is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use fx_future::CalloutContext;
///
/// let context = CalloutContext::new("my-context");
/// context.dispatch(|| {
///     // do something on the context
/// });
/// ```
#[derive(Debug, Clone)]
pub struct CalloutContext {
    inner: Arc<InnerContext>,
}

impl CalloutContext {
    /// Creates a new serial execution context with the given name.
    ///
    /// The name is used for diagnostics and as the worker thread name.
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = unbounded_channel::<ContextJob>();
        let worker_name = format!("callout-{}", name);

        thread::Builder::new()
            .name(worker_name)
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job();
                }
            })
            .expect("expected the callout worker thread to have been spawned");

        Self {
            inner: Arc::new(InnerContext {
                name: name.to_string(),
                sender,
            }),
        }
    }

    /// Retrieve the process-wide default callout context.
    ///
    /// The context is lazily initialized on first use and lives until process exit.
    /// It is used whenever no explicit context is supplied at registration or
    /// async construction.
    pub fn callout() -> Self {
        DEFAULT_CALLOUT
            .get_or_init(|| Self::new("default"))
            .clone()
    }

    /// The name of this execution context.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dispatch the given job onto this context.
    ///
    /// The job is invoked asynchronously relative to the caller, after all previously
    /// dispatched jobs have completed. Jobs dispatched onto a torn-down context are
    /// dropped with a warning.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.sender.send(Box::new(job)).is_err() {
            warn!(
                "Callout context {} has been torn down, dropping job",
                self.inner.name
            );
            return;
        }
        trace!("Dispatched job onto callout context {}", self.inner.name);
    }
}

struct InnerContext {
    name: String,
    sender: UnboundedSender<ContextJob>,
}

impl Debug for InnerContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerContext")
            .field("name", &self.name)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_logger;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_dispatch() {
        init_logger!();
        let (tx, rx) = channel();
        let context = CalloutContext::new("test");

        context.dispatch(move || {
            tx.send("lorem").unwrap();
        });

        let result = rx.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!("lorem", result);
    }

    #[test]
    fn test_dispatch_preserves_order() {
        init_logger!();
        let (tx, rx) = channel();
        let context = CalloutContext::new("ordering");

        for i in 0..50 {
            let tx = tx.clone();
            context.dispatch(move || {
                tx.send(i).unwrap();
            });
        }

        for expected in 0..50 {
            let result = rx.recv_timeout(Duration::from_millis(200)).unwrap();
            assert_eq!(expected, result);
        }
    }

    #[test]
    fn test_callout_returns_same_context() {
        init_logger!();

        let first = CalloutContext::callout();
        let second = CalloutContext::callout();

        assert_eq!(first.name(), second.name());
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
    }

    #[test]
    fn test_dispatch_from_multiple_threads() {
        init_logger!();
        let (tx, rx) = channel();
        let context = CalloutContext::new("multi");

        for i in 0..10 {
            let tx = tx.clone();
            let context = context.clone();
            thread::spawn(move || {
                context.dispatch(move || {
                    tx.send(i).unwrap();
                });
            });
        }

        let mut received = Vec::new();
        for _ in 0..10 {
            received.push(rx.recv_timeout(Duration::from_millis(500)).unwrap());
        }
        received.sort();
        assert_eq!((0..10).collect::<Vec<i32>>(), received);
    }
}
