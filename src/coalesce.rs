//! In-process request coalescing.
//!
//! Concurrent callers presenting the same key while a call for that key is
//! in flight do not start new work; they await the in-flight call and receive
//! its result (or an identical copy of its error). Once the call completes the
//! key is forgotten, so the next caller executes again.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AppError, Result};

type Outcome<T> = std::result::Result<T, Arc<AppError>>;

struct InFlight<T> {
    future: Shared<BoxFuture<'static, Outcome<T>>>,
    callers: Arc<AtomicUsize>,
}

/// Collapses concurrent identical calls into one unit of work.
pub struct Coalescer<T> {
    calls: Arc<Mutex<HashMap<String, InFlight<T>>>>,
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a new, empty `Coalescer`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `work` for `key` unless a call for `key` is already in flight.
    ///
    /// Returns the outcome and whether it was handed to more than one caller.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Result<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (future, callers) = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(call) => {
                    call.callers.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!("joining in-flight call for key {}", key);
                    (call.future.clone(), Arc::clone(&call.callers))
                }
                None => {
                    let registry = Arc::clone(&self.calls);
                    let owned_key = key.to_string();
                    let fut = work();
                    let future = async move {
                        let outcome = fut.await.map_err(Arc::new);
                        registry.lock().remove(&owned_key);
                        outcome
                    }
                    .boxed()
                    .shared();

                    let callers = Arc::new(AtomicUsize::new(1));
                    calls.insert(
                        key.to_string(),
                        InFlight {
                            future: future.clone(),
                            callers: Arc::clone(&callers),
                        },
                    );
                    (future, callers)
                }
            }
        };

        let outcome = future.await;
        let shared = callers.load(Ordering::SeqCst) > 1;
        (outcome.map_err(|e| e.duplicate()), shared)
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
