//! Coalesces concurrent requests for the same key into a single execution.
//!
//! If a key is missing in a cache, many clients will most probably request it at the same time.
//! Loading it once per request would put a needless (and potentially massive) load onto the
//! underlying data source or onto a remote peer. A [RequestCoalescer] therefore only permits a
//! single in-flight execution per key. All other callers wait for this execution to complete and
//! then receive a clone of its result, no matter if this is a value or an error.
//!
//! Note that this is not a cache. Once an execution completes, its key is forgotten, so that the
//! next caller will trigger a fresh execution.
//!
//! # Examples
//!
//! ```
//! # use saturn::flight::RequestCoalescer;
//! # #[tokio::main]
//! # async fn main() {
//! let coalescer = RequestCoalescer::new();
//!
//! let (first, second) = tokio::join!(
//!     coalescer.execute("Tom", || async {
//!         tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!         "630".to_owned()
//!     }),
//!     coalescer.execute("Tom", || async { unreachable!("The first call is still in flight") }),
//! );
//!
//! assert_eq!(first.unwrap(), "630");
//! assert_eq!(second.unwrap(), "630");
//! # }
//! ```
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Signals that the execution a caller was waiting for never completed.
///
/// This happens if the task which performed the execution panicked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Abandoned {
    key: String,
}

impl Abandoned {
    /// Returns the key of the abandoned execution.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Display for Abandoned {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "The in-flight call for '{}' was abandoned", self.key)
    }
}

impl Error for Abandoned {}

/// Deduplicates concurrent executions per key.
///
/// The internal lock only guards the map of in-flight keys. The actual work is always executed
/// outside of it, therefore a slow execution for one key never blocks callers of another key.
///
/// Each execution runs in its own task. If the caller which started it goes away (e.g. as its
/// request timed out), the execution still completes and all other callers receive its result.
pub struct RequestCoalescer<T> {
    calls: Calls<T>,
}

type Calls<T> = Arc<Mutex<HashMap<String, watch::Receiver<Option<T>>>>>;

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

/// Removes the in-flight record of a key once its execution is done.
///
/// As this also runs if the execution panics, waiting callers are never left behind.
struct InFlight<T> {
    calls: Calls<T>,
    key: String,
}

impl<T> Drop for InFlight<T> {
    fn drop(&mut self) {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = calls.remove(&self.key);
    }
}

impl<T: Clone + Send + Sync + 'static> RequestCoalescer<T> {
    /// Creates a new coalescer without any in-flight calls.
    pub fn new() -> Self {
        RequestCoalescer {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Executes the given work for the given key unless an execution is already in flight.
    ///
    /// If another caller is already executing the work for this key, we wait until it completes
    /// and return a clone of its result. Otherwise, the future created by **work** is spawned as
    /// a separate task and its result is shared with all callers which arrived in the meantime.
    ///
    /// Returns an [Abandoned] error if the execution panicked.
    pub async fn execute<F, Fut>(&self, key: &str, work: F) -> Result<T, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let role = {
            let mut calls = self.calls.lock().unwrap();
            if let Some(receiver) = calls.get(key) {
                Role::Follower(receiver.clone())
            } else {
                let (sender, receiver) = watch::channel(None);
                let _ = calls.insert(key.to_owned(), receiver);
                Role::Leader(sender)
            }
        };

        match role {
            Role::Follower(receiver) => Self::await_result(key, receiver).await,
            Role::Leader(sender) => {
                let in_flight = InFlight {
                    calls: self.calls.clone(),
                    key: key.to_owned(),
                };
                let work = work();
                let execution = tokio::spawn(async move {
                    let result = work.await;

                    // Forget the key before publishing, so that later callers start over...
                    drop(in_flight);
                    let _ = sender.send(Some(result.clone()));

                    result
                });

                execution.await.map_err(|_| Abandoned {
                    key: key.to_owned(),
                })
            }
        }
    }

    async fn await_result(
        key: &str,
        mut receiver: watch::Receiver<Option<T>>,
    ) -> Result<T, Abandoned> {
        let result = match receiver.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        };

        result.ok_or_else(|| Abandoned {
            key: key.to_owned(),
        })
    }

    /// Returns the number of keys which are currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for RequestCoalescer<T> {
    fn default() -> Self {
        RequestCoalescer::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::flight::RequestCoalescer;
    use crate::testing::test_async;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[test]
    fn concurrent_calls_are_executed_once() {
        test_async(async {
            let coalescer = RequestCoalescer::new();
            let invocations = Arc::new(AtomicUsize::new(0));

            let results = join_all((0..10).map(|_| {
                let invocations = invocations.clone();
                coalescer.execute("Tom", || async move {
                    let _ = invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    "630".to_owned()
                })
            }))
            .await;

            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            assert_eq!(results.len(), 10);
            for result in results {
                assert_eq!(result.unwrap(), "630");
            }
            assert_eq!(coalescer.in_flight(), 0);

            // Once completed, the next call performs the work again...
            let counter = invocations.clone();
            let result = coalescer
                .execute("Tom", || async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    "631".to_owned()
                })
                .await;
            assert_eq!(result.unwrap(), "631");
            assert_eq!(invocations.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn errors_are_shared_as_well() {
        test_async(async {
            let coalescer: RequestCoalescer<Result<String, String>> = RequestCoalescer::new();
            let invocations = Arc::new(AtomicUsize::new(0));

            let results = join_all((0..5).map(|_| {
                let invocations = invocations.clone();
                coalescer.execute("Unknown", || async move {
                    let _ = invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err("Unknown not exist".to_owned())
                })
            }))
            .await;

            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            for result in results {
                assert_eq!(result.unwrap(), Err("Unknown not exist".to_owned()));
            }
        });
    }

    #[test]
    fn distinct_keys_do_not_block_each_other() {
        test_async(async {
            let coalescer = RequestCoalescer::new();
            let a_started = Arc::new(Notify::new());
            let a_notifier = a_started.clone();

            // "B" can only complete once "A" is running and vice versa - this would dead-lock
            // if both keys were serialized...
            let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
                tokio::join!(
                    coalescer.execute("A", || async move {
                        a_notifier.notify_one();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        1
                    }),
                    coalescer.execute("B", || async move {
                        a_started.notified().await;
                        2
                    }),
                )
            })
            .await
            .unwrap();

            assert_eq!(a.unwrap(), 1);
            assert_eq!(b.unwrap(), 2);
        });
    }

    #[test]
    fn executions_complete_even_if_the_leader_is_cancelled() {
        test_async(async {
            let coalescer = RequestCoalescer::new();
            let invocations = Arc::new(AtomicUsize::new(0));
            let counter = invocations.clone();

            let (leader, follower) = tokio::join!(
                tokio::time::timeout(
                    Duration::from_millis(50),
                    coalescer.execute("Tom", || async move {
                        let _ = counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        "630".to_owned()
                    })
                ),
                coalescer.execute("Tom", || async { "unexpected".to_owned() }),
            );

            assert_eq!(leader.is_err(), true);
            assert_eq!(follower.unwrap(), "630");
            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            assert_eq!(coalescer.in_flight(), 0);
        });
    }

    #[test]
    fn waiting_callers_are_released_if_the_execution_panics() {
        test_async(async {
            let coalescer: RequestCoalescer<String> = RequestCoalescer::new();

            let (leader, follower) = tokio::join!(
                coalescer.execute("Tom", || async {
                    let broken = true;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if broken {
                        panic!("The database went away");
                    }
                    "never".to_owned()
                }),
                coalescer.execute("Tom", || async { "unexpected".to_owned() }),
            );

            assert_eq!(leader.unwrap_err().key(), "Tom");
            assert_eq!(follower.unwrap_err().key(), "Tom");
            assert_eq!(coalescer.in_flight(), 0);
        });
    }
}
