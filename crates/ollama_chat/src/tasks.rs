use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::warn;

struct AnonymousTask {
    abort: AbortHandle,
    join: JoinHandle<()>,
}

/// Registry of named and anonymous background tasks.
///
/// Named tasks are keyed by a unique name. Registering a name again replaces
/// the entry without cancelling the earlier task; the previous handle is returned
/// so the caller can reconcile it. Anonymous tasks remove themselves on
/// completion and log panics or `Err` outputs instead of dropping them silently.
#[derive(Default)]
pub struct TaskManager {
    named: Mutex<HashMap<String, JoinHandle<()>>>,
    anonymous: Arc<Mutex<HashMap<u64, AnonymousTask>>>,
    next_id: AtomicU64,
}

impl TaskManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` on the current runtime and tracks it.
    pub fn spawn<F, E>(&self, name: Option<&str>, future: F) -> AbortHandle
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if let Some(name) = name {
            let handle = tokio::spawn(report_outcome(name.to_string(), future));
            let abort = handle.abort_handle();
            drop(self.add(handle, Some(name)));
            return abort;
        }

        let mut anonymous = lock_unpoisoned(&self.anonymous);
        anonymous.retain(|_, task| !task.join.is_finished());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.anonymous);
        let join = tokio::spawn(async move {
            report_outcome(format!("anonymous-{id}"), future).await;
            lock_unpoisoned(&registry).remove(&id);
        });
        let abort = join.abort_handle();
        anonymous.insert(
            id,
            AnonymousTask {
                abort: join.abort_handle(),
                join,
            },
        );
        abort
    }

    /// Tracks an already spawned task. Returns the handle previously registered
    /// under the same name, which keeps running.
    pub fn add(&self, handle: JoinHandle<()>, name: Option<&str>) -> Option<JoinHandle<()>> {
        if let Some(name) = name {
            return lock_unpoisoned(&self.named).insert(name.to_string(), handle);
        }

        let mut anonymous = lock_unpoisoned(&self.anonymous);
        anonymous.retain(|_, task| !task.join.is_finished());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.anonymous);
        let abort = handle.abort_handle();
        let join = tokio::spawn(async move {
            if let Err(error) = handle.await {
                log_join_error(&format!("anonymous-{id}"), &error);
            }
            lock_unpoisoned(&registry).remove(&id);
        });
        anonymous.insert(id, AnonymousTask { abort, join });
        None
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<AbortHandle> {
        lock_unpoisoned(&self.named)
            .get(name)
            .map(JoinHandle::abort_handle)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        lock_unpoisoned(&self.named).contains_key(name)
    }

    /// Cancels a named task and waits until it has stopped.
    pub async fn cancel(&self, name: &str) {
        let handle = lock_unpoisoned(&self.named).remove(name);
        let Some(handle) = handle else {
            return;
        };
        handle.abort();
        if let Err(error) = handle.await {
            log_join_error(name, &error);
        }
    }

    /// Cancels every tracked task and waits for all of them before returning.
    pub async fn cancel_all(&self) {
        let named: Vec<(String, JoinHandle<()>)> = lock_unpoisoned(&self.named).drain().collect();
        let anonymous: Vec<(u64, AnonymousTask)> =
            lock_unpoisoned(&self.anonymous).drain().collect();

        for (_, handle) in &named {
            handle.abort();
        }
        for (_, task) in &anonymous {
            task.abort.abort();
        }

        for (name, handle) in named {
            if let Err(error) = handle.await {
                log_join_error(&name, &error);
            }
        }
        for (id, task) in anonymous {
            if let Err(error) = task.join.await {
                log_join_error(&format!("anonymous-{id}"), &error);
            }
        }
    }

    /// Waits for every tracked task without cancelling it. Awaited tasks are no
    /// longer tracked afterwards.
    pub async fn await_all(&self) {
        let named: Vec<(String, JoinHandle<()>)> = lock_unpoisoned(&self.named).drain().collect();
        let anonymous: Vec<(u64, AnonymousTask)> =
            lock_unpoisoned(&self.anonymous).drain().collect();

        for (name, handle) in named {
            if let Err(error) = handle.await {
                log_join_error(&name, &error);
            }
        }
        for (id, task) in anonymous {
            if let Err(error) = task.join.await {
                log_join_error(&format!("anonymous-{id}"), &error);
            }
        }
    }

    /// Stops tracking a named task without cancelling it.
    pub fn discard(&self, name: &str) -> Option<JoinHandle<()>> {
        lock_unpoisoned(&self.named).remove(name)
    }

    /// Number of tracked tasks that have not finished yet.
    #[must_use]
    pub fn len(&self) -> usize {
        let named = lock_unpoisoned(&self.named)
            .values()
            .filter(|handle| !handle.is_finished())
            .count();
        let mut anonymous = lock_unpoisoned(&self.anonymous);
        anonymous.retain(|_, task| !task.join.is_finished());
        named + anonymous.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn report_outcome<F, E>(label: String, future: F)
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(
            event = "task.failed",
            task = %label,
            error = %error,
            "background task returned an error"
        ),
        Err(_) => warn!(event = "task.panicked", task = %label, "background task panicked"),
    }
}

fn log_join_error(label: &str, error: &JoinError) {
    if error.is_panic() {
        warn!(event = "task.panicked", task = %label, "background task panicked");
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
