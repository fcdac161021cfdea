//! The active schema for the current unit of work.
//!
//! The active schema lives in Tokio task-local storage, so concurrent requests
//! and jobs never observe each other's tenant. Code that is not running inside
//! a [`with_schema`] scope falls back to a thread-local slot, which is what
//! blocking code and the synchronous API use. On a runtime thread that slot
//! only holds values for the length of a synchronous scope
//! ([`with_schema_sync`], [`SchemaGuard`]); an unscoped [`activate`] there is
//! rejected.
//!
//! When nothing is active, [`current`] returns the `public` schema.
//!
//! # Example
//!
//! ```rust
//! use schemata_core::context::{current, with_schema};
//! use schemata_core::Schema;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let acme = Schema::parse("acme").unwrap();
//!
//! with_schema(acme.clone(), async {
//!     assert_eq!(current(), acme);
//! })
//! .await;
//!
//! assert!(current().is_public());
//! # }
//! ```
//!
//! Scopes are not inherited by `tokio::spawn`ed tasks; wrap the spawned future
//! in its own [`with_schema`] call.

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{TenancyError, TenancyResult};
use crate::schema::Schema;

tokio::task_local! {
    /// Task-local active schema.
    static ACTIVE_SCHEMA: RefCell<Schema>;
}

thread_local! {
    /// Thread-local active schema for code outside any task scope.
    static SYNC_SCHEMA: RefCell<Option<Schema>> = const { RefCell::new(None) };
}

/// Callback invoked with `(previous, next)` whenever the active schema changes.
pub type ActivationObserver = Arc<dyn Fn(&Schema, &Schema) + Send + Sync>;

/// Handle returned by [`on_activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

static OBSERVERS: LazyLock<RwLock<Vec<(ObserverId, ActivationObserver)>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Register a callback for activation changes.
///
/// Observers are a side channel for log correlation and metrics. They run
/// synchronously on the activating task and must not call back into this
/// registry.
pub fn on_activation<F>(observer: F) -> ObserverId
where
    F: Fn(&Schema, &Schema) + Send + Sync + 'static,
{
    let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
    OBSERVERS.write().push((id, Arc::new(observer)));
    id
}

/// Unregister an observer. Returns `false` if it was not registered.
pub fn remove_observer(id: ObserverId) -> bool {
    let mut observers = OBSERVERS.write();
    let before = observers.len();
    observers.retain(|(existing, _)| *existing != id);
    observers.len() != before
}

fn notify(previous: &Schema, next: &Schema) {
    if previous == next {
        return;
    }
    trace!(from = %previous, to = %next, "active schema changed");

    // Snapshot so callbacks run without the registry lock held.
    let observers: Vec<ActivationObserver> = OBSERVERS
        .read()
        .iter()
        .map(|(_, observer)| Arc::clone(observer))
        .collect();
    for observer in observers {
        observer(previous, next);
    }
}

/// The currently active schema, or `public` when none is active.
pub fn current() -> Schema {
    ACTIVE_SCHEMA
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .or_else(|| SYNC_SCHEMA.with(|slot| slot.borrow().clone()))
        .unwrap_or_default()
}

/// Whether the caller runs inside a [`with_schema`] scope.
#[inline]
pub fn is_scoped() -> bool {
    ACTIVE_SCHEMA.try_with(|_| ()).is_ok()
}

/// Replace the active schema for the rest of the current scope.
///
/// Inside a [`with_schema`] scope this changes the task-local value, which the
/// enclosing scope discards on exit. Outside any scope it sets the
/// thread-local value until [`deactivate`] is called, which is only allowed
/// off the async runtime: a runtime thread interleaves many tasks, so there
/// the call fails with [`TenancyError::Unscoped`].
pub fn activate(schema: Schema) -> TenancyResult<()> {
    let previous = swap(Some(schema.clone()), "activate")?;
    notify(&previous, &schema);
    Ok(())
}

/// Return to the `public` schema.
///
/// Fails like [`activate`] when called on a runtime thread outside a scope.
pub fn deactivate() -> TenancyResult<()> {
    let previous = swap(None, "deactivate")?;
    notify(&previous, &Schema::public());
    Ok(())
}

/// Whether the caller is on a thread driven by a Tokio runtime.
fn on_runtime() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

/// Store `schema` in whichever slot is in effect and return what it replaced.
fn swap(schema: Option<Schema>, op: &'static str) -> TenancyResult<Schema> {
    let in_task = ACTIVE_SCHEMA.try_with(|cell| {
        cell.replace(schema.clone().unwrap_or_default())
    });
    match in_task {
        Ok(previous) => Ok(previous),
        Err(_) if on_runtime() => Err(TenancyError::Unscoped(op)),
        Err(_) => Ok(SYNC_SCHEMA
            .with(|slot| slot.replace(schema))
            .unwrap_or_default()),
    }
}

/// Run `fut` with `schema` active.
///
/// The previous schema is visible again once the future completes, fails, or
/// is dropped before completion.
pub async fn with_schema<F>(schema: Schema, fut: F) -> F::Output
where
    F: Future,
{
    let previous = current();
    notify(&previous, &schema);
    let _restore = NotifyOnExit {
        leaving: schema.clone(),
        restoring: previous,
    };
    ACTIVE_SCHEMA.scope(RefCell::new(schema), fut).await
}

struct NotifyOnExit {
    leaving: Schema,
    restoring: Schema,
}

impl Drop for NotifyOnExit {
    fn drop(&mut self) {
        notify(&self.leaving, &self.restoring);
    }
}

/// Run a closure with `schema` active, restoring the previous schema afterwards
/// even if the closure panics.
pub fn with_schema_sync<F, R>(schema: Schema, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = SchemaGuard::activate(schema);
    f()
}

/// Guard that restores the previously active schema when dropped.
///
/// The guard is `!Send`, so a spawned task cannot hold it across an `.await`
/// and expose its thread-local value to other tasks on the same thread.
#[must_use = "the previous schema is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SchemaGuard {
    active: Schema,
    saved: Saved,
    _not_send: PhantomData<*const ()>,
}

#[derive(Debug)]
enum Saved {
    Task(Schema),
    Thread(Option<Schema>),
}

impl SchemaGuard {
    /// Activate `schema` until the guard is dropped.
    pub fn activate(schema: Schema) -> Self {
        let in_task = ACTIVE_SCHEMA.try_with(|cell| cell.replace(schema.clone()));
        let saved = match in_task {
            Ok(previous) => Saved::Task(previous),
            Err(_) => Saved::Thread(SYNC_SCHEMA.with(|slot| slot.replace(Some(schema.clone())))),
        };
        let previous = match &saved {
            Saved::Task(previous) => previous.clone(),
            Saved::Thread(previous) => previous.clone().unwrap_or_default(),
        };
        notify(&previous, &schema);
        Self {
            active: schema,
            saved,
            _not_send: PhantomData,
        }
    }

    /// The schema this guard activated.
    pub fn schema(&self) -> &Schema {
        &self.active
    }
}

impl Drop for SchemaGuard {
    fn drop(&mut self) {
        let restored = match &self.saved {
            Saved::Task(previous) => {
                // Outside the scope the task value is already gone.
                let _ = ACTIVE_SCHEMA.try_with(|cell| cell.replace(previous.clone()));
                previous.clone()
            }
            Saved::Thread(previous) => {
                SYNC_SCHEMA.with(|slot| slot.replace(previous.clone()));
                previous.clone().unwrap_or_default()
            }
        };
        notify(&self.active, &restored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaName;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::Duration;

    fn schema(name: &str) -> Schema {
        Schema::new(SchemaName::new(name).unwrap(), true)
    }

    #[tokio::test]
    async fn test_default_is_public() {
        assert!(current().is_public());
        assert!(!is_scoped());
    }

    #[tokio::test]
    async fn test_nested_scopes_restore() {
        let a = schema("ctx_a");
        let b = schema("ctx_b");

        with_schema(a.clone(), async {
            assert_eq!(current(), a);
            with_schema(b.clone(), async {
                assert_eq!(current(), b);
            })
            .await;
            assert_eq!(current(), a);
        })
        .await;

        assert!(current().is_public());
    }

    #[tokio::test]
    async fn test_restore_after_error() {
        let outer = schema("ctx_outer");
        let result: Result<(), &str> = with_schema(outer.clone(), async {
            with_schema(schema("ctx_failing"), async { Err("boom") }).await?;
            Ok(())
        })
        .await;

        assert_eq!(result, Err("boom"));
        assert!(current().is_public());
    }

    #[tokio::test]
    async fn test_activate_inside_scope_does_not_leak() {
        let outer = schema("ctx_scope");
        with_schema(outer.clone(), async {
            with_schema(schema("ctx_inner"), async {
                activate(schema("ctx_switched")).unwrap();
                assert_eq!(current().name().as_str(), "ctx_switched");
            })
            .await;
            assert_eq!(current(), outer);

            deactivate().unwrap();
            assert!(current().is_public());
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancelled_scope_restores() {
        let outer = schema("ctx_cancel_outer");
        with_schema(outer.clone(), async {
            let cancelled = tokio::time::timeout(
                Duration::from_millis(10),
                with_schema(schema("ctx_cancelled"), async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }),
            )
            .await;
            assert!(cancelled.is_err());
            assert_eq!(current(), outer);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scopes_are_isolated() {
        let mut handles = Vec::new();
        for i in 0..64 {
            handles.push(tokio::spawn(async move {
                let mine = schema(&format!("ctx_task_{i}"));
                with_schema(mine.clone(), async move {
                    for _ in 0..5 {
                        tokio::time::sleep(Duration::from_millis(1 + (i % 3) as u64)).await;
                        assert_eq!(current(), mine);
                    }
                })
                .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_sync_scope_restores_after_panic() {
        let outer = schema("ctx_sync_outer");
        activate(outer.clone()).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            with_schema_sync(schema("ctx_sync_inner"), || {
                assert_eq!(current().name().as_str(), "ctx_sync_inner");
                panic!("inner failure");
            })
        }));

        assert!(result.is_err());
        assert_eq!(current(), outer);
        deactivate().unwrap();
        assert!(current().is_public());
    }

    #[test]
    fn test_unscoped_activation_does_not_leak_between_tasks() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (activated_tx, activated_rx) = tokio::sync::oneshot::channel();
            let (checked_tx, checked_rx) = tokio::sync::oneshot::channel::<()>();

            let a = tokio::spawn(async move {
                let err = activate(schema("ctx_tenant_a")).unwrap_err();
                assert!(matches!(err, TenancyError::Unscoped("activate")));
                assert!(deactivate().is_err());
                activated_tx.send(()).unwrap();
                checked_rx.await.unwrap();
                assert!(current().is_public());
            });
            let b = tokio::spawn(async move {
                activated_rx.await.unwrap();
                let seen = current();
                checked_tx.send(()).unwrap();
                seen
            });

            a.await.unwrap();
            assert!(b.await.unwrap().is_public());
        });
    }

    #[test]
    fn test_activate_on_plain_thread() {
        std::thread::spawn(|| {
            activate(schema("ctx_plain_thread")).unwrap();
            assert_eq!(current().name().as_str(), "ctx_plain_thread");
            deactivate().unwrap();
            assert!(current().is_public());
        })
        .join()
        .unwrap();
    }

    #[tokio::test]
    async fn test_sync_scope_on_runtime_thread() {
        let seen = with_schema_sync(schema("ctx_sync_runtime"), current);
        assert_eq!(seen.name().as_str(), "ctx_sync_runtime");
        assert!(current().is_public());
    }

    #[tokio::test]
    async fn test_guard_inside_task_scope() {
        let outer = schema("ctx_guard_outer");
        with_schema(outer.clone(), async {
            {
                let guard = SchemaGuard::activate(schema("ctx_guarded"));
                assert_eq!(current(), *guard.schema());
            }
            assert_eq!(current(), outer);
        })
        .await;
    }

    #[tokio::test]
    async fn test_observers_see_changes() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = on_activation(move |from, to| {
            if to.name().as_str().starts_with("ctx_observed") {
                sink.lock().push((from.to_string(), to.to_string()));
            }
        });

        with_schema(schema("ctx_observed"), async {}).await;
        assert!(remove_observer(id));
        assert!(!remove_observer(id));
        with_schema(schema("ctx_observed_late"), async {}).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("public".to_string(), "ctx_observed".to_string()));
    }
}
