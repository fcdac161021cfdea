//! Running one command against many schemas.
//!
//! [`CommandExecutor`] activates each schema in turn and runs a
//! [`SchemaCommand`] inside that scope. Sequential mode reuses a single session;
//! parallel mode starts a bounded number of workers, each with its own session,
//! pulling schemas from a shared queue. Every per-schema outcome is reported,
//! failures included.
//!
//! # Example
//!
//! ```rust,ignore
//! use schemata_core::executor::{CommandExecutor, ExecutionMode, command_fn};
//!
//! let command = Arc::new(command_fn("migrate", |schema| async move {
//!     runner.apply(schema.name()).await
//! }));
//! let report = CommandExecutor::default()
//!     .run(schemas, command, ExecutionMode::Parallel { max_workers: 4 })
//!     .await?;
//! assert!(report.is_success());
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::with_schema;
use crate::error::{TenancyError, TenancyResult};
use crate::schema::Schema;

/// How schemas are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One session, one schema at a time, in order.
    Sequential {
        /// Stop at the first failure and report the rest as skipped.
        abort_on_failure: bool,
    },
    /// Up to `max_workers` sessions working concurrently.
    Parallel {
        /// Worker pool size.
        max_workers: usize,
    },
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default worker pool size for parallel mode.
    pub max_workers: usize,
    /// Per-schema time limit in seconds.
    pub operation_timeout_secs: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
            operation_timeout_secs: None,
        }
    }
}

impl ExecutorConfig {
    /// Set the worker pool size.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Set the per-schema time limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// The per-schema time limit.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

/// A unit of work run once per schema.
#[async_trait]
pub trait SchemaCommand: Send + Sync + 'static {
    /// Per-worker state, typically a database connection.
    type Session: Send + 'static;

    /// Open a session. Called once in sequential mode, once per worker in
    /// parallel mode.
    async fn open_session(&self) -> TenancyResult<Self::Session>;

    /// Run against `schema`, which is active for the duration of the call.
    async fn run(&self, session: &mut Self::Session, schema: &Schema) -> TenancyResult<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "command"
    }
}

/// A [`SchemaCommand`] built from an async closure, without session state.
pub struct FnCommand<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a [`SchemaCommand`].
pub fn command_fn<F, Fut>(name: impl Into<String>, f: F) -> FnCommand<F>
where
    F: Fn(Schema) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TenancyResult<()>> + Send + 'static,
{
    FnCommand {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> SchemaCommand for FnCommand<F>
where
    F: Fn(Schema) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TenancyResult<()>> + Send + 'static,
{
    type Session = ();

    async fn open_session(&self) -> TenancyResult<()> {
        Ok(())
    }

    async fn run(&self, _session: &mut (), schema: &Schema) -> TenancyResult<()> {
        (self.f)(schema.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Result of running the command against one schema.
#[derive(Debug)]
pub struct SchemaOutcome {
    /// Position in the input.
    pub index: usize,
    /// The schema.
    pub schema: Schema,
    /// What the command returned.
    pub result: TenancyResult<()>,
    /// Wall-clock time spent.
    pub duration: Duration,
}

impl SchemaOutcome {
    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate result of a run.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// One entry per processed schema, in input order.
    pub outcomes: Vec<SchemaOutcome>,
    /// Schemas never started, in input order.
    pub skipped: Vec<Schema>,
    /// Whether the run stopped early.
    pub aborted: bool,
    /// Parallel workers that failed before running any schema, e.g. because
    /// their session could not be opened. Their share of the queue was taken
    /// over by the remaining workers.
    pub worker_errors: Vec<TenancyError>,
    /// Total wall-clock time.
    pub duration: Duration,
}

impl ExecutionReport {
    /// Successful outcomes.
    pub fn succeeded(&self) -> impl Iterator<Item = &SchemaOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Failed outcomes.
    pub fn failed(&self) -> impl Iterator<Item = &SchemaOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Whether every schema was processed and succeeded.
    pub fn is_success(&self) -> bool {
        !self.aborted
            && self.skipped.is_empty()
            && self.worker_errors.is_empty()
            && self.outcomes.iter().all(SchemaOutcome::is_success)
    }
}

/// Receives progress notifications, e.g. for CLI output.
pub trait ProgressObserver: Send + Sync {
    /// A schema is about to run.
    fn on_start(&self, _index: usize, _total: usize, _schema: &Schema) {}

    /// A schema finished.
    fn on_finish(&self, _outcome: &SchemaOutcome) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Runs commands across schemas.
#[derive(Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
    observer: Arc<dyn ProgressObserver>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    /// Create an executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report progress to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Parallel mode with the configured pool size.
    pub fn parallel_mode(&self) -> ExecutionMode {
        ExecutionMode::Parallel {
            max_workers: self.config.max_workers,
        }
    }

    /// Run `command` against every schema.
    ///
    /// Per-schema failures are recorded in the report. An error is returned
    /// only when no session could be opened at all.
    pub async fn run<C, I>(
        &self,
        schemas: I,
        command: Arc<C>,
        mode: ExecutionMode,
    ) -> TenancyResult<ExecutionReport>
    where
        C: SchemaCommand,
        I: IntoIterator<Item = Schema>,
    {
        let schemas: Vec<Schema> = schemas.into_iter().collect();
        let started = Instant::now();
        info!(command = command.name(), schemas = schemas.len(), ?mode, "running command");

        let mut report = match mode {
            ExecutionMode::Sequential { abort_on_failure } => {
                self.run_sequential(schemas, command.as_ref(), abort_on_failure).await?
            }
            ExecutionMode::Parallel { max_workers } => {
                self.run_parallel(schemas, command, max_workers).await?
            }
        };
        report.duration = started.elapsed();

        let failed = report.failed().count();
        if !report.is_success() {
            warn!(
                failed,
                skipped = report.skipped.len(),
                worker_errors = report.worker_errors.len(),
                "command finished with failures"
            );
        } else {
            info!(
                succeeded = report.outcomes.len(),
                duration_ms = report.duration.as_millis() as u64,
                "command finished"
            );
        }
        Ok(report)
    }

    async fn run_sequential<C: SchemaCommand>(
        &self,
        schemas: Vec<Schema>,
        command: &C,
        abort_on_failure: bool,
    ) -> TenancyResult<ExecutionReport> {
        let mut report = ExecutionReport::default();
        if schemas.is_empty() {
            return Ok(report);
        }

        let total = schemas.len();
        let timeout = self.config.operation_timeout();
        let mut session = command.open_session().await?;

        for (index, schema) in schemas.into_iter().enumerate() {
            if report.aborted {
                report.skipped.push(schema);
                continue;
            }
            self.observer.on_start(index, total, &schema);
            let outcome = run_one(command, &mut session, index, schema, timeout).await;
            self.observer.on_finish(&outcome);
            if abort_on_failure && !outcome.is_success() {
                report.aborted = true;
            }
            report.outcomes.push(outcome);
        }
        Ok(report)
    }

    async fn run_parallel<C: SchemaCommand>(
        &self,
        schemas: Vec<Schema>,
        command: Arc<C>,
        max_workers: usize,
    ) -> TenancyResult<ExecutionReport> {
        let mut report = ExecutionReport::default();
        let total = schemas.len();
        if total == 0 {
            return Ok(report);
        }

        let workers = max_workers.clamp(1, total);
        let timeout = self.config.operation_timeout();
        let queue = Arc::new(Mutex::new(schemas.into_iter().enumerate()));
        let mut set = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let command = Arc::clone(&command);
            let observer = Arc::clone(&self.observer);
            set.spawn(async move {
                let mut session = command.open_session().await?;
                let mut outcomes = Vec::new();
                loop {
                    let next = queue.lock().next();
                    let Some((index, schema)) = next else {
                        break;
                    };
                    observer.on_start(index, total, &schema);
                    let outcome =
                        run_one(command.as_ref(), &mut session, index, schema, timeout).await;
                    observer.on_finish(&outcome);
                    outcomes.push(outcome);
                }
                debug!(worker, processed = outcomes.len(), "worker finished");
                Ok::<_, TenancyError>(outcomes)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcomes)) => report.outcomes.extend(outcomes),
                Ok(Err(err)) => {
                    error!(error = %err, "worker could not open a session");
                    report.worker_errors.push(err);
                }
                Err(join_err) => {
                    error!(error = %join_err, "worker panicked");
                    report
                        .worker_errors
                        .push(TenancyError::internal(join_err.to_string()));
                }
            }
        }

        // Left over only when workers died before draining the queue.
        report.skipped = queue.lock().by_ref().map(|(_, schema)| schema).collect();
        if report.outcomes.is_empty() && !report.worker_errors.is_empty() {
            return Err(report.worker_errors.swap_remove(0));
        }
        report.aborted = !report.skipped.is_empty();
        report.outcomes.sort_by_key(|o| o.index);
        Ok(report)
    }
}

async fn run_one<C: SchemaCommand>(
    command: &C,
    session: &mut C::Session,
    index: usize,
    schema: Schema,
    timeout: Option<Duration>,
) -> SchemaOutcome {
    let started = Instant::now();
    let guarded = AssertUnwindSafe(with_schema(schema.clone(), command.run(session, &schema)))
        .catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(finished) => flatten_panic(finished),
            Err(_) => Err(TenancyError::Timeout {
                schema: schema.to_string(),
                duration_ms: limit.as_millis() as u64,
            }),
        },
        None => flatten_panic(guarded.await),
    };

    match &result {
        Ok(()) => debug!(schema = %schema, "schema succeeded"),
        Err(err) => error!(schema = %schema, error = %err, "schema failed"),
    }
    SchemaOutcome {
        index,
        schema,
        result,
        duration: started.elapsed(),
    }
}

fn flatten_panic(
    result: Result<TenancyResult<()>, Box<dyn std::any::Any + Send>>,
) -> TenancyResult<()> {
    result.unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(TenancyError::internal(format!("command panicked: {message}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::current;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schemas(n: usize) -> Vec<Schema> {
        (0..n).map(|i| Schema::parse(&format!("s{i}")).unwrap()).collect()
    }

    /// Fails on `s4`, checks the active schema, counts sessions.
    struct FailOnFour {
        sessions: AtomicUsize,
    }

    #[async_trait]
    impl SchemaCommand for FailOnFour {
        type Session = usize;

        async fn open_session(&self) -> TenancyResult<usize> {
            Ok(self.sessions.fetch_add(1, Ordering::SeqCst))
        }

        async fn run(&self, _session: &mut usize, schema: &Schema) -> TenancyResult<()> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(&current(), schema);
            if schema.name().as_str() == "s4" {
                Err(TenancyError::database("relation does not exist"))
            } else {
                Ok(())
            }
        }
    }

    fn fail_on_four() -> Arc<FailOnFour> {
        Arc::new(FailOnFour {
            sessions: AtomicUsize::new(0),
        })
    }

    const SEQUENTIAL: ExecutionMode = ExecutionMode::Sequential {
        abort_on_failure: false,
    };

    fn failed_names(report: &ExecutionReport) -> Vec<String> {
        report.failed().map(|o| o.schema.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_reports_every_outcome() {
        let command = fail_on_four();
        let report = CommandExecutor::default()
            .run(schemas(10), command.clone(), ExecutionMode::Parallel { max_workers: 3 })
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.succeeded().count(), 9);
        assert_eq!(failed_names(&report), vec!["s4"]);
        assert!(!report.is_success());
        assert!(!report.aborted);
        let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        assert_eq!(command.sessions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sequential_continue_on_failure() {
        let command = fail_on_four();
        let report = CommandExecutor::default()
            .run(schemas(10), command.clone(), SEQUENTIAL)
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(failed_names(&report), vec!["s4"]);
        assert!(report.skipped.is_empty());
        assert_eq!(command.sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_abort_on_failure() {
        let report = CommandExecutor::default()
            .run(schemas(10), fail_on_four(), ExecutionMode::Sequential { abort_on_failure: true })
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(failed_names(&report), vec!["s4"]);
        assert!(report.aborted);
        let skipped: Vec<String> = report.skipped.iter().map(ToString::to_string).collect();
        assert_eq!(skipped, vec!["s5", "s6", "s7", "s8", "s9"]);
    }

    #[tokio::test]
    async fn test_context_restored_after_run() {
        let outer = Schema::parse("outer").unwrap();
        with_schema(outer.clone(), async {
            CommandExecutor::default()
                .run(schemas(3), fail_on_four(), SEQUENTIAL)
                .await
                .unwrap();
            assert_eq!(current(), outer);
        })
        .await;
    }

    #[tokio::test]
    async fn test_timeout_and_panic_are_captured() {
        let command = Arc::new(command_fn("flaky", |schema: Schema| async move {
            match schema.name().as_str() {
                "s0" => tokio::time::sleep(Duration::from_secs(5)).await,
                "s1" => panic!("boom"),
                _ => {}
            }
            Ok(())
        }));
        let executor =
            CommandExecutor::new(ExecutorConfig::default().with_timeout(Duration::from_secs(1)));
        tokio::time::pause();
        let report = executor
            .run(schemas(3), command, ExecutionMode::Parallel { max_workers: 3 })
            .await
            .unwrap();

        assert!(matches!(report.outcomes[0].result, Err(TenancyError::Timeout { .. })));
        match &report.outcomes[1].result {
            Err(TenancyError::Internal(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(report.outcomes[2].is_success());
    }

    struct NoSession;

    #[async_trait]
    impl SchemaCommand for NoSession {
        type Session = ();

        async fn open_session(&self) -> TenancyResult<()> {
            Err(TenancyError::database("pool exhausted"))
        }

        async fn run(&self, _: &mut (), _: &Schema) -> TenancyResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_session_failure_is_an_error() {
        let executor = CommandExecutor::default();
        let parallel = executor
            .run(schemas(4), Arc::new(NoSession), ExecutionMode::Parallel { max_workers: 2 })
            .await;
        assert!(parallel.is_err());

        let sequential = executor
            .run(schemas(4), Arc::new(NoSession), SEQUENTIAL)
            .await;
        assert!(sequential.is_err());

        let empty = executor
            .run(Vec::new(), Arc::new(NoSession), SEQUENTIAL)
            .await
            .unwrap();
        assert!(empty.is_success());
    }

    /// Only the first session fails to open.
    struct FirstSessionFails {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl SchemaCommand for FirstSessionFails {
        type Session = ();

        async fn open_session(&self) -> TenancyResult<()> {
            if self.opened.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TenancyError::database("too many connections"))
            } else {
                Ok(())
            }
        }

        async fn run(&self, _: &mut (), _: &Schema) -> TenancyResult<()> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partial_session_failure_is_reported() {
        let report = CommandExecutor::default()
            .run(
                schemas(6),
                Arc::new(FirstSessionFails {
                    opened: AtomicUsize::new(0),
                }),
                ExecutionMode::Parallel { max_workers: 3 },
            )
            .await
            .unwrap();

        // The other workers drain the queue, but the run is not a success.
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.succeeded().count(), 6);
        assert!(report.skipped.is_empty());
        assert_eq!(report.worker_errors.len(), 1);
        assert!(report.worker_errors[0].is_retryable());
        assert!(!report.is_success());
    }

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ProgressObserver for Counting {
        fn on_start(&self, _index: usize, total: usize, _schema: &Schema) {
            assert_eq!(total, 6);
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finish(&self, _outcome: &SchemaOutcome) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_observer_sees_every_schema() {
        let observer = Arc::new(Counting::default());
        CommandExecutor::default()
            .with_observer(observer.clone())
            .run(schemas(6), fail_on_four(), ExecutionMode::Parallel { max_workers: 2 })
            .await
            .unwrap();
        assert_eq!(observer.started.load(Ordering::SeqCst), 6);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 6);
    }
}
