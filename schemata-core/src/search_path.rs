//! Search-path computation and per-connection binding.
//!
//! A connection remembers the last search path it applied. [`SearchPathBinder`]
//! only issues `SET search_path` when the computed path differs from that
//! value, and forgets it whenever the connection is rolled back, closed, or the
//! apply itself fails, since the server may have reverted the session setting.
//!
//! Binding is lazy: connection wrappers call [`SearchPathBinder::bind_current`]
//! right before executing a statement, never on activation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context;
use crate::error::TenancyResult;
use crate::schema::{Schema, SchemaName};

/// Search-path settings shared by every connection of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPathConfig {
    /// Namespaces appended after `public` for tenant schemas.
    #[serde(default)]
    pub extra_paths: Vec<SchemaName>,
    /// Apply the path before every statement, even when unchanged.
    #[serde(default)]
    pub always_apply: bool,
}

impl SearchPathConfig {
    /// Create a config with no extra paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extra namespace.
    pub fn with_extra_path(mut self, path: SchemaName) -> Self {
        self.extra_paths.push(path);
        self
    }

    /// Force an apply before every statement.
    pub fn with_always_apply(mut self, always: bool) -> Self {
        self.always_apply = always;
        self
    }
}

/// Compute the search path for a schema.
///
/// `"public"` for the default tenant, otherwise `"<tenant>", "public", <extra...>`
/// with duplicates removed. Every element is a [`SchemaName`] and is quoted,
/// so mixed-case names bind to the namespace `CREATE SCHEMA` created.
pub fn compute_search_path(schema: &Schema, config: &SearchPathConfig) -> String {
    let public = SchemaName::public();
    if schema.is_public() {
        return public.quoted();
    }

    let mut parts: Vec<&SchemaName> = Vec::with_capacity(2 + config.extra_paths.len());
    parts.push(schema.name());
    parts.push(&public);
    for extra in &config.extra_paths {
        if !parts.contains(&extra) {
            parts.push(extra);
        }
    }
    parts
        .iter()
        .map(|name| name.quoted())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The statement that applies a computed search path.
pub fn set_search_path_sql(search_path: &str) -> String {
    format!("SET search_path TO {search_path}")
}

/// A live connection the binder can apply a search path to.
#[async_trait]
pub trait SearchPathTarget: Send {
    /// Execute `SET search_path` with the given computed path.
    async fn apply_search_path(&mut self, search_path: &str) -> TenancyResult<()>;
}

/// Per-connection binding state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingState {
    last_applied: Option<String>,
}

impl BindingState {
    /// Fresh state with nothing applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last path applied on this connection, if still trusted.
    pub fn last_applied(&self) -> Option<&str> {
        self.last_applied.as_deref()
    }

    /// The connection was closed.
    pub fn on_close(&mut self) {
        self.invalidate();
    }

    /// A transaction on the connection was rolled back.
    pub fn on_rollback(&mut self) {
        self.invalidate();
    }

    /// Forget the recorded path so the next bind re-applies it.
    pub fn invalidate(&mut self) {
        self.last_applied = None;
    }
}

/// Applies search paths to connections, skipping redundant round trips.
#[derive(Debug, Clone, Default)]
pub struct SearchPathBinder {
    config: SearchPathConfig,
}

impl SearchPathBinder {
    /// Create a binder.
    pub fn new(config: SearchPathConfig) -> Self {
        Self { config }
    }

    /// The binder configuration.
    pub fn config(&self) -> &SearchPathConfig {
        &self.config
    }

    /// Compute the path for `schema` under this binder's configuration.
    pub fn search_path(&self, schema: &Schema) -> String {
        compute_search_path(schema, &self.config)
    }

    /// Bind `schema` on `target`. Returns whether a statement was issued.
    ///
    /// On failure the recorded value is cleared and the error is returned.
    pub async fn bind<T>(
        &self,
        state: &mut BindingState,
        target: &mut T,
        schema: &Schema,
    ) -> TenancyResult<bool>
    where
        T: SearchPathTarget + ?Sized,
    {
        let path = self.search_path(schema);
        if !self.config.always_apply && state.last_applied.as_deref() == Some(path.as_str()) {
            return Ok(false);
        }

        // Clear first so a cancelled apply never leaves a stale value behind.
        state.invalidate();
        match target.apply_search_path(&path).await {
            Ok(()) => {
                debug!(schema = %schema, search_path = %path, "applied search path");
                state.last_applied = Some(path);
                Ok(true)
            }
            Err(err) => {
                warn!(schema = %schema, search_path = %path, error = %err, "failed to apply search path");
                Err(err)
            }
        }
    }

    /// Bind whatever schema is active in the current context.
    pub async fn bind_current<T>(&self, state: &mut BindingState, target: &mut T) -> TenancyResult<bool>
    where
        T: SearchPathTarget + ?Sized,
    {
        let schema = context::current();
        self.bind(state, target, &schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenancyError;
    use crate::testing::RecordingTarget;

    fn schema(name: &str) -> Schema {
        Schema::parse(name).unwrap()
    }

    #[test]
    fn test_compute_search_path() {
        let config = SearchPathConfig::new();
        assert_eq!(compute_search_path(&Schema::public(), &config), r#""public""#);
        assert_eq!(
            compute_search_path(&schema("acme"), &config),
            r#""acme", "public""#
        );

        let config = config.with_extra_path(SchemaName::new("shared").unwrap());
        assert_eq!(
            compute_search_path(&schema("acme"), &config),
            r#""acme", "public", "shared""#
        );
        assert_eq!(compute_search_path(&Schema::public(), &config), r#""public""#);
    }

    #[test]
    fn test_compute_search_path_dedupes() {
        let config = SearchPathConfig::new()
            .with_extra_path(SchemaName::public())
            .with_extra_path(SchemaName::new("shared").unwrap())
            .with_extra_path(SchemaName::new("shared").unwrap());
        assert_eq!(
            compute_search_path(&schema("acme"), &config),
            r#""acme", "public", "shared""#
        );
    }

    #[test]
    fn test_compute_search_path_keeps_case() {
        let config = SearchPathConfig::new().with_extra_path(SchemaName::new("Shared").unwrap());
        let path = compute_search_path(&schema("Acme"), &config);
        assert_eq!(path, r#""Acme", "public", "Shared""#);
        assert_eq!(
            set_search_path_sql(&path),
            r#"SET search_path TO "Acme", "public", "Shared""#
        );

        // Differently cased tenants never share a binding.
        assert_ne!(path, compute_search_path(&schema("acme"), &config));
    }

    #[test]
    fn test_set_search_path_sql() {
        assert_eq!(
            set_search_path_sql(r#""acme", "public""#),
            r#"SET search_path TO "acme", "public""#
        );
    }

    #[tokio::test]
    async fn test_bind_skips_unchanged_path() {
        let binder = SearchPathBinder::default();
        let mut state = BindingState::new();
        let mut target = RecordingTarget::new();

        assert!(binder.bind(&mut state, &mut target, &schema("acme")).await.unwrap());
        assert!(!binder.bind(&mut state, &mut target, &schema("acme")).await.unwrap());
        assert_eq!(target.applied(), vec![r#""acme", "public""#.to_string()]);
        assert_eq!(state.last_applied(), Some(r#""acme", "public""#));
    }

    #[tokio::test]
    async fn test_bind_reapplies_after_rollback_and_close() {
        let binder = SearchPathBinder::default();
        let mut state = BindingState::new();
        let mut target = RecordingTarget::new();
        let acme = schema("acme");

        binder.bind(&mut state, &mut target, &acme).await.unwrap();
        state.on_rollback();
        assert!(binder.bind(&mut state, &mut target, &acme).await.unwrap());
        state.on_close();
        assert!(binder.bind(&mut state, &mut target, &acme).await.unwrap());
        assert_eq!(target.applied().len(), 3);
    }

    #[tokio::test]
    async fn test_bind_distinguishes_case() {
        let binder = SearchPathBinder::default();
        let mut state = BindingState::new();
        let mut target = RecordingTarget::new();

        assert!(binder.bind(&mut state, &mut target, &schema("acme")).await.unwrap());
        assert!(binder.bind(&mut state, &mut target, &schema("Acme")).await.unwrap());
        assert_eq!(state.last_applied(), Some(r#""Acme", "public""#));
    }

    #[tokio::test]
    async fn test_bind_always_apply() {
        let binder = SearchPathBinder::new(SearchPathConfig::new().with_always_apply(true));
        let mut state = BindingState::new();
        let mut target = RecordingTarget::new();

        for _ in 0..3 {
            assert!(binder.bind(&mut state, &mut target, &schema("acme")).await.unwrap());
        }
        assert_eq!(target.applied().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_apply_clears_state() {
        let binder = SearchPathBinder::default();
        let mut state = BindingState::new();
        let mut target = RecordingTarget::new();

        binder.bind(&mut state, &mut target, &schema("acme")).await.unwrap();
        target.fail_next(TenancyError::database("connection reset"));
        let err = binder
            .bind(&mut state, &mut target, &schema("globex"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(state.last_applied(), None);

        // Same schema as before the failure is re-applied, not skipped.
        assert!(binder.bind(&mut state, &mut target, &schema("acme")).await.unwrap());
    }

    #[tokio::test]
    async fn test_bind_current_uses_context() {
        let binder = SearchPathBinder::default();
        let mut state = BindingState::new();
        let mut target = RecordingTarget::new();

        context::with_schema(schema("acme"), async {
            binder.bind_current(&mut state, &mut target).await.unwrap();
        })
        .await;
        binder.bind_current(&mut state, &mut target).await.unwrap();

        assert_eq!(
            target.applied(),
            vec![r#""acme", "public""#.to_string(), r#""public""#.to_string()]
        );
    }
}
