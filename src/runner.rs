//! The fetch → stage → execute → unstage pipeline.

use crate::config::RunnerConfig;
use crate::error::RunError;
use crate::executor::Executor;
use crate::fetcher::Fetcher;
use crate::source::SourceResolver;
use crate::staging::StagingStore;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// One call's worth of input. Both strings are non-empty once constructed.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    repository_reference: String,
    script_path: String,
    input_payload: serde_json::Value,
}

impl FetchRequest {
    pub fn new(
        repository_reference: impl Into<String>,
        script_path: impl Into<String>,
        input_payload: serde_json::Value,
    ) -> Result<Self, RunError> {
        let repository_reference = repository_reference.into().trim().to_string();
        let script_path = script_path.into().trim().to_string();
        if repository_reference.is_empty() || script_path.is_empty() {
            return Err(RunError::InvalidRequest(
                "Missing 'github_repo' or 'backend_path'".to_string(),
            ));
        }
        Ok(Self {
            repository_reference,
            script_path,
            input_payload,
        })
    }

    pub fn repository_reference(&self) -> &str {
        &self.repository_reference
    }

    pub fn script_path(&self) -> &str {
        &self.script_path
    }

    pub fn input_payload(&self) -> &serde_json::Value {
        &self.input_payload
    }
}

/// Owns the collaborators for every run. Cheap to share behind an `Arc`;
/// holds no per-request state.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    resolver: SourceResolver,
    fetcher: Fetcher,
    staging: StagingStore,
    executor: Executor,
}

impl ScriptRunner {
    pub fn new(
        resolver: SourceResolver,
        fetcher: Fetcher,
        staging: StagingStore,
        executor: Executor,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            staging,
            executor,
        }
    }

    /// Build every collaborator from configuration.
    pub fn from_config(config: &RunnerConfig) -> Result<Self, String> {
        let resolver = SourceResolver::new(config)?;
        let fetcher = Fetcher::new(config.fetch_timeout)?;
        let staging = StagingStore::new(&config.staging_dir).map_err(|e| e.to_string())?;
        let executor = Executor::new(
            config.interpreter.clone(),
            config.exec_timeout,
            config.max_output_bytes,
        );
        if config.allow_list.is_empty() {
            warn!("No allow-list configured, scripts from any repository will be executed");
        }
        Ok(Self::new(resolver, fetcher, staging, executor))
    }

    /// Run one request to completion and return the script's raw stdout.
    ///
    /// The staged file is removed before this returns on every path. If the
    /// future is dropped mid-run, the staged handle and `kill_on_drop` child
    /// clean up after themselves.
    pub async fn run(&self, request: &FetchRequest) -> Result<Vec<u8>, RunError> {
        let started = Instant::now();
        let source = self
            .resolver
            .resolve(request.repository_reference(), request.script_path())?;
        info!(url = %source, "Resolved script source");

        let content = self.fetcher.fetch(&source).await?;

        let staged = self
            .staging
            .stage(&content, script_extension(request.script_path()))
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to stage script");
                RunError::StagingFailed(e)
            })?;
        let staged_path = staged.path().to_path_buf();

        let outcome = self
            .executor
            .execute(&staged, request.input_payload())
            .await;

        if let Err(e) = staged.unstage().await {
            warn!(error = %e, "Failed to remove staged script");
        }

        let outcome = outcome.and_then(|result| result.into_stdout());
        info!(
            url = %source,
            ok = outcome.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete"
        );
        outcome.map_err(|e| redact_path(e, &staged_path, request.script_path()))
    }
}

/// Extension of the script file, kept so interpreters that care about it see one.
fn script_extension(script_path: &str) -> Option<&str> {
    Path::new(script_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Replace the staged location in script error text with the caller's own path.
fn redact_path(err: RunError, staged_path: &Path, script_path: &str) -> RunError {
    match err {
        RunError::ExecutionFailed(msg) => {
            let staged = staged_path.to_string_lossy();
            RunError::ExecutionFailed(msg.replace(staged.as_ref(), script_path))
        }
        other => other,
    }
}
