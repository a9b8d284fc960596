//! Shared application state.

use crate::runner::ScriptRunner;
use std::sync::Arc;

/// Handed to every handler. The runner carries no per-request state, so one
/// instance serves all concurrent requests.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<ScriptRunner>,
}

impl AppState {
    pub fn new(runner: ScriptRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }
}
