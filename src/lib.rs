//! scriptrun - fetch a script from a remote repository, run it once with JSON
//! on stdin, and hand back its stdout.
//!
//! The pipeline is resolve → fetch → stage → execute → unstage, with a
//! separate deadline for the fetch and for the child process.

#[cfg(not(unix))]
compile_error!("This program only works on Unix-like systems.");

pub mod config;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod http_server;
pub mod response;
pub mod runner;
pub mod source;
pub mod staging;
pub mod state;

pub use config::RunnerConfig;
pub use error::{RunError, StagingError};
pub use runner::{FetchRequest, ScriptRunner};
pub use state::AppState;
