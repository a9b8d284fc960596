//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WEB_HOST: &str = "github.com";
pub const DEFAULT_RAW_BASE_URL: &str = "https://raw.githubusercontent.com";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Everything the pipeline needs, passed in at construction.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory holding staged scripts. Created if missing.
    pub staging_dir: PathBuf,
    /// Program the staged script is handed to.
    pub interpreter: String,
    /// Trusted repository prefixes. Empty means every source is accepted.
    pub allow_list: Vec<String>,
    /// Host accepted in repository references.
    pub web_host: String,
    /// Base URL raw file content is served from.
    pub raw_base_url: String,
    /// Branch injected when the repository reference names none.
    pub default_branch: String,
    pub fetch_timeout: Duration,
    pub exec_timeout: Duration,
    /// Cap on captured bytes, applied to stdout and stderr separately.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("scriptrun"),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            allow_list: Vec::new(),
            web_host: DEFAULT_WEB_HOST.to_string(),
            raw_base_url: DEFAULT_RAW_BASE_URL.to_string(),
            default_branch: DEFAULT_BRANCH.to_string(),
            fetch_timeout: Duration::from_millis(5000),
            exec_timeout: Duration::from_millis(10000),
            max_output_bytes: 1024 * 1024,
        }
    }
}
