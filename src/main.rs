//! scriptrun - run scripts fetched from a remote repository.
//!
//! Usage:
//!   scriptrun serve [--port 8080] [options]                  # Start HTTP server
//!   scriptrun run --repo <url> --path <file> [--input <json>]  # Run once from the CLI

use clap::{Args as ClapArgs, Parser, Subcommand};
use scriptrun::config::{
    RunnerConfig, DEFAULT_BRANCH, DEFAULT_INTERPRETER, DEFAULT_RAW_BASE_URL, DEFAULT_WEB_HOST,
};
use scriptrun::{http_server, AppState, FetchRequest, ScriptRunner};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scriptrun")]
#[command(about = "Fetch a script from a remote repository and run it")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "SCRIPTRUN_PORT", default_value = "8080")]
        port: u16,

        #[command(flatten)]
        runner: RunnerArgs,
    },
    /// Fetch and run one script, printing its output
    Run {
        /// Repository reference, e.g. https://github.com/owner/repo/blob/main/
        #[arg(long)]
        repo: String,

        /// Script path inside the repository
        #[arg(long)]
        path: String,

        /// JSON passed to the script on stdin
        #[arg(long, default_value = "{}")]
        input: String,

        #[command(flatten)]
        runner: RunnerArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct RunnerArgs {
    /// Directory for staged scripts
    #[arg(long, env = "SCRIPTRUN_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Program each script is run with
    #[arg(long, env = "SCRIPTRUN_INTERPRETER", default_value = DEFAULT_INTERPRETER)]
    interpreter: String,

    /// Trusted repository prefix (repeatable). Without one, every repository is accepted
    #[arg(long = "allow", env = "SCRIPTRUN_ALLOW", value_delimiter = ',')]
    allow_list: Vec<String>,

    /// Host accepted in repository references
    #[arg(long, env = "SCRIPTRUN_WEB_HOST", default_value = DEFAULT_WEB_HOST)]
    web_host: String,

    /// Base URL raw file content is fetched from
    #[arg(long, env = "SCRIPTRUN_RAW_BASE_URL", default_value = DEFAULT_RAW_BASE_URL)]
    raw_base_url: String,

    /// Branch used when the repository reference names none
    #[arg(long, env = "SCRIPTRUN_DEFAULT_BRANCH", default_value = DEFAULT_BRANCH)]
    default_branch: String,

    /// Fetch timeout in milliseconds
    #[arg(long, env = "SCRIPTRUN_FETCH_TIMEOUT_MS", default_value = "5000")]
    fetch_timeout_ms: u64,

    /// Execution deadline in milliseconds
    #[arg(long, env = "SCRIPTRUN_EXEC_TIMEOUT_MS", default_value = "10000")]
    exec_timeout_ms: u64,

    /// Cap on captured bytes per output stream
    #[arg(long, env = "SCRIPTRUN_MAX_OUTPUT_BYTES", default_value = "1048576")]
    max_output_bytes: usize,
}

impl From<RunnerArgs> for RunnerConfig {
    fn from(args: RunnerArgs) -> Self {
        let defaults = RunnerConfig::default();
        RunnerConfig {
            staging_dir: args.staging_dir.unwrap_or(defaults.staging_dir),
            interpreter: args.interpreter,
            allow_list: args
                .allow_list
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            web_host: args.web_host,
            raw_base_url: args.raw_base_url,
            default_branch: args.default_branch,
            fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
            exec_timeout: Duration::from_millis(args.exec_timeout_ms),
            max_output_bytes: args.max_output_bytes,
        }
    }
}

fn build_runner(args: RunnerArgs) -> ScriptRunner {
    let config = RunnerConfig::from(args);
    match ScriptRunner::from_config(&config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve { port, runner } => {
            let state = AppState::new(build_runner(runner));
            if let Err(e) = http_server::run_server(port, state).await {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
        Commands::Run { repo, path, input, runner } => {
            let input = match serde_json::from_str(&input) {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Error: --input is not valid JSON: {}", e);
                    exit(1);
                }
            };
            let runner = build_runner(runner);
            let request = match FetchRequest::new(repo, path, input) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            };
            match runner.run(&request).await {
                Ok(stdout) => {
                    println!("{}", String::from_utf8_lossy(&stdout).trim_end());
                }
                Err(e) => {
                    eprintln!("Error [{}]: {}", e.category(), e.detail());
                    exit(1);
                }
            }
        }
    }
}
