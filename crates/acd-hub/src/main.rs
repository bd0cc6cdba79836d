mod memory_store;
mod routes;
mod status_file;
mod supervisor;

use acd_core::DataRoot;
use clap::Parser;
use routes::AppState;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use supervisor::{AgentCommand, Supervisor};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_HUB_ADDR: &str = "127.0.0.1:5050";
const DEFAULT_LOG_DIR: &str = ".acd/logs";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    data_root: DataRoot,
    agent: AgentCommand,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "acd-hub", about = "Agent companion dashboard hub")]
struct Args {
    /// Listen address (loopback only)
    #[arg(long, default_value = "")]
    addr: String,
    /// Directory the agent writes its status, repo map and memory into
    #[arg(long, default_value = "")]
    data_root: String,
    /// Agent executable; defaults to the companion CLI's virtualenv python
    #[arg(long, default_value = "")]
    agent_program: String,
    /// Agent arguments, whitespace separated
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    agent_args: String,
    #[arg(long, default_value = "")]
    agent_cwd: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config_error: {err}");
            return;
        }
    };
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "invalid_addr", addr = %config.addr);
        return;
    }

    let supervisor = Arc::new(Supervisor::new(config.agent.clone()));
    let agent_program = supervisor.command().program.display().to_string();
    let app = routes::router(AppState::new(supervisor, config.data_root.clone()));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        data_root = %config.data_root.path().display(),
        agent = %agent_program
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    // A running agent is left alone on shutdown; it outlives the hub.
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
    info!(event = "hub_stop");
}

fn load_config() -> Result<Config, String> {
    let args = Args::parse();
    let addr = resolve_flag(&args.addr, "ACD_HUB_ADDR").unwrap_or_else(|| DEFAULT_HUB_ADDR.into());
    let data_root = match resolve_flag(&args.data_root, "ACD_DATA_ROOT") {
        Some(path) => DataRoot::new(path),
        None => DataRoot::default_location()
            .ok_or("no home directory; pass --data-root or set ACD_DATA_ROOT")?,
    };
    let agent = resolve_agent_command(&args)?;
    let debug = args.debug || env_true("ACD_HUB_DEBUG");
    let log_dir = resolve_flag(&args.log_dir, "ACD_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.into());
    Ok(Config {
        addr,
        data_root,
        agent,
        debug,
        log_dir,
    })
}

fn resolve_agent_command(args: &Args) -> Result<AgentCommand, String> {
    let base = std::env::current_dir().map_err(|err| format!("current dir: {err}"))?;
    let mut command = AgentCommand::companion_cli(&base);
    if let Some(program) = resolve_flag(&args.agent_program, "ACD_AGENT_PROGRAM") {
        command.program = PathBuf::from(program);
        command.args.clear();
        command.cwd = None;
    }
    if let Some(raw) = resolve_flag(&args.agent_args, "ACD_AGENT_ARGS") {
        command.args = raw.split_whitespace().map(str::to_string).collect();
    }
    if let Some(cwd) = resolve_flag(&args.agent_cwd, "ACD_AGENT_CWD") {
        command.cwd = Some(PathBuf::from(cwd));
    }
    Ok(command)
}

/// Flag first, then environment; blank values count as unset.
fn resolve_flag(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("ACD_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Tees every log line to stdout and, when configured, the hub log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("acd-hub.log"))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["acd-hub"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn flag_wins_over_environment() {
        assert_eq!(
            resolve_flag("127.0.0.1:9000", "ACD_TEST_UNSET_ADDR"),
            Some("127.0.0.1:9000".to_string())
        );
        assert_eq!(resolve_flag("   ", "ACD_TEST_UNSET_ADDR"), None);
    }

    #[test]
    fn custom_agent_program_drops_companion_defaults() {
        let command = resolve_agent_command(&args(&[
            "--agent-program",
            "/usr/bin/watcher",
            "--agent-args",
            "serve --quiet",
        ]))
        .expect("command");
        assert_eq!(command.program, PathBuf::from("/usr/bin/watcher"));
        assert_eq!(command.args, vec!["serve", "--quiet"]);
        assert_eq!(command.cwd, None);
    }

    #[test]
    fn log_file_is_created_under_log_dir() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let guard = open_log_file(&log_dir.display().to_string()).expect("open");
        assert!(guard.file.is_some());
        assert!(log_dir.join("acd-hub.log").exists());

        let guard = open_log_file("").expect("open");
        assert!(guard.file.is_none());
    }
}
