//! nImO Registry daemon.
//!
//! Owns the network-wide view of machines, nodes, channels, connections and
//! applications, answers registry commands on its TCP command port, and
//! multicasts a status notification after every change.
//!
//! # Usage
//!
//! ```bash
//! # Start the registry (foreground)
//! nimo-registry start
//!
//! # Start the registry (background/daemonized)
//! nimo-registry start -d
//!
//! # Stop the registry
//! nimo-registry stop
//!
//! # Check registry status
//! nimo-registry status
//! ```

use std::fs::{self, File};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nimo_core::NimoConfig;
use nimo_node::RegistryClient;
use nimo_registry::RegistryService;

/// nImO registry - the directory of a nImO network
#[derive(Parser, Debug)]
#[command(name = "nimo-registry", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the registry
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Address to listen on (overrides configuration)
        #[arg(long)]
        address: Option<Ipv4Addr>,

        /// Command port (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not send status notifications
        #[arg(long)]
        no_status: bool,
    },
    /// Stop the running registry
    Stop,
    /// Show registry status
    Status,
}

/// How long `stop` waits for the registry to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved listening options for one run.
#[derive(Debug, Clone)]
struct RunOptions {
    listen: SocketAddrV4,
    status: Option<SocketAddrV4>,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("nimo")
}

/// The registry's PID file; one registry per user.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn new() -> Self {
        Self {
            path: state_dir().join("nimo-registry.pid"),
        }
    }

    fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        fs::write(&self.path, process::id().to_string())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// PID of a live registry; a stale file is cleaned up.
    fn running(&self) -> Option<u32> {
        let pid = self.read()?;
        if is_process_running(pid) {
            return Some(pid);
        }
        self.remove();
        None
    }
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn signal_terminate(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = i32::try_from(pid).context("PID out of range")?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        bail!("Stop command is only supported on Unix systems");
    }
}

/// Polls for up to `wait` until `pid` has exited.
fn wait_for_exit(pid: u32, wait: Duration) -> bool {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < wait {
        if !is_process_running(pid) {
            return true;
        }
        std::thread::sleep(step);
        waited += step;
    }
    !is_process_running(pid)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = NimoConfig::load().context("Failed to load configuration")?;

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        address: None,
        port: None,
        no_status: false,
    });

    let pid_file = PidFile::new();

    match command {
        Command::Start {
            daemon,
            address,
            port,
            no_status,
        } => {
            if let Some(pid) = pid_file.running() {
                bail!("Registry is already running (PID {pid}); use 'nimo-registry stop' first");
            }

            let options = RunOptions {
                listen: SocketAddrV4::new(
                    address.unwrap_or(config.registry.address),
                    port.unwrap_or(config.registry.port),
                ),
                status: (config.status.enabled && !no_status).then(|| config.status_group()),
            };

            if daemon {
                daemonize()?;
            }

            pid_file.write()?;
            let result = run_registry(options);
            pid_file.remove();
            result
        }
        Command::Stop => {
            let Some(pid) = pid_file.running() else {
                println!("Registry is not running.");
                return Ok(());
            };
            println!("Stopping registry (PID {pid})...");
            signal_terminate(pid)?;
            if !wait_for_exit(pid, STOP_TIMEOUT) {
                bail!("Registry did not stop within {STOP_TIMEOUT:?}");
            }
            println!("Registry stopped.");
            Ok(())
        }
        Command::Status => {
            let Some(pid) = pid_file.running() else {
                println!("Registry is not running.");
                process::exit(1);
            };
            println!("Registry is running (PID {pid})");
            println!("Command port: {}", config.registry_addr());
            if let Err(e) = print_counts(config.registry_addr()) {
                println!("Registry did not answer: {e:#}");
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn print_counts(addr: SocketAddrV4) -> Result<()> {
    let client = RegistryClient::connect(SocketAddr::V4(addr)).await?;
    println!("Machines:    {}", client.machine_count().await?);
    println!("Nodes:       {}", client.node_count().await?);
    println!("Channels:    {}", client.channel_count().await?);
    println!("Connections: {}", client.connection_count().await?);
    Ok(())
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = state_dir().join("nimo-registry.log");

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_registry(options: RunOptions) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("nimo_registry=info".parse()?)
                .add_directive("nimo_protocol=info".parse()?)
                .add_directive("nimo_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "nImO registry starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let listen = SocketAddr::V4(options.listen);
    let service = match RegistryService::bind(listen, options.status).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Failed to start registry service");
            return Err(e.into());
        }
    };

    info!(
        addr = %service.local_addr(),
        status = ?options.status,
        "Registry listening"
    );

    service.run(cancel_token).await;

    info!("nImO registry stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
