//! # Tessera Server
//!
//! The headless authoritative server: binds a transport, loads the world
//! registry from the data dir, and runs the realm tick loops until
//! SIGINT/SIGTERM.
//!
//! Exit codes: 0 on a clean shutdown, 1 on any fatal error. A crash
//! writes its panic payload and backtrace to `<data-dir>/server.log`
//! before exiting.

use std::io::Write;
use std::net::SocketAddr;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tessera::{FileSettings, GameplayHooks};
use tessera_networking::server::{GameServer, ServerConfig};
use tessera_networking::transport::datagram::UdpServerTransport;
use tessera_networking::transport::stream::StreamServerTransport;
use tessera_networking::transport::Transport;

/// Which transport variant to serve on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// UDP with the dual-channel contract (native case).
    Datagram,
    /// TCP, reliable-only (both channels share the stream).
    Stream,
}

/// Authoritative tile-world server.
#[derive(Debug, Parser)]
#[command(name = "tessera-server", version, about)]
struct Cli {
    /// Listener port.
    #[arg(long, default_value_t = 7777)]
    port: u16,

    /// Persistence root.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Unload a realm after this many seconds without bound sessions.
    #[arg(long, default_value_t = 60)]
    realm_idle_seconds: u64,

    /// Keep disconnected sessions (and their entities) for this long.
    #[arg(long, default_value_t = 30)]
    dormancy_seconds: u64,

    /// Authoritative tick rate in Hz.
    #[arg(long, default_value_t = 30)]
    tick_rate: u32,

    /// Optional TOML settings file (CLI flags win).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transport variant.
    #[arg(long, value_enum, default_value_t = TransportKind::Datagram)]
    transport: TransportKind,
}

/// Log sink that tees every line to stderr and the server log file.
#[derive(Clone)]
struct Tee {
    file: Arc<Mutex<std::fs::File>>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = std::io::stderr().write_all(buf);
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = std::io::stderr().flush();
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = std::fs::create_dir_all(&cli.data_dir) {
        eprintln!("fatal: cannot create data dir {}: {e}", cli.data_dir.display());
        return ExitCode::FAILURE;
    }
    let log_path = cli.data_dir.join("server.log");
    let log_file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => Arc::new(Mutex::new(file)),
        Err(e) => {
            eprintln!("fatal: cannot open {}: {e}", log_path.display());
            return ExitCode::FAILURE;
        }
    };

    let tee = Tee { file: Arc::clone(&log_file) };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(move || tee.clone())
        .with_ansi(false)
        .init();

    // A crash must leave a trace in the log before the process dies.
    let panic_log = Arc::clone(&log_file);
    panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let report = format!("PANIC: {info}\n{backtrace}\n");
        eprintln!("{report}");
        if let Ok(mut file) = panic_log.lock() {
            let _ = file.write_all(report.as_bytes());
            let _ = file.flush();
        }
    }));

    let mut config = ServerConfig {
        tick_rate: cli.tick_rate,
        data_dir: cli.data_dir.clone(),
        realm_idle_ms: cli.realm_idle_seconds * 1000,
        dormancy_ms: cli.dormancy_seconds * 1000,
        ..ServerConfig::default()
    };
    if let Some(ref path) = cli.config {
        match FileSettings::load(path) {
            Ok(settings) => {
                settings.apply(&mut config);
                // CLI flags override the file where both are given.
                config.tick_rate = cli.tick_rate;
                config.realm_idle_ms = cli.realm_idle_seconds * 1000;
                config.dormancy_ms = cli.dormancy_seconds * 1000;
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "settings file unusable");
                return ExitCode::FAILURE;
            }
        }
    }

    let bind: SocketAddr = match format!("0.0.0.0:{}", cli.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "bad listen address");
            return ExitCode::FAILURE;
        }
    };
    let transport: Box<dyn Transport> = match cli.transport {
        TransportKind::Datagram => match UdpServerTransport::bind(bind) {
            Ok(t) => Box::new(t),
            Err(e) => {
                error!(%bind, error = %e, "udp bind failed");
                return ExitCode::FAILURE;
            }
        },
        TransportKind::Stream => match StreamServerTransport::bind(bind) {
            Ok(t) => Box::new(t),
            Err(e) => {
                error!(%bind, error = %e, "tcp bind failed");
                return ExitCode::FAILURE;
            }
        },
    };

    info!(
        port = cli.port,
        transport = ?cli.transport,
        tick_rate = config.tick_rate,
        data_dir = %config.data_dir.display(),
        "tessera server starting"
    );

    let mut server = GameServer::with_hooks(config, transport, GameplayHooks::factory());
    let shutdown = Arc::new(AtomicBool::new(false));

    let tick_flag = Arc::clone(&shutdown);
    let worker = std::thread::Builder::new()
        .name("tessera-tick".into())
        .spawn(move || {
            server.run(&tick_flag);
            server
        })
        .expect("spawn tick thread");

    // Signal handling on a tiny async runtime; the tick thread stays
    // synchronous.
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "runtime build failed");
            shutdown.store(true, Ordering::Relaxed);
            let _ = worker.join();
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });
    info!("shutdown signal received");
    shutdown.store(true, Ordering::Relaxed);

    match worker.join() {
        Ok(server) => {
            server.shutdown();
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(_) => {
            error!("tick thread panicked");
            ExitCode::FAILURE
        }
    }
}
