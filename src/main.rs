use clap::Parser;
use persistent_serial::config::{Config, ConfigLoader};
use persistent_serial::logging::init_logging;
use persistent_serial::port::{PortEnumerator, PortInfo, PortLister, SystemPortEnumerator};
use persistent_serial::{BeginOptions, ConnectionManager, Packet, PortError, TokioSerialTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

/// Keep a serial device connected, print every line it sends and forward
/// stdin lines to it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the standard search path).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, e.g. /dev/ttyUSB0 or COM3.
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    /// Delay between a disconnect and the next open attempt.
    #[arg(long, value_name = "MS")]
    reconnect_ms: Option<u64>,

    /// Give up after the first disconnect instead of reconnecting.
    #[arg(long)]
    no_reconnect: bool,

    /// Verbose logging, including outgoing data and listener failures.
    #[arg(short, long)]
    debug: bool,

    /// Log connection statistics every N seconds; 0 disables.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    stats_secs: u64,

    /// Print the visible serial ports and exit.
    #[arg(short, long)]
    list: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.connection.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.connection.baud_rate = baud;
        }
        if let Some(ms) = self.reconnect_ms {
            config.connection.reconnect_interval_ms = ms;
        }
        if self.no_reconnect {
            config.connection.auto_reconnect = false;
        }
        if self.debug {
            config.connection.debug = true;
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?.into_config(),
        None => ConfigLoader::load()?.into_config(),
    };
    args.apply(&mut config);
    config.validate()?;
    init_logging(&config.logging)?;

    if args.list {
        let filter = config.lister.filter();
        let ports = tokio::task::spawn_blocking(|| SystemPortEnumerator.enumerate()).await??;
        for port in ports.iter().filter(|p| filter.accepts(p)) {
            println!("{}", describe(port));
        }
        return Ok(());
    }

    let lister = config.lister.enabled.then(|| {
        let lister = PortLister::spawn(
            Arc::new(SystemPortEnumerator),
            config.lister.poll_interval(),
            config.lister.filter(),
        );
        lister.on_change(|ports| {
            let names: Vec<&str> = ports.iter().map(|p| p.path.as_str()).collect();
            info!(ports = ?names, "port list changed");
        });
        lister
    });

    let manager =
        ConnectionManager::with_config(Arc::new(TokioSerialTransport), config.connection.clone());
    if let Some(lister) = &lister {
        manager.attach_ports(lister.handle());
    }
    register_callbacks(&manager);

    manager.begin(BeginOptions::new().on_read(|packet: &Packet| println!("{packet}")))?;
    info!(port = %manager.port(), baud_rate = manager.baud_rate(), "connecting");

    let stats_task = (args.stats_secs > 0).then(|| {
        let weak = manager.downgrade();
        let period = Duration::from_secs(args.stats_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                match serde_json::to_string(&manager.info()) {
                    Ok(json) => info!(stats = %json, "connection stats"),
                    Err(e) => warn!(error = %e, "cannot serialize stats"),
                }
            }
        })
    });

    tokio::select! {
        _ = forward_stdin(&manager) => {},
        _ = shutdown_signal() => {},
    }

    manager.end();
    if let Some(task) = stats_task {
        task.abort();
    }
    if let Some(lister) = lister {
        lister.stop();
    }
    Ok(())
}

fn register_callbacks(manager: &ConnectionManager) {
    let weak = manager.downgrade();
    manager.on_connect(move || {
        if let Some(manager) = weak.upgrade() {
            info!(port = %manager.port(), "connected");
        }
    });
    manager.on_reconnect(|| info!("reconnected"));
    manager.on_disconnect(|| warn!("disconnected"));
    manager.on_error(|err: &PortError| warn!(error = %err, "connection error"));
}

/// Send each stdin line to the device. Never returns; shutdown comes from
/// the signal branch.
async fn forward_stdin(manager: &ConnectionManager) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !manager.println(&line) {
                    warn!("not connected, line dropped");
                }
            }
            Ok(None) => {
                // Stdin closed (e.g. piped input finished); keep the link up
                // until a signal arrives.
                std::future::pending::<()>().await;
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                std::future::pending::<()>().await;
            }
        }
    }
}

fn describe(port: &PortInfo) -> String {
    let mut line = port.path.clone();
    if let Some(manufacturer) = &port.manufacturer {
        line.push_str(&format!("  {manufacturer}"));
    }
    if let (Some(vid), Some(pid)) = (&port.vendor_id, &port.product_id) {
        line.push_str(&format!("  [{vid}:{pid}]"));
    }
    if let Some(serial) = &port.serial_number {
        line.push_str(&format!("  sn={serial}"));
    }
    line
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, shutting down");
}
