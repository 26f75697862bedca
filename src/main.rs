use anyhow::Context;
use clap::Parser;
use phmetro::{
    connect_on_attach, init_logging, list_ports, open_session, read_ph, Config, RecurringTask,
    SessionError, SessionEvent,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "phmetro")]
#[command(author, version, about = "Poll a USB serial pH meter and print its readings")]
#[command(long_about = "
Starts the serial session, waits for the meter's USB adapter to be plugged
in, and queries it for a reading on a fixed interval until interrupted.

EXAMPLES:
    # Poll the meter with the settings in the default config file
    phmetro

    # Poll a simulated meter twice a second
    phmetro --simulate --interval-ms 500

    # List candidate serial ports
    phmetro --list-ports
")]
struct Args {
    /// Path to configuration file (.toml or .json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use an in-memory meter instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Time between readings in milliseconds
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Serial baud rate
    #[arg(long, value_name = "BAUD")]
    port_baud: Option<u32>,

    /// Print readings as JSON lines
    #[arg(long)]
    json: bool,

    /// List candidate serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    save_config: bool,
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Error { title, message } => tracing::warn!("{}: {}", title, message),
        other => tracing::info!("{}", other.description()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = Args::parse();
    tracing::debug!("phmetro {} built {}", phmetro::VERSION, phmetro::BUILD_DATE);

    if args.list_ports {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if let Some(interval_ms) = args.interval_ms {
        config.polling.interval_ms = interval_ms;
    }
    if let Some(baud) = args.port_baud {
        config.connection.baud_rate = baud;
    }
    config.validate()?;

    if args.save_config {
        config.save_to_file(&path)?;
        tracing::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let session = open_session(&config, args.simulate)?;
    session.subscribe_all(|event| {
        log_event(event);
        Ok(())
    });

    if !config.connection.auto_connect {
        connect_on_attach(&session);
    }

    session.start()?;
    tracing::info!("Service {} on {} transport", session.state(), session.transport_name());

    let poller = config.polling.enabled.then(|| {
        let session = session.clone();
        let exchange = config.exchange.clone();
        let json = args.json;
        RecurringTask::spawn(config.polling.interval(), move || {
            let session = session.clone();
            let exchange = exchange.clone();
            async move {
                match read_ph(&session, &exchange).await {
                    Ok(reading) if json => match serde_json::to_string(&reading) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!("Failed to encode reading: {}", e),
                    },
                    Ok(reading) => println!("{}", reading),
                    Err(SessionError::NotConnected) => tracing::debug!("Waiting for the meter"),
                    Err(e) if e.is_retryable() => tracing::debug!("Reading skipped: {}", e),
                    Err(e) => tracing::warn!("Reading failed: {}", e),
                }
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");

    if let Some(poller) = poller {
        poller.join().await;
    }
    session.shutdown();
    Ok(())
}
