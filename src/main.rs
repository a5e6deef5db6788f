use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use vigil::{
    Config, DashboardNotifier, DashboardWorker, Monitor, MonitorError, MonitorHandle,
    MonitoringSession, SimulatedDriver, SimulationControl,
};

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Sensor alarm, trend and history monitor")]
struct Args {
    /// Path to the configuration file (JSON or YAML)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Start monitoring immediately
    #[arg(long)]
    start: bool,

    /// Serve the live dashboard over WebSocket
    #[cfg(feature = "web")]
    #[arg(long)]
    web: bool,
}

/// One line typed on the command surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserCommand {
    Start,
    Stop,
    Reload,
    Precision(usize),
    /// 1-based, as listed
    Acknowledge(usize),
    List,
    Export,
    /// Put the simulated server on or off the network
    Simulate { online: bool },
    Help,
    Exit,
}

fn parse_command(line: &str) -> Result<Option<UserCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let number = |arg: Option<&str>, what: &str| -> Result<usize, String> {
        arg.ok_or_else(|| format!("{} requires a number", what))?
            .parse::<usize>()
            .map_err(|_| format!("{} requires a non-negative integer", what))
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "1" | "start" => UserCommand::Start,
        "q" | "stop" => UserCommand::Stop,
        "2" | "reload" => UserCommand::Reload,
        "3" | "precision" => UserCommand::Precision(number(parts.next(), "precision")?),
        "4" | "ack" => {
            let n = number(parts.next(), "ack")?;
            if n == 0 {
                return Err("Alarm numbers start at 1".to_string());
            }
            UserCommand::Acknowledge(n)
        }
        "l" | "list" => UserCommand::List,
        "5" | "export" => UserCommand::Export,
        "online" => UserCommand::Simulate { online: true },
        "offline" => UserCommand::Simulate { online: false },
        "h" | "help" => UserCommand::Help,
        "0" | "exit" => UserCommand::Exit,
        other => return Err(format!("Unknown command '{}'", other)),
    };
    Ok(Some(command))
}

fn print_menu() {
    println!("=== VIGIL sensor monitor ===");
    println!("[1] start            start monitoring");
    println!("[q] stop             stop monitoring");
    println!("[2] reload           reload configuration");
    println!("[3] precision N      set decimal precision");
    println!("[4] ack N            acknowledge alarm N");
    println!("[l] list             list alarm history");
    println!("[5] export           export alarm history to CSV");
    println!("    offline | online  drop or restore the simulated server link");
    println!("[0] exit");
}

async fn run_command(
    handle: &MonitorHandle,
    simulation: &SimulationControl,
    command: UserCommand,
) -> vigil::Result<()> {
    match command {
        UserCommand::Start => {
            // Connecting may take the whole retry budget; keep the prompt live.
            let handle = handle.clone();
            tokio::spawn(async move {
                match handle.start_monitoring().await {
                    Ok(path) => println!("Monitoring started, history in {}", path.display()),
                    Err(e) => println!("Monitoring not started: {}", e),
                }
            });
        }
        UserCommand::Stop => {
            if !handle.stop_monitoring().await? {
                println!("Monitoring is not running");
            }
        }
        UserCommand::Reload => {
            let sensors = handle.reload_configuration().await?;
            println!("Configuration reloaded: {} sensors", sensors);
        }
        UserCommand::Precision(decimals) => match handle.set_decimal_precision(decimals).await {
            Ok(()) => println!("Decimal precision set to {}", decimals),
            Err(MonitorError::Config(message)) => println!("{}", message),
            Err(e) => return Err(e),
        },
        UserCommand::Acknowledge(number) => match handle.acknowledge_alarm(number - 1).await {
            Ok(()) => println!("Alarm {} acknowledged", number),
            Err(MonitorError::AlarmNotFound(_)) => println!("Invalid alarm number {}", number),
            Err(MonitorError::AlreadyAcknowledged(_)) => {
                println!("Alarm {} is already acknowledged", number)
            }
            Err(e) => return Err(e),
        },
        UserCommand::List => {
            let alarms = handle.alarms().await?;
            if alarms.is_empty() {
                println!("No alarms in history");
            }
            for (i, alarm) in alarms.iter().enumerate() {
                println!(
                    "{:>3}. {} {:<10} {:<2} value={} threshold={} {}{}",
                    i + 1,
                    alarm.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    alarm.sensor,
                    alarm.level,
                    alarm.value,
                    alarm.threshold,
                    if alarm.active { "ACTIVE" } else { "cleared" },
                    if alarm.acknowledged { " (ack)" } else { "" }
                );
            }
        }
        UserCommand::Export => match handle.export_csv().await? {
            Some(path) => println!("Alarm history exported to {}", path.display()),
            None => println!("No alarm history to export"),
        },
        UserCommand::Simulate { online } => simulation.set_online(online),
        UserCommand::Help => print_menu(),
        UserCommand::Exit => handle.exit().await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vigil=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Vigil v{} starting", vigil::VERSION);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let (notifier, dashboard_rx) = DashboardNotifier::channel(config.dashboard.queue_capacity);

    #[cfg(feature = "web")]
    let web_shutdown = tokio_util::sync::CancellationToken::new();
    #[cfg(feature = "web")]
    let dashboard = if args.web {
        let sink = vigil::web::WebSocketSink::new(config.dashboard.queue_capacity);
        let server = sink.clone();
        let bind = config.dashboard.bind_address.clone();
        let token = web_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(&bind, token).await {
                error!("Dashboard server error: {}", e);
            }
        });
        DashboardWorker::new(dashboard_rx, sink).spawn()
    } else {
        DashboardWorker::new(dashboard_rx, vigil::LogSink).spawn()
    };
    #[cfg(not(feature = "web"))]
    let dashboard = DashboardWorker::new(dashboard_rx, vigil::LogSink).spawn();

    let (sample_tx, sample_rx) = mpsc::channel(1024);
    let driver = SimulatedDriver::new(config.endpoint.clone(), sample_tx);
    let simulation = driver.control();
    let session = MonitoringSession::new(config, notifier);
    let (monitor, handle) = Monitor::new(session, &args.config, driver, sample_rx);
    let monitor_task = tokio::spawn(monitor.run());

    print_menu();
    if args.start {
        run_command(&handle, &simulation, UserCommand::Start).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                handle.shutdown();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed: behave like exit
                    let _ = handle.exit().await;
                    break;
                };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(command)) => {
                        let exit = command == UserCommand::Exit;
                        if let Err(e) = run_command(&handle, &simulation, command).await {
                            warn!("{}", e);
                        }
                        if exit {
                            break;
                        }
                    }
                    Err(message) => println!("{}", message),
                }
            }
        }
    }

    monitor_task.await?;
    #[cfg(feature = "web")]
    web_shutdown.cancel();
    drop(handle);
    if let Err(e) = dashboard.await {
        error!("Dashboard worker failed: {}", e);
    }

    info!("Vigil stopped");
    Ok(())
}
