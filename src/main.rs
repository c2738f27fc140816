use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use slotwatch::check::{self, AppContext};
use slotwatch::config::Config;
use slotwatch::health::{self, CheckMetrics};
use slotwatch::notify::Notifier;
use slotwatch::scheduler;
use slotwatch::store::AppointmentStore;
use slotwatch::supervisor::{self, BotLink, InitOutcome};

/// Parse command line arguments
struct Args {
    once: bool,
    validate: bool,
    help: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        once: false,
        validate: false,
        help: false,
    };

    for arg in &args[1..] {
        match arg.as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
    }

    result
}

fn print_help() {
    println!("Slotwatch - embassy appointment slot watcher\n");
    println!("USAGE:");
    println!("    slotwatch [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once        Run a single check and exit");
    println!("    --validate    Validate configuration and exit");
    println!("    --help, -h    Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    See .env.example for the configuration variables");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slotwatch=info".parse().unwrap()),
        )
        .init();

    info!("Slotwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Booking URL: {}", config.booking_url);
    info!("  Office: {} (calendar {})", config.office, config.calendar_id);
    info!("  Timezone: {}", config.timezone);
    info!("  Schedule: {}", config.check_interval);

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let every = scheduler::parse_interval(&config.check_interval)?;
    let config = Arc::new(config);

    // Load the persisted reference appointment, if any
    let store = AppointmentStore::new(config.appointment_file.clone());
    let reference = store.load(config.timezone).await;
    match &reference {
        Some(appointment) => info!(
            "Watching for slots earlier than {}",
            appointment
                .date
                .with_timezone(&appointment.timezone)
                .format("%Y-%m-%d")
        ),
        None => info!("No reference appointment yet, waiting for /set"),
    }

    // Bot transport, notifier and shared check context
    let link = Arc::new(BotLink::new());
    let notifier = Notifier::new(&config, link.clone())?;
    let metrics = Arc::new(CheckMetrics::new());
    let ctx = Arc::new(AppContext::new(
        config.clone(),
        notifier,
        metrics.clone(),
        reference,
    )?);

    let cancel = CancellationToken::new();

    // Health check server, if configured
    if let Some(port) = config.health_port {
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            health::run_health_server(port, metrics, cancel).await;
        });
    }

    // Bring up the Telegram transport before anything that wants to chat
    match supervisor::initialize(
        &link,
        &config.bot_token,
        supervisor::MAX_INIT_ATTEMPTS,
        supervisor::INIT_RETRY_DELAY,
    )
    .await
    {
        InitOutcome::Ready => {}
        InitOutcome::ExhaustedRetries => {
            error!("Telegram bot could not be initialized, exiting");
            std::process::exit(1);
        }
        InitOutcome::AlreadyInitializing => unreachable!("no concurrent initializer at startup"),
    }

    if args.once {
        info!("Running single check (--once mode)");
        check::run_check(&ctx).await;
        cancel.cancel();
        return Ok(());
    }

    // Command polling loop
    {
        let ctx = ctx.clone();
        let link = link.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            supervisor::run_poller(ctx, link, cancel).await;
        });
    }

    ctx.notifier
        .send_chat(&format!(
            "Slot watcher started. Checks run on the {} schedule. Send /start for commands.",
            config.check_interval
        ))
        .await;

    // Immediate feedback on startup when a reference is already set
    if ctx.reference().is_some() {
        check::run_check(&ctx).await;
    }

    // Shutdown on Ctrl-C
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let scheduler_ctx = ctx.clone();
    scheduler::run_scheduler(config.timezone, every, cancel.clone(), move || {
        let ctx = scheduler_ctx.clone();
        async move {
            check::run_check(&ctx).await;
        }
    })
    .await;

    info!("Slotwatch stopped");
    Ok(())
}
