use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

mod cli;

use cli::Cli;
use cli::commands::{Commands, RespondMode};
use surface_bridge::SessionError;
use surface_bridge::channel::{ReceiveHandler, TransportChannel, TransportError};
use surface_bridge::config::Config;
use surface_bridge::events::{CheckoutMessage, checkout_registry};
use surface_bridge::protocol::decode_inbound;
use surface_bridge::session::{DispatchStatus, Session, SessionHandler};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join(format!("{}.log", env!("CARGO_PKG_NAME")));

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none()
        && let Some(level) = &config.log_level
    {
        builder.parse_filters(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Prints outbound envelopes instead of posting them to a surface.
struct StdoutChannel;

impl TransportChannel for StdoutChannel {
    fn send(&self, text: &str) -> std::result::Result<(), TransportError> {
        println!("{} {}", "<-".green(), text);
        Ok(())
    }

    fn register_receive_handler(&self, _handler: ReceiveHandler) {
        log::debug!("Replay feeds the session directly, ignoring receive handler");
    }
}

/// Collects delivered messages so the replay loop can answer them.
#[derive(Default)]
struct ReplayHandler {
    received: Mutex<Vec<CheckoutMessage>>,
}

impl ReplayHandler {
    fn drain(&self) -> Vec<CheckoutMessage> {
        std::mem::take(&mut *self.received.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl SessionHandler<CheckoutMessage> for ReplayHandler {
    fn handle_message(&self, message: CheckoutMessage) {
        let kind = if message.is_request() { "request" } else { "notification" };
        println!("{} {} ({})", "->".cyan(), message.method(), kind);
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    fn on_error(&self, error: SessionError) {
        eprintln!("{} {}", "session error:".red(), error);
    }
}

fn answer(message: &CheckoutMessage, mode: RespondMode) {
    match mode {
        RespondMode::None => {}
        RespondMode::Cancel => message.cancel(),
        RespondMode::Empty => match message {
            CheckoutMessage::AddressChangeStart(request) => request.respond_with(Default::default()),
            CheckoutMessage::PaymentMethodChangeStart(request) => request.respond_with(Default::default()),
            CheckoutMessage::SubmitStart(request) => request.respond_with(Default::default()),
            _ => {}
        },
    }
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Replay { file, respond } => handle_replay_command(file.as_ref(), *respond, cli.is_verbose()),
        Commands::Decode { json } => handle_decode_command(json),
        Commands::Methods => handle_methods_command(),
        Commands::Config => handle_config_command(config),
    }
}

fn handle_replay_command(file: Option<&PathBuf>, mode: RespondMode, verbose: bool) -> Result<()> {
    info!("Replaying {:?} (respond: {:?})", file, mode);
    let reader: Box<dyn BufRead> = match file {
        Some(path) => Box::new(BufReader::new(
            fs::File::open(path).context(format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let handler = Arc::new(ReplayHandler::default());
    let session = Session::new(Arc::new(checkout_registry()), handler.clone());
    let channel: Arc<dyn TransportChannel> = Arc::new(StdoutChannel);
    session.attach(&channel);

    let mut delivered = 0;
    let mut skipped = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        if verbose {
            println!("{} {}", format!("[{}]", index + 1).dimmed(), line);
        }

        match session.dispatch(&line) {
            DispatchStatus::Delivered => delivered += 1,
            DispatchStatus::Malformed(e) => {
                println!("{} line {}: {}", "skipped".yellow(), index + 1, e);
                skipped += 1;
            }
            DispatchStatus::Rejected(e) => {
                println!("{} line {}: {}", "skipped".yellow(), index + 1, e);
                skipped += 1;
            }
        }

        for message in handler.drain() {
            answer(&message, mode);
        }
    }

    let cancelled = session.teardown();
    println!(
        "{} {} delivered, {} skipped, {} cancelled at teardown",
        "Replay finished:".green(),
        delivered,
        skipped,
        cancelled
    );
    Ok(())
}

fn handle_decode_command(json: &str) -> Result<()> {
    info!("Decoding message");
    let envelope = decode_inbound(json).context("Invalid envelope")?;
    let registry = checkout_registry();

    println!("{} {}", "method:".green(), envelope.method);
    match &envelope.id {
        Some(id) => println!("{} {} (request)", "id:".green(), id),
        None => println!("{} none (notification)", "id:".green()),
    }
    if registry.is_registered(&envelope.method) {
        println!("{} {}", "params:".green(), envelope.params);
    } else {
        println!("{}", "not a checkout method, would be dropped".yellow());
    }
    Ok(())
}

fn handle_methods_command() -> Result<()> {
    for method in checkout_registry().methods() {
        println!("{}", method);
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml().context("Failed to render config")?);
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
