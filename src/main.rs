use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{select, unbounded, Receiver};
use jukebox_client::{
    ClientConfig, ClientError, Command, CommandOutcome, PlaybackReport, SessionOptions,
    SinkConfig, Supervisor,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Jukebox server name or IP address
    #[arg(env = "JUKEBOX_SERVER")]
    server: String,

    /// Jukebox server port
    #[arg(env = "JUKEBOX_PORT")]
    port: u16,

    /// Player command that reads the audio stream from stdin
    #[arg(long, env = "JUKEBOX_PLAYER")]
    player: Option<String>,

    /// Write the audio stream to this file instead of playing it
    #[arg(long)]
    output: Option<PathBuf>,

    /// Drop audio bytes instead of playing them
    #[arg(long)]
    discard: bool,

    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Read/write timeout for list, info and stop
    #[arg(long, default_value_t = 30)]
    io_timeout_secs: u64,

    /// How often a running stream checks for cancellation
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Bytes per stream read
    #[arg(long, default_value_t = 2048)]
    chunk_size: usize,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig, ClientError> {
        let mut config = ClientConfig::new(&self.server, self.port);
        config.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        config.io_timeout = Duration::from_secs(self.io_timeout_secs);
        config.session = SessionOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            chunk_size: self.chunk_size,
        };
        config.sink = SinkConfig::from_options(self.player, self.output, self.discard)?;
        config.validate()?;
        Ok(config)
    }
}

fn prompt() {
    print!(">> ");
    let _ = io::stdout().flush();
}

fn print_report(report: &PlaybackReport) {
    if report.outcome.is_failed() {
        eprintln!("Error: {}", report);
    } else {
        println!("{}", report);
    }
}

fn print_outcome(outcome: &CommandOutcome) {
    match outcome {
        CommandOutcome::Text(text) => println!("{}", text),
        CommandOutcome::Playing {
            song_id,
            expected_bytes,
            replaced,
        } => {
            if let Some(report) = replaced {
                print_report(report);
            }
            println!("Playing song {} ({} bytes)", song_id, expected_bytes);
        }
        CommandOutcome::Stopped(report) => print_report(report),
        CommandOutcome::Exit(report) => {
            if let Some(report) = report {
                print_report(report);
            }
        }
    }
}

/// Feed stdin lines into a channel so the main loop can also watch sessions
fn spawn_stdin_reader() -> Receiver<String> {
    let (line_tx, line_rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("❌ Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        // Dropping the sender tells the main loop input is over
    });
    line_rx
}

fn run(config: ClientConfig) -> Result<()> {
    log::info!("🚀 Jukebox client for {}", config.server_address);

    let mut supervisor = Supervisor::from_config(&config);
    let completions = supervisor.completions();
    let lines = spawn_stdin_reader();

    prompt();
    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else {
                    // stdin closed, treat like exit
                    println!();
                    if let Some(report) = supervisor.shutdown() {
                        print_report(&report);
                    }
                    break;
                };

                for report in supervisor.poll_finished() {
                    print_report(&report);
                }

                match Command::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(command)) => match supervisor.execute(command) {
                        Ok(outcome @ CommandOutcome::Exit(_)) => {
                            print_outcome(&outcome);
                            break;
                        }
                        Ok(outcome) => print_outcome(&outcome),
                        Err(e) => {
                            log::debug!("{} error: {:?}", e.class(), e);
                            eprintln!("Error: {}", e);
                        }
                    },
                    Err(e) => eprintln!("Error: {}", e),
                }
                prompt();
            }
            recv(completions) -> event => {
                if let Ok(event) = event {
                    if let Some(report) = supervisor.handle_finished(event) {
                        println!();
                        print_report(&report);
                        prompt();
                    }
                }
            }
        }
    }

    println!("Goodbye!");
    log::info!("Client exiting");
    Ok(())
}

fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    log::debug!("Starting with args: {:?}", args);

    let config = args.into_config().context("Invalid configuration")?;
    run(config)
}
