//! Chronicle command-line tool
//!
//! Decodes chronicle directories and writes sample ones.

use std::path::PathBuf;
use std::process::ExitCode;

use chronicle::config::DEFAULT_BUFFER_SIZE;
use chronicle::{log, Chronicle, ChronicleConfig, Epilog};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chronicle")]
#[command(about = "Inspect and produce ring-buffer chronicles")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a chronicle directory and print its entries
    Dump {
        /// Chronicle directory
        dir: PathBuf,

        /// Print every field of each entry
        #[arg(short, long)]
        detailed: bool,
    },

    /// Create a chronicle directory and fill it with sample entries
    Demo {
        /// Directory to create
        dir: PathBuf,

        /// Ring buffer size in bytes
        #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer_size: usize,

        /// Number of entries to write
        #[arg(short, long, default_value = "100")]
        count: u64,
    },
}

fn dump(dir: PathBuf, detailed: bool) -> chronicle::Result<()> {
    let epilog = Epilog::open(&dir)?;
    tracing::debug!(
        forward = ?epilog.forward_region(),
        backward = ?epilog.backward_region(),
        "recovered regions"
    );

    for entry in epilog.entries() {
        match entry {
            Ok(entry) if detailed => println!("{}", entry.to_detailed_string()),
            Ok(entry) => println!("{}", entry),
            Err(err) => println!("<undecodable entry: {}>", err),
        }
    }
    Ok(())
}

fn demo(dir: PathBuf, buffer_size: usize, count: u64) -> chronicle::Result<()> {
    let config = ChronicleConfig::new(&dir).with_buffer_size(buffer_size);
    let chronicle = Chronicle::open(&config)?;
    let app = chronicle.logger("app")?;
    let net = chronicle.logger("net")?;

    let program = std::env::args().next().unwrap_or_default();
    log!(app, "Invocation: {} [{} arguments]", program, std::env::args().len());

    for i in 0..count {
        log!(net, "request {} served in {} ms (cached: {})", i, 0.25 * i as f64, i % 3 == 0);
    }
    log!(app, "wrote {} entries", count);

    chronicle.flush()?;
    tracing::info!(path = %dir.display(), "demo chronicle written");
    Ok(())
}

fn main() -> ExitCode {
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Commands::Dump { dir, detailed } => dump(dir, detailed),
        Commands::Demo {
            dir,
            buffer_size,
            count,
        } => demo(dir, buffer_size, count),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
