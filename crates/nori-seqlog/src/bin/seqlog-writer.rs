//! seqlog-writer: appends a run of integers to a log file from its own process.
//!
//! Usage: `seqlog-writer <path> <iterations> [first_value]`
//!
//! Pushes `iterations` consecutive integers starting at `first_value` (default 0),
//! pausing 0-20ms between pushes, then closes the log. Used to exercise several
//! processes writing the same file.
//!
//! Environment:
//! - `SEQLOG_FLUSH_DELAY_MS`: debounce window (default 20)
//! - `RUST_LOG`: log filter (default info)

use nori_seqlog::{LogOptions, Registry, RegistryConfig, SeqLog};
use rand::Rng;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Writer configuration.
#[derive(Debug, Clone)]
struct Config {
    path: PathBuf,
    iterations: u64,
    first_value: i64,
    flush_delay: Duration,
}

impl Config {
    fn from_args_and_env() -> Result<Self, String> {
        let mut args = std::env::args().skip(1);

        let path = args
            .next()
            .map(PathBuf::from)
            .ok_or("missing parameters: <path> <iterations> [first_value]")?;
        let iterations = args
            .next()
            .ok_or("missing parameter: <iterations>")?
            .parse::<u64>()
            .map_err(|e| format!("invalid iterations: {}", e))?;
        let first_value = match args.next() {
            Some(v) => v
                .parse::<i64>()
                .map_err(|e| format!("invalid first_value: {}", e))?,
            None => 0,
        };

        let flush_delay = match std::env::var("SEQLOG_FLUSH_DELAY_MS") {
            Ok(ms) => Duration::from_millis(
                ms.parse()
                    .map_err(|e| format!("invalid SEQLOG_FLUSH_DELAY_MS: {}", e))?,
            ),
            Err(_) => Duration::from_millis(20),
        };

        Ok(Self {
            path,
            iterations,
            first_value,
            flush_delay,
        })
    }
}

async fn run(config: Config) -> nori_seqlog::Result<()> {
    let registry = Registry::new(RegistryConfig::default())?;
    let log = SeqLog::new(&registry);
    log.open(
        &config.path,
        LogOptions::new().with_flush_delay(config.flush_delay),
    )
    .await?;

    tracing::info!(
        path = %config.path.display(),
        iterations = config.iterations,
        first_value = config.first_value,
        "writer started"
    );

    let pushes = async {
        for i in 0..config.iterations {
            log.push(config.first_value + i as i64)?;
            let pause = rand::thread_rng().gen_range(0..=20);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
        Ok::<(), nori_seqlog::Error>(())
    };

    tokio::select! {
        res = pushes => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, flushing pending records");
            registry.flush_all().await?;
        }
    }

    log.close().await?;
    tracing::info!("writer finished");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = match Config::from_args_and_env() {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(12);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "writer failed");
            ExitCode::FAILURE
        }
    }
}
