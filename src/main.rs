mod cmd;

use std::{
    io::{self, Write as _},
    sync::mpsc::{self, RecvTimeoutError},
    time::Duration,
};

use anyhow::{bail, Context as _, Result};
use carreader::{CatalogReader, ReadOutcome};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use self::cmd::Args;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let reader = CatalogReader::new(&args.path).with_options(args.read_options());

    let (tx, rx) = mpsc::channel();
    let on_complete = move |outcome: ReadOutcome| {
        // The receiver only goes away if the main thread already bailed out
        let _ = tx.send(outcome);
    };

    let handle = match args.max {
        Some(max) => reader.resource_constrained_read(max, on_complete),
        None => reader.read(on_complete),
    };

    let progress = handle.progress();

    let outcome = loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(outcome) => break outcome,
            Err(RecvTimeoutError::Timeout) => {
                eprint!(
                    "\r{}/{} ({:?})",
                    progress.completed_units(),
                    progress.total_units(),
                    progress.state()
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                bail!("Internal error: reader thread stopped without reporting")
            }
        }
    };

    handle.join();
    eprint!("\r");

    let records = match outcome {
        ReadOutcome::Success(records) => records,
        ReadOutcome::Empty { path } => {
            eprintln!("No images found in {}", path.display());
            return Ok(());
        }
        ReadOutcome::Failed(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", args.path.display()))
        }
        ReadOutcome::Cancelled => bail!("Read was cancelled"),
    };

    let mut stdout = io::stdout().lock();

    for record in &records {
        writeln!(
            stdout,
            "{}\t{}x{}\t{}",
            record.filename,
            record.image.width(),
            record.image.height(),
            record.name
        )
        .context("Failed to write to standard output")?;
    }

    eprintln!("{} assets", records.len());

    Ok(())
}
