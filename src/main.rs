//! ncp - minimal file and directory transfer over TCP

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use ncp::cancel::CancelToken;
use ncp::cli::{Cli, Command};
use ncp::config::{FileConfig, Settings};
use ncp::logger::{ConsoleLogger, Logger, TeeLogger, TextLogger};
use ncp::progress::TransferProgress;
use ncp::{Receiver, RetryPolicy, Sender, TransferError};

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<TransferError>()
                .map(TransferError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let cancel = CancelToken::new();
    cancel
        .install_handler()
        .context("installing Ctrl-C handler")?;

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&file_config, &cli.command.overrides());
    let endpoint = cli.command.endpoint()?;

    // Verbosity is fixed here; hot paths only see the trait object
    let console = ConsoleLogger::new(cli.verbose);
    let logger: Arc<dyn Logger> = match &cli.log_file {
        Some(path) => Arc::new(TeeLogger::new(
            console,
            TextLogger::new(path)
                .with_context(|| format!("opening log file {}", path.display()))?,
        )),
        None => Arc::new(console),
    };
    logger.debug(&format!("Settings: {:?}", settings));
    let progress = TransferProgress::new(settings.progress);

    match &cli.command {
        Command::Send { src, .. } => {
            let sender = Sender::new(src)
                .overwrite(settings.overwrite.unwrap_or_default())
                .chunk_size(settings.chunk_size)
                .logger(logger.clone())
                .cancel_token(cancel)
                .progress(progress);
            let policy = RetryPolicy {
                retries: settings.retries,
                delay: Duration::from_millis(settings.retry_delay_ms),
            };
            let summary = sender.send(&endpoint, policy)?;
            logger.info(&format!(
                "Sent {} entries, {} bytes",
                summary.entries, summary.bytes
            ));
        }
        Command::Recv { dst, .. } => {
            let receiver = Receiver::new(dst)
                .overwrite(settings.overwrite)
                .chunk_size(settings.chunk_size)
                .logger(logger.clone())
                .cancel_token(cancel)
                .progress(progress);
            let summary = receiver.serve(&endpoint)?;
            logger.info(&format!(
                "Received {} files and {} directories, {} bytes",
                summary.files, summary.dirs, summary.bytes
            ));
        }
    }
    Ok(())
}
