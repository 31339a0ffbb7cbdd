use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use hyperstream::cli::{Cli, Command};
use hyperstream::rendezvous::dht::DhtDiscovery;
use hyperstream::transfer::{Progress, ReceiveSession, SendSession};
use hyperstream::Result;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Argument errors exit 1 like every other failure; help and version
    // remain successes.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Send { path } => {
            let session = SendSession::new(DhtDiscovery::new()?);
            println!("Share key: {}", session.share_key());
            println!("Waiting for a peer...");

            spawn_cancel_on_ctrl_c(session.cancel_token());
            let bar = spawn_progress_bar(session.progress());
            let metadata = session.run(&path).await?;
            bar.finish_and_clear();

            println!(
                "Sent {} file(s), {} bytes of content.",
                metadata.file_count, metadata.total_size
            );
            Ok(())
        }
        Command::Receive { key, output } => {
            let session = ReceiveSession::new(DhtDiscovery::new()?, &key)?;
            println!("Connecting...");

            spawn_cancel_on_ctrl_c(session.cancel_token());
            let bar = spawn_progress_bar(session.progress());
            let metadata = session.run(&output).await?;
            bar.finish_and_clear();

            println!(
                "Received {} file(s) into {}.",
                metadata.file_count,
                output.display()
            );
            Ok(())
        }
    }
}

fn spawn_cancel_on_ctrl_c(cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

/// A byte spinner fed by the session's socket-level counter. Totals are only
/// approximate under compression, so no percentage is shown.
fn spawn_progress_bar(progress: Progress) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static template is valid"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let ticker = bar.clone();
    tokio::spawn(async move {
        loop {
            ticker.set_message(format!("{} bytes transferred", progress.bytes()));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });
    bar
}
