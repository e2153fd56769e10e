use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use bagplay::cli::{Cli, Mode};
use bagplay::play::{PlayOptions, Player};
use bagplay::term::{self, RawModeGuard, TerminalKeys};
use bagplay::{check, LocalBus, LogReader};

fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the prompt and progress line.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    match cli.into_mode()? {
        Mode::Check { bags } => run_check(&bags),
        Mode::Play { bags, options } => run_play(&bags, options),
    }
}

fn run_check(bags: &[PathBuf]) -> Result<()> {
    let mut failures = 0usize;
    for path in bags {
        match check::scan(path) {
            Ok(summary) => print!("{summary}"),
            Err(error) => {
                eprintln!("bagplay: {error}");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("failed to check {failures} of {} bags", bags.len());
    }
    Ok(())
}

fn run_play(bags: &[PathBuf], options: PlayOptions) -> Result<()> {
    let reader = LogReader::open(bags)?;
    let bus = Arc::new(LocalBus::new());
    let interactive = !options.at_once;
    let mut player = Player::new(reader, bus, TerminalKeys::new(), options)?;

    let report = if interactive {
        term::install_panic_hook();
        let guard = RawModeGuard::new()?;
        let result = player.run();
        guard.release()?;
        result?
    } else {
        player.run()?
    };

    tracing::debug!(
        published = report.published,
        skipped = report.skipped,
        "playback finished"
    );
    Ok(())
}
