//! Command-line surface and startup configuration validation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;

use crate::play::PlayOptions;

#[derive(Parser, Debug)]
#[command(
    name = "bagplay",
    version,
    about = "Replay recorded message logs with their original timing"
)]
pub struct Cli {
    /// Check the contents of the bags without playing them back
    #[arg(
        short = 'c',
        long = "check",
        conflicts_with_all = ["all", "paused", "start", "queue"]
    )]
    pub check: bool,

    /// Publish all messages without waiting
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    /// Disable display of the current log time
    #[arg(short = 'n', long = "quiet")]
    pub quiet: bool,

    /// Start in paused mode
    #[arg(short = 'p', long = "paused")]
    pub paused: bool,

    /// Publish the bag time at the given frequency
    #[arg(short = 'b', long = "bag-time", value_name = "HZ")]
    pub bag_time: Option<u32>,

    /// Scale the publish rate by this factor
    #[arg(
        short = 'r',
        long = "rate",
        value_name = "FACTOR",
        default_value_t = 1.0,
        allow_negative_numbers = true
    )]
    pub rate: f64,

    /// Seconds to sleep after every advertise call, letting subscribers connect
    #[arg(short = 's', long = "sleep", value_name = "SECS", default_value_t = 0.2)]
    pub sleep: f64,

    /// Start this many seconds into the bags
    #[arg(short = 't', long = "start", value_name = "SECS")]
    pub start: Option<f64>,

    /// Outgoing queue size for advertised topics (0 = unbounded)
    #[arg(short = 'q', long = "queue", value_name = "SIZE", default_value_t = 0)]
    pub queue: usize,

    /// Bag files to play, merged in recorded-time order
    #[arg(value_name = "BAG", required = true)]
    pub bags: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum Mode {
    Check {
        bags: Vec<PathBuf>,
    },
    Play {
        bags: Vec<PathBuf>,
        options: PlayOptions,
    },
}

impl Cli {
    /// Validate flag combinations and build the run mode. Everything caught
    /// here fails before any bag is opened.
    pub fn into_mode(self) -> anyhow::Result<Mode> {
        if self.check {
            if self.bag_time.is_some() {
                bail!("--bag-time is not valid when checking bags");
            }
            return Ok(Mode::Check { bags: self.bags });
        }

        if self.rate <= 0.0 || !self.rate.is_finite() {
            bail!("rate factor must be a positive number");
        }
        if !(self.sleep >= 0.0 && self.sleep.is_finite()) {
            bail!("advertise sleep must be a non-negative number of seconds");
        }
        if let Some(start) = self.start {
            if !(start >= 0.0 && start.is_finite()) {
                bail!("start offset must be a non-negative number of seconds");
            }
        }
        if self.bag_time.is_some() && self.bags.len() > 1 {
            bail!("only one bag can be played when publishing the bag time");
        }

        let options = PlayOptions {
            at_once: self.all,
            quiet: self.quiet,
            start_paused: self.paused,
            time_scale: self.rate,
            start_skip: Duration::from_secs_f64(self.start.unwrap_or(0.0)),
            settle: Duration::from_secs_f64(self.sleep),
            queue_depth: self.queue,
            bag_clock_hz: self.bag_time,
        };
        Ok(Mode::Play {
            bags: self.bags,
            options,
        })
    }
}
