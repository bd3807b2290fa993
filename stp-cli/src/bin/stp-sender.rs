//! STP Sender - reliable file transfer over UDP
//!
//! Reads a file and delivers it to an STP receiver, optionally through the
//! loss/delay emulator. Every segment event is written to the sender log.

use anyhow::{bail, Context};
use clap::Parser;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use stp::io::StpSocket;
use stp::{Sender, SenderLog};
use stp_cli::{display_sender_summary, format_bytes, init_tracing, Config, SenderOptions};

#[derive(Parser, Debug)]
#[command(name = "stp-sender")]
#[command(about = "STP reliable file sender", long_about = None)]
struct Args {
    /// Receiver address (host:port)
    #[arg(short, long)]
    receiver: Option<SocketAddr>,

    /// File to send
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum window size in bytes
    #[arg(long)]
    mws: Option<u32>,

    /// Maximum segment size in bytes
    #[arg(long)]
    mss: Option<u32>,

    /// RTO deviation multiplier
    #[arg(long)]
    gamma: Option<f64>,

    /// Probability a segment is dropped
    #[arg(long)]
    p_drop: Option<f64>,

    /// Probability a segment is duplicated
    #[arg(long)]
    p_duplicate: Option<f64>,

    /// Probability a segment has a bit error
    #[arg(long)]
    p_corrupt: Option<f64>,

    /// Probability a segment is held back and reordered
    #[arg(long)]
    p_order: Option<f64>,

    /// Segments sent before a held segment is released
    #[arg(long)]
    max_order: Option<u32>,

    /// Probability a segment is delayed
    #[arg(long)]
    p_delay: Option<f64>,

    /// Upper bound on the delay in milliseconds
    #[arg(long)]
    max_delay: Option<u64>,

    /// Seed for the emulator's random number generator
    #[arg(long)]
    seed: Option<u64>,

    /// Event log path
    #[arg(long)]
    log: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Settings from the config file with command-line overrides applied
    fn options(&self) -> anyhow::Result<SenderOptions> {
        let mut options = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?
                .sender
                .unwrap_or_default(),
            None => SenderOptions::default(),
        };

        if let Some(receiver) = self.receiver {
            options.receiver = Some(receiver);
        }
        if let Some(input) = &self.input {
            options.input = Some(input.clone());
        }
        if let Some(log) = &self.log {
            options.log = log.clone();
        }
        options.mws = self.mws.unwrap_or(options.mws);
        options.mss = self.mss.unwrap_or(options.mss);
        options.gamma = self.gamma.unwrap_or(options.gamma);

        let pld = &mut options.pld;
        pld.p_drop = self.p_drop.unwrap_or(pld.p_drop);
        pld.p_duplicate = self.p_duplicate.unwrap_or(pld.p_duplicate);
        pld.p_corrupt = self.p_corrupt.unwrap_or(pld.p_corrupt);
        pld.p_order = self.p_order.unwrap_or(pld.p_order);
        pld.max_order = self.max_order.unwrap_or(pld.max_order);
        pld.p_delay = self.p_delay.unwrap_or(pld.p_delay);
        pld.max_delay_ms = self.max_delay.unwrap_or(pld.max_delay_ms);
        pld.seed = self.seed.unwrap_or(pld.seed);

        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let options = args.options()?;
    let Some(receiver) = options.receiver else {
        bail!("no receiver address given (use --receiver or a config file)");
    };
    let Some(input) = options.input.clone() else {
        bail!("no input file given (use --input or a config file)");
    };
    let config = options.to_engine_config()?;

    let data = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
    tracing::info!(
        "Sending {} ({}) to {}",
        input.display(),
        format_bytes(data.len() as u64),
        receiver
    );

    let log = Arc::new(
        SenderLog::create(&options.log)
            .with_context(|| format!("creating {}", options.log.display()))?,
    );
    let socket = StpSocket::connect(receiver)?;

    let start = Instant::now();
    let sender = Sender::connect(socket, config, log.clone())?;
    sender.send(&data)?;
    sender.close()?;
    let elapsed = start.elapsed();

    let stats = log.finish()?;
    tracing::info!("Transfer complete, log written to {}", options.log.display());
    display_sender_summary(&stats, elapsed);

    Ok(())
}
