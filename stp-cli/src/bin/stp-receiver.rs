//! STP Receiver - reliable file transfer over UDP
//!
//! Waits for one STP sender, writes the delivered stream to a file and logs
//! every segment event to the receiver log.

use anyhow::{bail, Context};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use stp::io::StpSocket;
use stp::{Receiver, ReceiverLog};
use stp_cli::{display_receiver_summary, format_bytes, init_tracing, Config, ReceiverOptions};

#[derive(Parser, Debug)]
#[command(name = "stp-receiver")]
#[command(about = "STP reliable file receiver", long_about = None)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Where to write the received file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for a sender, and for teardown
    #[arg(long)]
    timeout: Option<u64>,

    /// Event log path
    #[arg(long)]
    log: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> anyhow::Result<ReceiverOptions> {
        let mut options = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?
                .receiver
                .unwrap_or_default(),
            None => ReceiverOptions::default(),
        };

        if let Some(listen) = self.listen {
            options.listen = Some(listen);
        }
        if let Some(output) = &self.output {
            options.output = Some(output.clone());
        }
        if let Some(log) = &self.log {
            options.log = log.clone();
        }
        options.handshake_timeout_secs = self.timeout.unwrap_or(options.handshake_timeout_secs);
        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let options = args.options()?;
    let Some(listen) = options.listen else {
        bail!("no listen address given (use --listen or a config file)");
    };
    let Some(output) = options.output.clone() else {
        bail!("no output file given (use --output or a config file)");
    };
    let config = options.to_engine_config()?;

    let log = Arc::new(
        ReceiverLog::create(&options.log)
            .with_context(|| format!("creating {}", options.log.display()))?,
    );
    let socket = StpSocket::bind(listen)?;
    tracing::info!("Listening on {}", socket.local_addr()?);

    let receiver = Receiver::accept(socket, config, log.clone())?;
    let start = Instant::now();
    tracing::info!("Accepted sender {}", receiver.peer_addr());

    let mut file = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    let mut written = 0u64;
    while let Some(chunk) = receiver.recv() {
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    file.flush()?;

    receiver.close()?;
    let elapsed = start.elapsed();

    let stats = log.finish()?;
    tracing::info!(
        "Wrote {} to {}, log written to {}",
        format_bytes(written),
        output.display(),
        options.log.display()
    );
    display_receiver_summary(&stats, elapsed);

    Ok(())
}
