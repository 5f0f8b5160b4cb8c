// Copyright 2025-2026 CEMAXECUTER LLC

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use hdx_protocol::PhyRate;
use hdx_sdr::DeviceParameters;
use hdx_transceiver::config::DEFAULT_BLOCK_SIZE;
use hdx_transceiver::{Error, Transceiver, TransceiverConfig, TransceiverStats};

#[derive(Parser, Debug)]
#[command(name = "hdx-transceiver")]
#[command(about = "Half-duplex SDR transceiver: periodic transmit with continuous receive")]
struct Cli {
    /// JSON file with device parameters (flags below override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device address: "loopback", "file=<path>[,format=cf32|ci16|ci8][,tx=<path>]",
    /// or UHD device arguments (empty picks any USRP)
    #[arg(short = 'a', long)]
    device_addr: Option<String>,

    /// Center frequency in Hz
    #[arg(short = 'c', long)]
    center_freq: Option<f64>,

    /// Sample rate in samples/s
    #[arg(short = 'r', long)]
    sample_rate: Option<f64>,

    /// TX gain in dB
    #[arg(long)]
    tx_gain: Option<f64>,

    /// RX gain in dB
    #[arg(long)]
    rx_gain: Option<f64>,

    /// Digital TX amplitude, 0 < a <= 1
    #[arg(long)]
    amplitude: Option<f64>,

    /// PHY rate: bpsk-1/2, bpsk-2/3, bpsk-3/4, qpsk-1/2, qpsk-2/3, qpsk-3/4,
    /// qam16-1/2, qam16-2/3, qam16-3/4, qam64-2/3, qam64-3/4
    #[arg(long, default_value = "bpsk-1/2")]
    rate: String,

    /// Payload to transmit
    #[arg(short = 'm', long, default_value = "Hello World")]
    message: String,

    /// Seconds between transmissions
    #[arg(short = 'i', long, default_value = "1.0")]
    interval: f64,

    /// Number of frames to send (0 = until interrupted)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Samples per acquisition
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

/// Error message with its source chain, `outer: inner: root`.
fn describe(e: &dyn StdError) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

fn load_params(cli: &Cli) -> Result<DeviceParameters, String> {
    let mut params = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("invalid config {}: {}", path.display(), e))?
        }
        None => DeviceParameters::default(),
    };

    if let Some(addr) = &cli.device_addr {
        params.device_address = addr.clone();
    }
    if let Some(freq) = cli.center_freq {
        params.center_frequency = freq;
    }
    if let Some(rate) = cli.sample_rate {
        params.sample_rate = rate;
    }
    if let Some(gain) = cli.tx_gain {
        params.tx_gain = gain;
    }
    if let Some(gain) = cli.rx_gain {
        params.rx_gain = gain;
    }
    if let Some(amp) = cli.amplitude {
        params.amplitude = amp;
    }

    params.validate().map_err(|e| e.to_string())?;
    Ok(params)
}

fn print_packet(packet: &[u8]) {
    println!("Received a packet!");
    println!("{}", String::from_utf8_lossy(packet));
}

fn print_stats(stats: &TransceiverStats) {
    eprintln!(
        "blocks: {}  packets: {}  sent: {}  acquisition errors: {}",
        stats.blocks, stats.packets, stats.bursts_sent, stats.acquisition_errors
    );
    eprintln!(
        "preambles: {}  header errors: {}  FCS errors: {}  samples: {}",
        stats.pipeline.preambles,
        stats.pipeline.header_errors,
        stats.pipeline.fcs_errors,
        stats.pipeline.samples
    );
}

fn run(cli: &Cli) -> Result<(), String> {
    let params = load_params(cli)?;
    let rate: PhyRate = cli
        .rate
        .parse()
        .map_err(|e| describe(&Error::from(e)))?;
    if !(cli.interval.is_finite() && cli.interval >= 0.0) {
        return Err(format!("invalid interval: {}", cli.interval));
    }
    let interval = Duration::from_secs_f64(cli.interval);

    if cli.verbose {
        log::info!("hdx-transceiver starting");
        log::info!("center frequency: {:.3} MHz", params.center_frequency / 1e6);
        log::info!("sample rate: {} S/s", params.sample_rate);
        log::info!("device: '{}'", params.device_address);
        log::info!("rate: {}", rate);
    }

    let config = TransceiverConfig {
        block_size: cli.block_size,
        ..TransceiverConfig::for_device(&params)
    };

    // Print from the main thread so output never interleaves mid-line
    let (tx, rx) = crossbeam::channel::unbounded::<Vec<u8>>();
    let trx = Transceiver::with_config(
        move |packets| {
            for p in packets {
                let _ = tx.send(p);
            }
        },
        params,
        config,
    )
    .map_err(|e| describe(&e))?;

    let mut sent = 0u64;
    while cli.count == 0 || sent < cli.count {
        println!("Sending \"{}\"", cli.message);
        trx.send_frame(cli.message.as_bytes(), rate)
            .map_err(|e| describe(&e))?;
        sent += 1;

        let deadline = Instant::now() + interval;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(packet) => print_packet(&packet),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        trx.health().map_err(|e| describe(&e))?;
        if cli.stats {
            print_stats(&trx.stats());
        }
    }

    // Drain anything that arrived after the last interval
    while let Ok(packet) = rx.try_recv() {
        print_packet(&packet);
    }

    let stats = trx.stats();
    trx.close().map_err(|e| describe(&e))?;
    if cli.stats {
        eprintln!("--- summary ---");
        print_stats(&stats);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
