mod annexb;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use packetizer::media::fragment::fragment_annex_b;
use packetizer::{
    BoundedBitrateController, FeedbackMsg, FeedbackReceiver, Frame, FrameFormat, FrameOutcome,
    PacketizerConfig, RtpEngineConfig, ThreadScheduler, UdpSink, VideoFrameInfo,
    VideoFramePacketizer,
};
use tracing_subscriber::EnvFilter;

use crate::annexb::{nal_type, split_access_units};

#[derive(Parser)]
#[command(
    name = "frame-packetizer",
    about = "Packetize H.264/H.265 elementary streams over RTP"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the NAL unit layout of an Annex B file
    Fragment {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Codec::H264)]
        codec: Codec,
    },
    /// Send an Annex B file as RTP to a UDP destination
    Stream {
        #[arg(long, short)]
        input: PathBuf,
        /// Destination address (host:port)
        #[arg(long, short)]
        dest: SocketAddr,
        /// Local bind address
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: String,
        #[arg(long, value_enum, default_value_t = Codec::H264)]
        codec: Codec,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Largest RTP packet in bytes, header included
        #[arg(long, default_value_t = 1200)]
        mtu: usize,
        /// Stream the file this many times
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Codec {
    H264,
    H265,
}

impl From<Codec> for FrameFormat {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::H264 => FrameFormat::H264,
            Codec::H265 => FrameFormat::H265,
        }
    }
}

/// A file cannot produce key frames on demand, so requests are only counted.
#[derive(Default)]
struct RequestLog {
    requests: AtomicU64,
}

impl FeedbackReceiver for RequestLog {
    fn on_feedback(&self, msg: FeedbackMsg) {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(?msg, total = n, "key frame requested");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Fragment { file, codec } => print_fragments(&file, codec.into()),
        Command::Stream {
            input,
            dest,
            bind,
            codec,
            width,
            height,
            fps,
            mtu,
            repeat,
        } => stream(StreamArgs {
            input,
            dest,
            bind,
            format: codec.into(),
            width,
            height,
            fps,
            mtu,
            repeat,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

fn print_fragments(path: &Path, format: FrameFormat) -> Result<(), String> {
    let data = read_file(path)?;
    let map = fragment_annex_b(&data).map_err(|e| e.to_string())?;

    println!("{:>6}  {:>10}  {:>8}  type", "index", "offset", "length");
    for (i, fragment) in map.iter().enumerate() {
        let nal = &data[fragment.offset..fragment.end()];
        println!(
            "{:>6}  {:>10}  {:>8}  {}",
            i,
            fragment.offset,
            fragment.length,
            nal_type(format, nal)
        );
    }
    println!("{} NAL units, {} bytes", map.len(), data.len());
    Ok(())
}

struct StreamArgs {
    input: PathBuf,
    dest: SocketAddr,
    bind: String,
    format: FrameFormat,
    width: u32,
    height: u32,
    fps: u32,
    mtu: usize,
    repeat: u32,
}

fn stream(args: StreamArgs) -> Result<(), String> {
    if args.fps == 0 {
        return Err("fps must be positive".into());
    }
    let engine_config = RtpEngineConfig {
        mtu: args.mtu,
        ..RtpEngineConfig::default()
    };
    engine_config.validate().map_err(|e| e.to_string())?;

    let data = read_file(&args.input)?;
    let units = split_access_units(args.format, &data).map_err(|e| e.to_string())?;
    if units.is_empty() {
        return Err("no access units found".into());
    }

    let requests = Arc::new(RequestLog::default());
    let packetizer = VideoFramePacketizer::with_rtp_engine(
        &PacketizerConfig::default(),
        engine_config,
        requests.clone(),
        Arc::new(BoundedBitrateController::new()),
        Box::new(ThreadScheduler::default()),
    )
    .map_err(|e| e.to_string())?;

    let sink = Arc::new(UdpSink::bind(args.bind.as_str(), args.dest).map_err(|e| e.to_string())?);
    packetizer
        .bind_transport(sink.clone())
        .map_err(|e| e.to_string())?;

    println!(
        "Streaming {} access units from {} to {} at {} fps",
        units.len(),
        args.input.display(),
        args.dest,
        args.fps
    );

    let frame_interval = Duration::from_secs(1) / args.fps;
    let ticks_per_frame = 90_000 / args.fps;
    let mut timestamp = 0u32;
    let mut sent = 0u64;
    let mut dropped = 0u64;
    let mut next_deadline = Instant::now();

    for _ in 0..args.repeat {
        for unit in &units {
            let video = VideoFrameInfo {
                width: args.width,
                height: args.height,
                is_key_frame: unit.is_key_frame,
            };
            let frame = Frame::new(args.format, &unit.data, timestamp, video);
            match packetizer.on_encoded_frame(&frame) {
                FrameOutcome::Sent => sent += 1,
                outcome => {
                    dropped += 1;
                    tracing::debug!(?outcome, timestamp, "frame not sent");
                }
            }

            timestamp = timestamp.wrapping_add(ticks_per_frame);
            next_deadline += frame_interval;
            let now = Instant::now();
            if next_deadline > now {
                thread::sleep(next_deadline - now);
            }
        }
    }

    packetizer.close();
    sink.close();

    println!(
        "Sent {} frames ({} dropped, {} packets, {} key frame requests)",
        sent,
        dropped,
        sink.packets_sent(),
        requests.requests.load(Ordering::Relaxed)
    );
    Ok(())
}
