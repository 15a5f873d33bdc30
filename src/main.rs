use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use opus_relay::audio::mock::{MockCapture, MockPlayback};
use opus_relay::audio::{
    AlsaCapture, AlsaPlayback, CaptureDevice, OpusDecoder, OpusEncoder, PlaybackDevice,
};
use opus_relay::config::{Config, Mode};
use opus_relay::error::PipelineError;
use opus_relay::lifecycle::LifecycleController;
use opus_relay::pipeline::{self, PlaybackSink, StatsAggregator};
use opus_relay::transport::{self, WebRtcTransport};

#[derive(Parser, Debug)]
#[command(version, about = "Capture audio, encode it to Opus, relay it over WebRTC or play it back")]
struct CliArgs {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `mode` from the configuration
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Use a synthetic tone and a silent sink instead of ALSA devices
    #[arg(long)]
    mock: bool,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日志
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    // 加载配置
    let mut config = Config::load(&args.config)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    let audio = config.audio;
    info!(
        "Starting {:?} mode: {}Hz {}ch, {} frames ({} samples), queue capacity {}",
        config.mode,
        audio.sample_rate,
        audio.channels,
        audio.frame_duration,
        audio.frame_samples(),
        audio.queue_capacity
    );

    let stats = Arc::new(StatsAggregator::new(config.stats.report_interval()));
    let mut controller = LifecycleController::new();

    // 中继模式先完成会话协商，协商失败时不打开任何音频设备
    let peer = match config.mode {
        Mode::Relay => {
            let mut line = String::new();
            BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
            let offer = transport::decode_offer(&line)?;
            let (peer, answer_sdp) = WebRtcTransport::connect(&config.webrtc, offer.sdp).await?;
            // 应答是唯一写到 stdout 的内容
            println!("{}", transport::encode_answer(&answer_sdp, offer.format)?);
            Some(peer)
        }
        Mode::Loopback => None,
    };

    let capture: Box<dyn CaptureDevice> = if args.mock {
        Box::new(
            MockCapture::new(&audio)
                .with_sine(440.0)
                .paced(audio.frame_duration()),
        )
    } else {
        Box::new(AlsaCapture::open(&config.devices.capture, &audio)?)
    };
    let encoder = OpusEncoder::new(&audio)?;

    match peer {
        Some(peer) => {
            let sink = peer.sink(audio.sample_rate);
            pipeline::spawn_relay(&mut controller, audio, stats.clone(), capture, encoder, sink);
        }
        None => {
            let playback: Box<dyn PlaybackDevice> = if args.mock {
                Box::new(MockPlayback::new())
            } else {
                Box::new(AlsaPlayback::open(&config.devices.playback, &audio)?)
            };
            let decoder = OpusDecoder::new(&audio)?;
            pipeline::spawn_loopback(
                &mut controller,
                audio,
                stats.clone(),
                capture,
                encoder,
                decoder,
                PlaybackSink::new(playback),
            );
        }
    }

    // 等待 Ctrl+C 或任一阶段退出
    let handle = controller.handle();
    let wait = controller.wait();
    tokio::pin!(wait);
    let result = tokio::select! {
        result = &mut wait => result,
        _ = signal::ctrl_c() => {
            info!("Interrupted, quitting...");
            handle.shutdown();
            match tokio::time::timeout(Duration::from_secs(5), &mut wait).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Stage {
                    stage: "pipeline",
                    reason: "stages did not stop within 5s".into(),
                }),
            }
        }
    };

    info!("Final stats: {}", stats.snapshot());
    if let Err(e) = result {
        error!("Pipeline failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
