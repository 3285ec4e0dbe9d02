//! drishti-stream replay daemon.
//!
//! Replays a recorded video file over the network transports: every frame is
//! read at container level (no transcode), fanned out to all connected TCP
//! clients, and optionally streamed to a UDP destination. Playback follows
//! the recorded timestamps with a speed multiplier and can loop back to
//! frame 0 at end of stream.

use drishti_stream::config::AppConfig;
use drishti_stream::container;
use drishti_stream::disk::VideoReader;
use drishti_stream::error::{Error, Result};
use drishti_stream::streaming::{parse_address, FrameServer, PacerConfig, UdpFrameSender};
use std::env;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `drishti-stream <path>` (positional)
/// - `drishti-stream --config <path>` (flag-based)
/// - `drishti-stream -c <path>` (short flag)
///
/// Defaults to `/etc/drishti-stream.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/drishti-stream.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("drishti-stream v0.1.0 starting...");

    let config_path = parse_config_path();
    let config = if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
        AppConfig::from_file(&config_path)?
    } else {
        log::warn!("Config {} not found, using defaults", config_path);
        AppConfig::default()
    };

    let mut reader = VideoReader::open(&config.playback.input)?;
    if reader.frame_count() == 0 {
        return Err(Error::Other(format!(
            "{} contains no frames",
            config.playback.input
        )));
    }
    if reader.differential() && config.playback.loop_playback {
        log::warn!(
            "looping a differential stream: clients joining mid-loop will decode garbage \
             until they reconnect at frame 0"
        );
    }

    let mut server = FrameServer::bind(&config.streaming.tcp_bind, config.streaming.max_clients)?;

    let mut udp_sender = if config.streaming.udp_enabled {
        let (host, port) = parse_address(&config.streaming.udp_dest)?;
        let dest = format!("{}:{}", host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::InvalidConfig(format!("unresolvable UDP destination {}", host))
            })?;
        let pacer = PacerConfig {
            max_rate_bps: config.streaming.udp_rate_mbps * 1_000_000,
            packet_size: config.streaming.udp_packet_size,
            app_id: config.streaming.udp_app_id,
            ..PacerConfig::default()
        };
        Some(UdpFrameSender::new(dest, pacer)?)
    } else {
        None
    };

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!(
        "Replaying {} ({} frames) at {}x speed. Press Ctrl-C to stop.",
        config.playback.input,
        reader.frame_count(),
        config.playback.speed
    );

    let speed = config.playback.speed;
    let mut playback_start: Option<Instant> = None;
    let mut first_ts = 0.0f64;
    let mut sent: u64 = 0;

    while running.load(Ordering::Relaxed) {
        match reader.read_frame()? {
            Some(frame) => {
                if speed > 0.0 {
                    let start = *playback_start.get_or_insert_with(|| {
                        first_ts = frame.timestamp;
                        Instant::now()
                    });
                    let offset = (frame.timestamp - first_ts).max(0.0) / speed as f64;
                    let target = start + Duration::from_secs_f64(offset);
                    let now = Instant::now();
                    if target > now {
                        std::thread::sleep(target - now);
                    }
                }

                let bytes = Arc::new(container::serialize(&frame));
                server.write_serialized(Arc::clone(&bytes))?;
                if let Some(udp) = udp_sender.as_ref() {
                    udp.write_serialized(bytes.as_ref().clone())?;
                }
                sent += 1;
            }
            None => {
                if !config.playback.loop_playback {
                    log::info!("End of stream after {} frames", sent);
                    break;
                }
                reader.rewind()?;
                playback_start = None;
            }
        }
    }

    // Shutdown
    log::info!("Shutting down...");
    server.close();
    if let Some(udp) = udp_sender.as_mut() {
        udp.close();
    }

    log::info!("drishti-stream stopped ({} frames sent)", sent);
    Ok(())
}
