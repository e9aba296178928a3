use clap::{value_parser, Arg, Command};
use framecast::config::{app_name, version};
use framecast::net::webrtc::RtcConnector;
use framecast::{CandidateDescriptor, FrameInput, FrameServer, PixelArray, ServerConfig, SessionDescription};
use log::{error, info, warn};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process, thread};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Signaling message read from stdin, one JSON object per line
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Inbound {
    Offer {
        peer_id: String,
        description: SessionDescription,
    },
    Candidate {
        peer_id: String,
        candidate: CandidateDescriptor,
    },
    Shutdown,
}

/// Reply written to stdout, one JSON object per line
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Outbound {
    Answer {
        peer_id: String,
        description: SessionDescription,
    },
    Error {
        peer_id: Option<String>,
        message: String,
    },
}

fn reply(message: &Outbound) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize reply: {}", e),
    }
}

/// Moving colour gradient standing in for a real pipeline stage
fn test_pattern(width: usize, height: usize, tick: usize) -> FrameInput {
    let image = Array3::from_shape_fn((height, width, 3), |(y, x, c)| match c {
        0 => ((x + tick) % 256) as u8,
        1 => ((y + tick) % 256) as u8,
        _ => (tick % 256) as u8,
    });
    FrameInput::Array(PixelArray::from(image.into_dyn()))
}

fn spawn_producer(
    server: Arc<FrameServer>,
    width: usize,
    height: usize,
    fps: u32,
    startup_failed: Arc<AtomicBool>,
    stop: CancellationToken,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = server.startup() {
            error!("{}", e);
            startup_failed.store(true, Ordering::SeqCst);
            stop.cancel();
            return;
        }

        let interval = Duration::from_secs(1) / fps.max(1);
        let mut tick = 0usize;
        loop {
            match server.on_frame(&test_pattern(width, height, tick)) {
                Ok(_) => {}
                Err(framecast::Error::ShutDown) => break,
                Err(e) => {
                    error!("Producer stopped: {}", e);
                    break;
                }
            }
            tick = tick.wrapping_add(1);
            thread::sleep(interval);
        }
        info!("Producer exited after {} frames", tick);
    })
}

async fn signaling_loop(server: Arc<FrameServer>, stop: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read signaling input: {}", e);
                    break;
                }
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<Inbound>(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed signaling message: {}", e);
                reply(&Outbound::Error {
                    peer_id: None,
                    message: e.to_string(),
                });
                continue;
            }
        };

        match message {
            Inbound::Offer {
                peer_id,
                description,
            } => {
                // Negotiations run side by side
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    match server.handle_offer(&peer_id, description).await {
                        Ok(description) => reply(&Outbound::Answer {
                            peer_id,
                            description,
                        }),
                        Err(e) => reply(&Outbound::Error {
                            peer_id: Some(peer_id),
                            message: e.to_string(),
                        }),
                    }
                });
            }
            Inbound::Candidate { peer_id, candidate } => {
                if let Err(e) = server.add_ice_candidate(&peer_id, candidate).await {
                    reply(&Outbound::Error {
                        peer_id: Some(peer_id),
                        message: e.to_string(),
                    });
                }
            }
            Inbound::Shutdown => break,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON server configuration file.")
                .required(false),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Test pattern width.")
                .value_parser(value_parser!(usize))
                .default_value("640"),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Test pattern height.")
                .value_parser(value_parser!(usize))
                .default_value("480"),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("FPS")
                .help("Test pattern frame rate.")
                .value_parser(value_parser!(u32))
                .default_value("30"),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Cannot load {}: {}", path, e);
                return ExitCode::from(2);
            }
        },
        None => ServerConfig::default(),
    };
    let width = matches.get_one::<usize>("width").copied().unwrap_or(640);
    let height = matches.get_one::<usize>("height").copied().unwrap_or(480);
    let fps = matches.get_one::<u32>("fps").copied().unwrap_or(30);

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let stop = CancellationToken::new();
    let ctrlc_stop = stop.clone();
    // gracefully close the app when receiving SIGINT, SIGTERM, or SIGHUP
    ctrlc::set_handler(move || {
        ctrlc_stop.cancel();
    })
    .expect("Error setting Ctrl-C handler");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = {
        let _guard = runtime.enter();
        match RtcConnector::new(config.clone()) {
            Ok(connector) => FrameServer::new(config, Arc::new(connector)),
            Err(e) => {
                error!("Cannot create WebRTC engine: {:#}", e);
                return ExitCode::FAILURE;
            }
        }
    };
    info!("{} {} ready, reading signaling messages from stdin", app_name(), version());

    let startup_failed = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(
        Arc::clone(&server),
        width,
        height,
        fps,
        Arc::clone(&startup_failed),
        stop.clone(),
    );

    runtime.block_on(async {
        signaling_loop(Arc::clone(&server), stop.clone()).await;
        server.shutdown().await;
    });

    if producer.join().is_err() {
        error!("Producer thread panicked");
    }
    // stdin reads may still be parked on a blocking thread
    runtime.shutdown_timeout(Duration::from_secs(1));

    if startup_failed.load(Ordering::SeqCst) {
        ExitCode::from(255)
    } else {
        ExitCode::SUCCESS
    }
}
