mod cli;

use channelcast::events::{Event, EventBus};
use channelcast::{channel, config, playlist};
use channelcast_av::{check_tools as av_check_tools, FfprobeOracle, DEFAULT_DURATION_SECS};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "channelcast=trace,channelcast_av=debug".to_string()
        } else {
            "channelcast=info,channelcast_av=info".to_string()
        }
    });

    // stdout is reserved for command output and event lines.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Play {
            files,
            playlist,
            events,
        } => play(files, playlist, events, cli.config.as_deref()),
        Commands::Probe { file, json } => probe_file(&file, json, cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("channelcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn play(
    files: Vec<String>,
    playlist_path: Option<PathBuf>,
    print_events: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let items = match playlist_path {
        Some(ref path) => playlist::load_playlist(path)?,
        None => playlist::from_paths(&files),
    };
    if items.is_empty() {
        tracing::warn!("Playlist is empty; nothing to play");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let bus = Arc::new(EventBus::default());

        let printed = CancellationToken::new();
        let printer = print_events.then(|| {
            tokio::spawn(print_events_as_json(bus.subscribe(), printed.clone()))
        });

        let cancel = CancellationToken::new();
        tokio::spawn(channel::cancel_on_shutdown_signal(cancel.clone()));

        let result = channel::run(&config, items, bus, cancel.clone()).await;
        // Also releases the signal listener.
        cancel.cancel();

        printed.cancel();
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        let summary = result?;
        tracing::info!(
            "{} items played, {} skipped, {} packets sent{}",
            summary.launched,
            summary.skipped,
            summary.relay.packets,
            if summary.cancelled { " (interrupted)" } else { "" }
        );
        Ok::<(), anyhow::Error>(())
    })
}

/// Write events to stdout, one JSON object per line, until `done` fires and
/// the backlog is flushed.
async fn print_events_as_json(mut rx: broadcast::Receiver<Event>, done: CancellationToken) {
    let print = |event: &Event| match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Failed to serialize event: {}", e),
    };

    loop {
        let received = tokio::select! {
            biased;
            received = rx.recv() => received,
            _ = done.cancelled() => break,
        };
        match received {
            Ok(event) => print(&event),
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Event output fell behind; {} events dropped", n)
            }
            Err(RecvError::Closed) => return,
        }
    }

    while let Ok(event) = rx.try_recv() {
        print(&event);
    }
}

fn probe_file(file: &str, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.contains("://") && !Path::new(file).exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let ffprobe =
        channelcast_av::resolve_tool_path("ffprobe", config.tools.ffprobe_path.as_deref());
    let oracle = FfprobeOracle::new(ffprobe);

    let rt = tokio::runtime::Runtime::new()?;
    let probed = rt.block_on(oracle.probe_duration(file));

    let (duration, error) = match probed {
        Ok(d) => (d, None),
        Err(e) => (DEFAULT_DURATION_SECS, Some(e.to_string())),
    };

    if json {
        let value = serde_json::json!({
            "media": file,
            "duration_secs": duration,
            "default_used": error.is_some(),
            "error": error,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Media: {}", file);
        println!("Duration: {:.3}s", duration);
        if let Some(e) = error {
            println!("  (probe failed, default used: {})", e);
        }
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = av_check_tools(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. ffmpeg and ffprobe are needed for playout.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::load_config_or_default(None)?
        }
    };

    println!(
        "  Output: udp://{} (ttl {})",
        config.output.socket_addr(),
        config.output.ttl
    );
    println!("  Hand-off dir: {}", config.handoff.dir.display());
    println!(
        "  Profile: {}x{} {} / {} {}",
        config.transcode.width,
        config.transcode.height,
        config.transcode.video_codec,
        config.transcode.audio_codec,
        config.transcode.audio_bitrate
    );

    Ok(())
}
