use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hls_live::{
    HlsConfig, HlsLiveError, HlsParser, HttpFetcher, Presentation, PresentationEvent,
};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "hls-watch")]
#[command(author, version, about = "Follow an HLS presentation and log how its timeline evolves")]
struct Cli {
    /// Master or media playlist uri
    uri: String,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn describe(presentation: &Presentation) {
    let state = presentation.timeline().state();
    log::info!(
        "Presentation is {}, {} variants, {} streams",
        state.presentation_type.as_str(),
        presentation.variants().len(),
        presentation.streams().len()
    );
    for stream in presentation.streams() {
        let index = stream.index();
        log::info!(
            "[{}]{:?} {} segments [{} - {}] from {}",
            stream.id(),
            stream.kind(),
            index.len(),
            index.start_time().unwrap_or_default(),
            index.end_time().unwrap_or_default(),
            stream.playlist_uri()
        );
    }
    if let Some(position) = presentation.initial_seek_position() {
        log::info!("Playback would start at {}", position);
    }
}

fn log_event(presentation: &Presentation, event: &PresentationEvent) {
    match event {
        PresentationEvent::TimelineChanged {
            presentation_type,
            duration,
        } => log::info!(
            "Presentation is now {}, duration {}",
            presentation_type.as_str(),
            duration.unwrap_or_default()
        ),
        PresentationEvent::IndexUpdated {
            stream,
            appended,
            evicted,
        } => {
            let window = presentation
                .stream(*stream)
                .map(|s| s.index())
                .unwrap_or_default();
            log::info!(
                "[{}]+{} -{} segments, window [{} - {}]",
                stream,
                appended,
                evicted,
                window.start_time().unwrap_or_default(),
                window.end_time().unwrap_or_default()
            );
        }
        PresentationEvent::TimestampUnavailable { stream, error } => {
            log::warn!("[{}]Start time unavailable: {}", stream, error)
        }
        PresentationEvent::UpdateFailed { stream, error } => {
            log::warn!("[{}]Update failed: {}", stream, error)
        }
        PresentationEvent::StreamHalted { stream, error } => {
            log::error!("[{}]Halted: {}", stream, error)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), HlsLiveError> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_config = ConfigBuilder::new().add_filter_allow_str("hls").build();
    let _ = TermLogger::init(level, log_config, TerminalMode::Mixed, ColorChoice::Auto);

    let config = match &cli.config {
        Some(path) => HlsConfig::load(path)?,
        None => HlsConfig::default(),
    };
    let fetcher = HttpFetcher::new(&config)?;

    let mut parser = HlsParser::new(config, Arc::new(fetcher));
    let mut events = parser.subscribe();
    let presentation = parser.start(&cli.uri).await?;
    while let Ok(event) = events.try_recv() {
        log_event(&presentation, &event);
    }
    describe(&presentation);

    while presentation.timeline().is_live() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&presentation, &event),
                Err(RecvError::Lagged(skipped)) => log::warn!("Missed {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    parser.stop();
    describe(&presentation);
    Ok(())
}
