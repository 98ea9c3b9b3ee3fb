use std::{path::PathBuf, time::Duration};

use adaptive::{prelude::*, AdaptiveError, DemuxStatus, HttpFetcher, PlaylistManager};
use clap::Parser;
use clap_handler::handler;
use url::Url;

use crate::output::FileDemuxer;

const IDLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Parser, Clone)]
#[clap(name = "play", short_flag = 'P')]
pub struct PlayCommand {
    /// Adaptation logic: best, lowest, rate or fixed
    #[clap(short, long)]
    logic: Option<LogicType>,

    /// Bandwidth used by the fixed logic, in bits per second
    #[clap(long)]
    bandwidth: Option<u64>,

    /// Directory receiving one file per stream
    #[clap(short, long, default_value = ".")]
    output: PathBuf,

    /// Stop after this many chunks
    #[clap(long)]
    max_chunks: Option<usize>,

    /// Manager settings in TOML
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Manifest URL
    url: Url,
}

#[handler(PlayCommand)]
async fn handle_play(this: PlayCommand) -> anyhow::Result<()> {
    let mut config = super::load_config(this.config.as_deref())?;
    if let Some(logic) = this.logic {
        config.logic = logic;
    }
    if this.bandwidth.is_some() {
        config.fixed_bandwidth = this.bandwidth;
    }

    tokio::fs::create_dir_all(&this.output).await?;
    let fetcher = HttpFetcher::new(config.http_client()?);
    let demuxer = FileDemuxer::new(this.output.clone());
    let mut manager = PlaylistManager::open(this.url.clone(), fetcher, demuxer, config).await?;
    log::info!(
        "Playing {} with {} of {} streams",
        this.url,
        (0..manager.stream_count())
            .filter(|s| manager.is_stream_enabled(*s))
            .count(),
        manager.stream_count()
    );

    let cancel = manager.cancellation_token();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    let mut chunks = 0;
    loop {
        if this.max_chunks.is_some_and(|max| chunks >= max) {
            log::info!("Reached {chunks} chunks");
            break;
        }

        match manager.demux().await {
            Ok(DemuxStatus::Demuxed) => chunks += 1,
            Ok(DemuxStatus::Buffering) | Ok(DemuxStatus::Paused) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_DELAY) => {}
                }
            }
            Ok(DemuxStatus::EndOfStream) => {
                log::info!("End of stream");
                break;
            }
            Err(AdaptiveError::Cancelled) => break,
            Err(e) => {
                manager.demuxer_mut().flush().await?;
                return Err(e.into());
            }
        }
    }

    manager.demuxer_mut().flush().await?;
    log::info!("Demuxed {chunks} chunks into {}", this.output.display());
    Ok(())
}
