use std::{path::PathBuf, time::Duration};

use adaptive::{
    parse_manifest, prelude::*, ChunkType, Fetcher, HttpFetcher, Playlist, Representation,
};
use clap::Parser;
use clap_handler::handler;
use url::Url;

#[derive(Parser, Clone)]
#[clap(name = "inspect", short_flag = 'S')]
pub struct InspectCommand {
    /// Fetch the media playlist of every HLS rendition as well
    #[clap(short, long)]
    load: bool,

    /// Manager settings in TOML
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Manifest URL
    url: Url,
}

#[handler(InspectCommand)]
async fn handle_inspect(this: InspectCommand) -> anyhow::Result<()> {
    let config = super::load_config(this.config.as_deref())?;
    let fetcher = HttpFetcher::new(config.http_client()?);

    let data = fetcher.fetch(&this.url, None, ChunkType::Playlist).await?;
    let mut playlist = parse_manifest(data, &this.url)?;

    if this.load {
        let representations = playlist
            .periods
            .iter_mut()
            .flat_map(|p| p.adaptation_sets.iter_mut())
            .flat_map(|s| s.representations.iter_mut())
            .filter(|r| !r.is_loaded());
        for representation in representations {
            if let Err(e) = representation.run_local_updates(&fetcher).await {
                log::warn!("Failed to load representation {}: {e}", representation.id);
            }
        }
    }

    print_playlist(&playlist);
    Ok(())
}

fn print_playlist(playlist: &Playlist) {
    let kind = match playlist.kind {
        ManifestKind::Hls => "HLS",
        ManifestKind::Dash => "DASH",
        ManifestKind::Smooth => "Smooth",
    };
    if playlist.is_live() {
        println!("{kind} {} (live)", playlist.url);
    } else {
        println!(
            "{kind} {} ({})",
            playlist.url,
            format_duration(playlist.duration())
        );
    }
    if let Some(offset) = playlist.start_offset {
        println!("  start offset: {offset}s");
    }
    for key in &playlist.session_keys {
        println!("  session key: {key}");
    }

    for (index, period) in playlist.periods.iter().enumerate() {
        let played = if index == 0 { "" } else { " (not played)" };
        println!(
            "Period {} at {}{played}",
            period.id,
            format_duration(period.start)
        );

        for set in &period.adaptation_sets {
            let mut line = format!("  AdaptationSet {} [{:?}]", set.id, set.role);
            if let Some(lang) = &set.lang {
                line.push_str(&format!(" lang={lang}"));
            }
            if let Some(description) = &set.description {
                line.push_str(&format!(" \"{description}\""));
            }
            println!("{line}");

            for representation in &set.representations {
                println!("    {}", describe(representation));
            }
        }
    }
}

fn describe(representation: &Representation) -> String {
    let mut line = format!(
        "Representation {} {}bps {}",
        representation.id,
        representation.bandwidth,
        representation.format.as_ext()
    );
    if let Some((width, height)) = representation.resolution {
        line.push_str(&format!(" {width}x{height}"));
    }
    if let Some(frame_rate) = representation.frame_rate {
        line.push_str(&format!(" @{frame_rate:.3}"));
    }
    if !representation.codecs.is_empty() {
        line.push_str(&format!(" codecs={}", representation.codecs.join(",")));
    }
    if let Some(channels) = representation.channels {
        line.push_str(&format!(" channels={channels}"));
    }

    if !representation.is_loaded() {
        line.push_str(" (not loaded)");
    } else if representation.is_live() {
        line.push_str(&format!(
            ", {} segments from #{} (live)",
            representation.segments().len(),
            representation.window_start().unwrap_or_default()
        ));
    } else {
        line.push_str(&format!(
            ", {} segments, {}",
            representation.segments().len(),
            format_duration(representation.duration())
        ));
    }
    if !representation.format.is_playable() {
        line.push_str(" unsupported");
    }
    line
}

fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    format!(
        "{:02}:{:02}:{:02}.{millis:03}",
        seconds / 3600,
        seconds / 60 % 60,
        seconds % 60
    )
}
