use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::ManagerConfig,
    dash,
    encryption::{decrypt_aes128, Keyring},
    error::{AdaptiveError, AdaptiveResult},
    fetch::{ChunkType, Fetcher},
    hls,
    logic::{create_logic, AdaptationLogic},
    playlist::{AdaptationSet, ManifestKind, Playlist, RefreshPolicy, Role, StreamFormat},
    tracker::{ChunkRequest, SegmentTracker, StepResult, TrackerEvent},
};

/// A fetched, decrypted chunk ready for demuxing.
#[derive(Debug, Clone)]
pub struct DemuxChunk {
    pub kind: ChunkType,
    pub representation: String,
    pub sequence: u64,
    pub format: StreamFormat,
    pub start: Duration,
    pub duration: Duration,
    pub data: Bytes,
}

/// Receives the output of [PlaylistManager::demux], in sequence order per stream.
pub trait Demuxer: Send {
    fn push(
        &mut self,
        stream: usize,
        chunk: DemuxChunk,
    ) -> impl Future<Output = AdaptiveResult<()>> + Send;

    fn on_event(&mut self, _stream: usize, _event: &TrackerEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxStatus {
    Demuxed,
    /// Nothing to hand out right now; call again later.
    Buffering,
    Paused,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlQuery {
    CanSeek,
    CanPause,
    IsLive,
    GetTime,
    GetLength,
    GetPosition,
    SetTime(Duration),
    /// Fraction of the total length, between 0 and 1.
    SetPosition(f64),
    SetPause(bool),
    SetStreamEnabled { stream: usize, enabled: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlReply {
    Bool(bool),
    Time(Duration),
    Position(f64),
    Done,
}

struct Stream {
    /// Index of the adaptation set in the played period.
    set: usize,
    tracker: SegmentTracker,
    logic: Box<dyn AdaptationLogic>,
    enabled: bool,
    end_of_stream: bool,
    format: StreamFormat,
}

/// ```text
/// ┌──────────┐   refresh   ┌──────────────────┐   next_chunk   ┌────────────────┐
/// │ Fetcher  ◄─────────────┤                  ├────────────────► SegmentTracker │
/// │          │   segments  │  PlaylistManager ◄────────────────┤  (per stream)  │
/// │          ◄─────────────┤                  │  ChunkRequest  └────────────────┘
/// └──────────┘             │                  │   decrypted    ┌────────────────┐
///                          │                  ├────────────────►    Demuxer     │
///                          └──────────────────┘                └────────────────┘
/// ```
///
/// Only the first period of a playlist is played.
pub struct PlaylistManager<F, D> {
    fetcher: F,
    demuxer: D,
    config: ManagerConfig,
    policy: RefreshPolicy,
    playlist: Playlist,
    keyring: Arc<Keyring>,
    streams: Vec<Stream>,
    paused: bool,
    clock: Duration,
    last_manifest_update: Instant,
    cancel: CancellationToken,
}

impl<F, D> PlaylistManager<F, D>
where
    F: Fetcher,
    D: Demuxer,
{
    pub async fn open(
        url: Url,
        fetcher: F,
        demuxer: D,
        config: ManagerConfig,
    ) -> AdaptiveResult<Self> {
        let keyring = Arc::new(Keyring::new(config.max_keys));
        Self::open_with_keyring(url, fetcher, demuxer, config, keyring).await
    }

    pub async fn open_with_keyring(
        url: Url,
        fetcher: F,
        demuxer: D,
        config: ManagerConfig,
        keyring: Arc<Keyring>,
    ) -> AdaptiveResult<Self> {
        let data = fetcher.fetch(&url, None, ChunkType::Playlist).await?;
        let playlist = parse_manifest(data, &url)?;
        tracing::info!(
            kind = ?playlist.kind,
            live = playlist.is_live(),
            periods = playlist.periods.len(),
            "opened playlist"
        );

        for key in &playlist.session_keys {
            if let Err(e) = keyring.get_key(&fetcher, key).await {
                tracing::warn!(%key, "Failed to preload session key: {e}");
            }
        }

        let policy = config.refresh_policy();
        let streams = match playlist.first_period() {
            Some(period) => period
                .adaptation_sets
                .iter()
                .enumerate()
                .map(|(index, set)| Stream {
                    set: index,
                    tracker: SegmentTracker::new(playlist.start_offset),
                    logic: create_logic(config.logic, config.fixed_bandwidth),
                    enabled: enabled_by_default(set),
                    end_of_stream: false,
                    format: StreamFormat::Unknown,
                })
                .collect(),
            None => Vec::new(),
        };
        if !streams.iter().any(|s| s.enabled) {
            return Err(AdaptiveError::NoRepresentation);
        }

        let mut manager = Self {
            fetcher,
            demuxer,
            config,
            policy,
            playlist,
            keyring,
            streams,
            paused: false,
            clock: Duration::ZERO,
            last_manifest_update: Instant::now(),
            cancel: CancellationToken::new(),
        };

        for index in 0..manager.streams.len() {
            if !manager.streams[index].enabled {
                continue;
            }
            let stream = &mut manager.streams[index];
            let Some(set) = played_set(&manager.playlist, stream.set) else {
                continue;
            };
            let first = stream
                .logic
                .next_representation(set, None, &manager.policy)
                .unwrap_or(0);
            let set = stream.set;
            if let Err(e) = manager.load_representation(set, first).await {
                if matches!(e, AdaptiveError::Cancelled) {
                    return Err(e);
                }
                tracing::warn!(set, representation = first, "Initial load failed: {e}");
            }
        }
        Ok(manager)
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn keyring(&self) -> Arc<Keyring> {
        self.keyring.clone()
    }

    pub fn demuxer(&self) -> &D {
        &self.demuxer
    }

    pub fn demuxer_mut(&mut self) -> &mut D {
        &mut self.demuxer
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_stream_enabled(&self, stream: usize) -> bool {
        self.streams.get(stream).is_some_and(|s| s.enabled)
    }

    /// Adaptation set played by `stream`.
    pub fn stream_set(&self, stream: usize) -> Option<&AdaptationSet> {
        let stream = self.streams.get(stream)?;
        played_set(&self.playlist, stream.set)
    }

    /// Cancelling aborts in-flight refreshes and fetches. Later calls fail with
    /// [AdaptiveError::Cancelled].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn demux(&mut self) -> AdaptiveResult<DemuxStatus> {
        if self.cancel.is_cancelled() {
            return Err(AdaptiveError::Cancelled);
        }
        if self.paused {
            return Ok(DemuxStatus::Paused);
        }

        self.update_playlist().await?;
        self.check_failed()?;

        loop {
            let Some(index) = self.lowest_buffered_stream() else {
                return Ok(DemuxStatus::EndOfStream);
            };

            let stream = &mut self.streams[index];
            let Some(set) = played_set(&self.playlist, stream.set) else {
                stream.end_of_stream = true;
                continue;
            };
            let step = stream
                .tracker
                .next_chunk(set, stream.logic.as_mut(), &self.policy);
            self.forward_events(index);

            match step {
                StepResult::Chunk(request) => return self.demux_chunk(index, request).await,
                StepResult::NeedsLoad(representation) => {
                    let set = self.streams[index].set;
                    if let Err(e) = self.load_representation(set, representation).await {
                        if matches!(e, AdaptiveError::Cancelled) {
                            return Err(e);
                        }
                        tracing::warn!(
                            set,
                            representation,
                            "Failed to load representation: {e}"
                        );
                    }
                    return Ok(DemuxStatus::Buffering);
                }
                StepResult::Waiting => return Ok(DemuxStatus::Buffering),
                StepResult::EndOfStream => {
                    tracing::debug!(stream = index, "end of stream");
                    self.streams[index].end_of_stream = true;
                }
            }
        }
    }

    async fn demux_chunk(
        &mut self,
        index: usize,
        request: ChunkRequest,
    ) -> AdaptiveResult<DemuxStatus> {
        let started = Instant::now();
        let data = match self.fetch_chunk(&request).await {
            Ok(data) => data,
            Err(AdaptiveError::Cancelled) => return Err(AdaptiveError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    url = %request.url,
                    sequence = request.sequence,
                    "Skipped chunk after {} retries: {e}",
                    self.config.segment_retries
                );
                return Ok(DemuxStatus::Buffering);
            }
        };
        if request.kind == ChunkType::Segment {
            self.streams[index]
                .logic
                .update_download_rate(data.len(), started.elapsed());
        }

        let data = match self.decrypt(&request, data).await {
            Ok(data) => data,
            Err(AdaptiveError::Cancelled) => return Err(AdaptiveError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    url = %request.url,
                    sequence = request.sequence,
                    "Skipped chunk: {e}"
                );
                return Ok(DemuxStatus::Buffering);
            }
        };

        let format = match request.format {
            StreamFormat::Unknown => StreamFormat::sniff(&data),
            format => format,
        };
        let stream = &mut self.streams[index];
        if stream.format != format {
            stream.format = format;
            if format != request.format {
                self.demuxer
                    .on_event(index, &TrackerEvent::FormatChange(format));
            }
        }

        let set = stream.set;
        let representation = played_set(&self.playlist, set)
            .and_then(|s| s.representations.get(request.representation))
            .map(|r| r.id.clone())
            .unwrap_or_default();
        self.demuxer
            .push(
                index,
                DemuxChunk {
                    kind: request.kind,
                    representation,
                    sequence: request.sequence,
                    format,
                    start: request.start,
                    duration: request.duration,
                    data,
                },
            )
            .await?;

        if request.kind == ChunkType::Segment {
            self.clock = self
                .streams
                .iter()
                .filter(|s| s.enabled && !s.end_of_stream)
                .filter_map(|s| s.tracker.playback_time())
                .min()
                .unwrap_or(request.start);

            if let Some(representation) = self
                .playlist
                .first_period_mut()
                .and_then(|p| p.adaptation_sets.get_mut(set))
                .and_then(|s| s.representations.get_mut(request.representation))
            {
                let pruned = representation.prune_before(request.sequence);
                if pruned > 0 {
                    tracing::trace!(
                        representation = %representation.id,
                        pruned,
                        "pruned segments"
                    );
                }
            }
        }
        Ok(DemuxStatus::Demuxed)
    }

    async fn fetch_chunk(&self, request: &ChunkRequest) -> AdaptiveResult<Bytes> {
        let mut attempt = 0;
        loop {
            let fetch = self
                .fetcher
                .fetch(&request.url, request.byte_range.as_ref(), request.kind);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AdaptiveError::Cancelled),
                result = fetch => result,
            };

            match result {
                Ok(data) => return Ok(data),
                Err(e) if attempt < self.config.segment_retries => {
                    attempt += 1;
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        "Chunk fetch failed, retrying: {e}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn decrypt(&self, request: &ChunkRequest, data: Bytes) -> AdaptiveResult<Bytes> {
        let Some(encryption) = request.encryption.as_ref().filter(|e| e.is_encrypted()) else {
            return Ok(data);
        };
        let key_url = encryption.key_url.as_ref().ok_or_else(|| {
            AdaptiveError::UnsupportedEncryption("AES-128 without key URI".to_string())
        })?;

        let key = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AdaptiveError::Cancelled),
            key = self.keyring.get_key(&self.fetcher, key_url) => key?,
        };
        match decrypt_aes128(&key, &encryption.iv_for(request.sequence), &data) {
            Ok(decrypted) => Ok(Bytes::from(decrypted)),
            Err(e) => {
                // The key may have been rotated behind the same URI
                self.keyring.invalidate(key_url).await;
                Err(e)
            }
        }
    }

    /// Refreshes live representations and dynamic manifests that are due.
    async fn update_playlist(&mut self) -> AdaptiveResult<()> {
        if self.playlist.kind == ManifestKind::Dash && self.playlist.dynamic {
            let interval = self
                .playlist
                .minimum_update_period
                .unwrap_or(self.policy.default_interval);
            if self.last_manifest_update.elapsed() >= interval {
                self.refresh_manifest().await?;
            }
            return Ok(());
        }

        let now = Instant::now();
        for index in 0..self.streams.len() {
            let stream = &self.streams[index];
            if !stream.enabled || stream.end_of_stream {
                continue;
            }
            let Some(current) = stream.tracker.current_representation() else {
                continue;
            };
            let number = stream.tracker.next_number();
            let set = stream.set;

            let Some(representation) = self
                .playlist
                .first_period_mut()
                .and_then(|p| p.adaptation_sets.get_mut(set))
                .and_then(|s| s.representations.get_mut(current))
            else {
                continue;
            };
            if !representation.needs_update(now, number, &self.policy) {
                continue;
            }

            let update = representation.run_local_updates(&self.fetcher);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AdaptiveError::Cancelled),
                // Failures are counted by the representation
                _ = update => {}
            }
        }
        Ok(())
    }

    async fn refresh_manifest(&mut self) -> AdaptiveResult<()> {
        self.last_manifest_update = Instant::now();
        let url = self.playlist.url.clone();
        let fetch = self.fetcher.fetch(&url, None, ChunkType::Playlist);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AdaptiveError::Cancelled),
            result = fetch => result,
        };

        match result.and_then(|data| dash::parse_mpd(&data, &url, Utc::now())) {
            Ok(updated) => {
                let appended = dash::merge_playlist(&mut self.playlist, updated);
                tracing::debug!(appended, "manifest refreshed");
            }
            Err(e) => tracing::warn!(%url, "Failed to refresh manifest: {e}"),
        }
        Ok(())
    }

    async fn load_representation(
        &mut self,
        set: usize,
        representation: usize,
    ) -> AdaptiveResult<()> {
        let Some(target) = self
            .playlist
            .first_period_mut()
            .and_then(|p| p.adaptation_sets.get_mut(set))
            .and_then(|s| s.representations.get_mut(representation))
        else {
            return Ok(());
        };
        if target.is_loaded() {
            return Ok(());
        }

        let update = target.run_local_updates(&self.fetcher);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AdaptiveError::Cancelled),
            result = update => result.map(|_| ()),
        }
    }

    /// Errors once every representation of an enabled set is out of the game.
    fn check_failed(&self) -> AdaptiveResult<()> {
        for stream in self.streams.iter().filter(|s| s.enabled) {
            let Some(set) = played_set(&self.playlist, stream.set) else {
                continue;
            };
            if set
                .representations
                .iter()
                .all(|r| !r.is_selectable(&self.policy))
            {
                return Err(AdaptiveError::AllRepresentationsFailed(set.id.clone()));
            }
        }
        Ok(())
    }

    fn lowest_buffered_stream(&self) -> Option<usize> {
        self.streams
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enabled && !s.end_of_stream)
            .min_by_key(|(_, s)| s.tracker.buffered_until().unwrap_or_default())
            .map(|(index, _)| index)
    }

    fn forward_events(&mut self, index: usize) {
        for event in self.streams[index].tracker.take_events() {
            self.demuxer.on_event(index, &event);
        }
    }

    pub async fn control(&mut self, query: ControlQuery) -> AdaptiveResult<ControlReply> {
        let live = self.playlist.is_live();
        match query {
            ControlQuery::CanSeek => Ok(ControlReply::Bool(!live)),
            ControlQuery::CanPause => Ok(ControlReply::Bool(!live)),
            ControlQuery::IsLive => Ok(ControlReply::Bool(live)),
            ControlQuery::GetTime => Ok(ControlReply::Time(self.clock)),
            ControlQuery::GetLength => Ok(ControlReply::Time(self.length()?)),
            ControlQuery::GetPosition => {
                let length = self.length()?;
                Ok(ControlReply::Position(
                    (self.clock.as_secs_f64() / length.as_secs_f64()).clamp(0.0, 1.0),
                ))
            }
            ControlQuery::SetTime(time) => self.seek(time).map(ControlReply::Bool),
            ControlQuery::SetPosition(position) => {
                let length = self.length()?;
                let time = length.mul_f64(position.clamp(0.0, 1.0));
                self.seek(time).map(ControlReply::Bool)
            }
            ControlQuery::SetPause(pause) => {
                if pause && live {
                    return Err(AdaptiveError::NotPausable);
                }
                self.paused = pause;
                Ok(ControlReply::Done)
            }
            ControlQuery::SetStreamEnabled { stream, enabled } => {
                self.set_stream_enabled(stream, enabled).await?;
                Ok(ControlReply::Done)
            }
        }
    }

    fn length(&self) -> AdaptiveResult<Duration> {
        match self.playlist.duration() {
            Duration::ZERO => Err(AdaptiveError::UnknownLength),
            length => Ok(length),
        }
    }

    /// Dry-runs the seek on every enabled stream first, then applies it.
    fn seek(&mut self, time: Duration) -> AdaptiveResult<bool> {
        if self.playlist.is_live() {
            return Err(AdaptiveError::NotSeekable);
        }

        let possible = self.streams.iter().filter(|s| s.enabled).all(|stream| {
            played_set(&self.playlist, stream.set)
                .and_then(|set| stream.tracker.position_for_time(set, time))
                .is_some()
        });
        if !possible {
            return Ok(false);
        }

        for stream in self.streams.iter_mut().filter(|s| s.enabled) {
            if let Some(set) = played_set(&self.playlist, stream.set) {
                stream.tracker.set_position_by_time(set, time, false);
                stream.end_of_stream = false;
            }
        }
        tracing::info!(?time, "seek");
        self.clock = time;
        Ok(true)
    }

    async fn set_stream_enabled(&mut self, stream: usize, enabled: bool) -> AdaptiveResult<()> {
        let Some(target) = self.streams.get_mut(stream) else {
            return Err(AdaptiveError::UnknownStream(stream));
        };
        if target.enabled == enabled {
            return Ok(());
        }
        target.enabled = enabled;
        target.end_of_stream = false;
        if !enabled {
            return Ok(());
        }

        // Load the representation the stream starts with, then align it to the others
        let set = target.set;
        let first = played_set(&self.playlist, set)
            .and_then(|s| target.logic.next_representation(s, None, &self.policy))
            .unwrap_or(0);
        self.load_representation(set, first).await?;

        if self.clock > Duration::ZERO {
            let clock = self.clock;
            let target = &mut self.streams[stream];
            if let Some(set) = played_set(&self.playlist, target.set) {
                target.tracker.set_position_by_time(set, clock, false);
            }
        }
        Ok(())
    }
}

/// Detects the manifest kind from `url` and `data`, then parses it.
pub fn parse_manifest(data: Bytes, url: &Url) -> AdaptiveResult<Playlist> {
    match ManifestKind::detect(url, &data) {
        Some(ManifestKind::Hls) => hls::parse_playlist(data, url),
        Some(ManifestKind::Dash) => dash::parse_mpd(&data, url, Utc::now()),
        Some(ManifestKind::Smooth) => Err(AdaptiveError::UnsupportedManifest(
            "Smooth Streaming".to_string(),
        )),
        None => Err(AdaptiveError::UnsupportedManifest(format!(
            "unrecognized manifest at {url}"
        ))),
    }
}

fn played_set(playlist: &Playlist, set: usize) -> Option<&AdaptationSet> {
    playlist.first_period()?.adaptation_sets.get(set)
}

fn enabled_by_default(set: &AdaptationSet) -> bool {
    matches!(set.role, Role::Main | Role::Unspecified)
        && set.representations.iter().any(|r| r.format.is_playable())
}
