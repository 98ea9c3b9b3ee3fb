use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use super::{InitSegment, Segment, SegmentList, StreamFormat};
use crate::{
    error::AdaptiveResult,
    fetch::{ChunkType, Fetcher},
    hls,
    time::Timescale,
};

/// Knobs consulted by representations when deciding whether to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Consecutive refresh failures after which a representation is given up.
    pub max_update_failures: u32,
    /// Refresh interval used when the playlist declares no target duration.
    pub default_interval: Duration,
    /// How far behind the live edge playback starts, in segments.
    pub live_start_segments: usize,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_update_failures: 3,
            default_interval: Duration::from_secs(2),
            live_start_segments: 3,
        }
    }
}

/// Where a representation gets its segments from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentSource {
    /// An HLS media playlist that has to be fetched and refreshed on its own.
    Playlist(Url),
    /// Segments carried by the manifest itself.
    Inline,
}

/// Result of parsing one window of segments for a representation.
#[derive(Debug, Clone, Default)]
pub struct SegmentUpdate {
    pub segments: SegmentList,
    pub init_segment: Option<InitSegment>,
    pub target_duration: Option<Duration>,
    pub live: bool,
    pub format: StreamFormat,
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub id: String,
    /// Bits per second.
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<f64>,
    pub codecs: Vec<String>,
    pub format: StreamFormat,
    pub channels: Option<u32>,
    pub target_duration: Option<Duration>,
    pub timescale: Timescale,
    pub source: SegmentSource,

    live: bool,
    loaded: bool,
    failed_updates: u32,
    last_update: Option<Instant>,
    segments: SegmentList,
    init_segment: Option<InitSegment>,
    window_start: Option<u64>,
}

impl Representation {
    pub fn new<S: Into<String>>(id: S, source: SegmentSource) -> Self {
        Self {
            id: id.into(),
            bandwidth: 0,
            resolution: None,
            frame_rate: None,
            codecs: Vec::new(),
            format: StreamFormat::Unknown,
            channels: None,
            target_duration: None,
            timescale: Timescale::MICROSECONDS,
            source,
            live: false,
            loaded: false,
            failed_updates: 0,
            last_update: None,
            segments: SegmentList::new(),
            init_segment: None,
            window_start: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn failed_updates(&self) -> u32 {
        self.failed_updates
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn is_failed(&self, policy: &RefreshPolicy) -> bool {
        self.failed_updates > policy.max_update_failures
    }

    /// Whether the adaptation logic may pick this representation.
    pub fn is_selectable(&self, policy: &RefreshPolicy) -> bool {
        self.format.is_playable() && !self.is_failed(policy)
    }

    pub fn segments(&self) -> &SegmentList {
        &self.segments
    }

    pub fn init_segment(&self) -> Option<&InitSegment> {
        self.init_segment.as_ref()
    }

    /// First sequence number of the most recent upstream window.
    pub fn window_start(&self) -> Option<u64> {
        self.window_start
    }

    /// Total duration of the segments, zero while live.
    pub fn duration(&self) -> Duration {
        if self.live {
            return Duration::ZERO;
        }
        self.timescale.to_duration(self.segments.total_duration())
    }

    pub fn needs_update(&self, now: Instant, number: Option<u64>, policy: &RefreshPolicy) -> bool {
        if self.is_failed(policy) {
            return false;
        }
        if !self.loaded {
            return true;
        }
        if !self.live || self.source == SegmentSource::Inline {
            return false;
        }
        let Some(last_update) = self.last_update else {
            return true;
        };

        let interval = self.update_interval(policy);
        if now.saturating_duration_since(last_update) < interval {
            return false;
        }
        match number {
            Some(number) => self.min_ahead_time(number) < interval,
            None => true,
        }
    }

    /// `target_duration`, halved after a failed attempt.
    pub fn update_interval(&self, policy: &RefreshPolicy) -> Duration {
        let interval = self.target_duration.unwrap_or(policy.default_interval);
        if self.failed_updates > 0 {
            interval / 2
        } else {
            interval
        }
    }

    /// Buffered media from segment `number` to the end of the list.
    pub fn min_ahead_time(&self, number: u64) -> Duration {
        self.timescale
            .to_duration(self.segments.duration_from(number))
    }

    /// Fetches and merges this representation's own media playlist.
    ///
    /// Failures are counted and stamped so that the refresh cooldown applies to them as well.
    pub async fn run_local_updates<F>(&mut self, fetcher: &F) -> AdaptiveResult<usize>
    where
        F: Fetcher,
    {
        let SegmentSource::Playlist(url) = &self.source else {
            return Ok(0);
        };

        let result = match fetcher.fetch(url, None, ChunkType::Playlist).await {
            Ok(data) => hls::parse_media_playlist(data, url),
            Err(e) => Err(e),
        };

        match result {
            Ok(update) => {
                let appended = self.apply_update(update, true, Instant::now());
                log::debug!(
                    "Representation {} refreshed, {} new segments",
                    self.id,
                    appended
                );
                Ok(appended)
            }
            Err(e) => {
                self.mark_update_failed(Instant::now());
                log::warn!(
                    "Failed to refresh representation {} ({} failures): {e}",
                    self.id,
                    self.failed_updates
                );
                Err(e)
            }
        }
    }

    /// Merges a parsed window. The first successful update loads the representation.
    pub fn apply_update(&mut self, update: SegmentUpdate, restamp: bool, now: Instant) -> usize {
        self.window_start = update.segments.first().map(|s| s.sequence);

        let appended = if self.loaded {
            self.segments.update_with(update.segments, restamp)
        } else {
            let count = update.segments.len();
            self.segments = update.segments;
            self.loaded = true;
            count
        };

        if update.target_duration.is_some() {
            self.target_duration = update.target_duration;
        }
        if self.init_segment.is_none() {
            self.init_segment = update.init_segment;
        }
        if self.format == StreamFormat::Unknown {
            self.format = update.format;
        }
        self.live = update.live;
        self.failed_updates = 0;
        self.last_update = Some(now);
        appended
    }

    pub fn mark_update_failed(&mut self, now: Instant) {
        self.failed_updates += 1;
        self.last_update = Some(now);
    }

    /// Releases live segments that left the upstream window and are older than `current`.
    pub fn prune_before(&mut self, current: u64) -> usize {
        if !self.live {
            return 0;
        }
        let Some(window_start) = self.window_start else {
            return 0;
        };
        self.segments.prune_before(window_start.min(current))
    }

    /// Maps segment `number` of `from` onto this representation.
    ///
    /// Returns `None` when no safe mapping exists; the caller should then switch at the next
    /// segment boundary.
    pub fn translate_segment_number(&self, number: u64, from: &Representation) -> Option<u64> {
        if self.target_duration.is_some() && self.target_duration == from.target_duration {
            return Some(number);
        }

        let source = from.segments.get(number)?;
        if let Some(display_time) = source.display_time {
            if self.segments.iter().any(|s| s.display_time.is_some()) {
                return self
                    .segments
                    .iter()
                    .find(|s| {
                        s.display_time.is_some_and(|start| {
                            let length = self.timescale.to_duration(s.duration);
                            chrono::Duration::from_std(length)
                                .ok()
                                .and_then(|length| start.checked_add_signed(length))
                                .is_some_and(|end| start <= display_time && display_time < end)
                        })
                    })
                    .map(|s| s.sequence);
            }
        }

        let from_first = from.segments.first()?;
        let from_total = from.segments.total_duration();
        let own_first = self.segments.first()?;
        let own_total = self.segments.total_duration();
        if from_total == 0 || own_total == 0 {
            return None;
        }

        let offset = source.start.saturating_sub(from_first.start) as u128;
        let scaled = offset * own_total as u128 / from_total as u128;
        self.segments
            .segment_number_by_time(own_first.start.saturating_add(scaled as u64))
    }

    /// Sequence number to begin playback with.
    pub fn start_sequence(&self, policy: &RefreshPolicy, start_offset: Option<f64>) -> Option<u64> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;

        if let Some(offset) = start_offset {
            let time = if offset >= 0.0 {
                first.start.saturating_add(self.timescale.from_secs_f64(offset))
            } else {
                last.end()
                    .saturating_sub(self.timescale.from_secs_f64(-offset))
                    .max(first.start)
            };
            if let Some(number) = self.segments.segment_number_by_time(time) {
                return Some(number);
            }
        }

        if self.live {
            let behind = policy.live_start_segments.max(1);
            let index = self.segments.len().saturating_sub(behind);
            return self.segments.iter().nth(index).map(|s| s.sequence);
        }
        Some(first.sequence)
    }

    pub fn segment(&self, number: u64) -> Option<&Segment> {
        self.segments.get(number)
    }

    pub fn segment_number_by_time(&self, time: Duration) -> Option<u64> {
        self.segments
            .segment_number_by_time(self.timescale.from_duration(time))
    }

    /// Presentation time of the start of segment `number`.
    pub fn playback_time(&self, number: u64) -> Option<Duration> {
        self.segments
            .get(number)
            .map(|s| self.timescale.to_duration(s.start))
    }

    /// Time range covered by the currently known segments.
    pub fn time_range(&self) -> Option<(Duration, Duration)> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        Some((
            self.timescale.to_duration(first.start),
            self.timescale.to_duration(last.end()),
        ))
    }

    /// Turns a freshly parsed inline representation into an update for its older copy.
    pub(crate) fn into_update(self) -> SegmentUpdate {
        SegmentUpdate {
            segments: self.segments,
            init_segment: self.init_segment,
            target_duration: self.target_duration,
            live: self.live,
            format: self.format,
        }
    }
}
