mod representation;
mod segment;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

pub use representation::*;
pub use segment::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Hls,
    Dash,
    Smooth,
}

impl ManifestKind {
    /// Guesses the manifest type from the URL extension, then from the leading bytes.
    pub fn detect(url: &Url, content: &[u8]) -> Option<Self> {
        let path = url.path().to_lowercase();
        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            return Some(Self::Hls);
        } else if path.ends_with(".mpd") {
            return Some(Self::Dash);
        } else if path.ends_with("/manifest") || path.ends_with(".ism") {
            return Some(Self::Smooth);
        }

        let text = String::from_utf8_lossy(&content[..content.len().min(512)]);
        let text = text.trim_start_matches('\u{feff}').trim_start();
        if text.starts_with("#EXTM3U") {
            Some(Self::Hls)
        } else if text.contains("<MPD") {
            Some(Self::Dash)
        } else if text.contains("<SmoothStreamingMedia") {
            Some(Self::Smooth)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    MpegTs,
    Mp4,
    PackedAac,
    WebVtt,
    /// Modeled but never selected for playback.
    Unsupported,
    #[default]
    Unknown,
}

impl StreamFormat {
    pub fn as_ext(&self) -> &str {
        match self {
            Self::MpegTs => "ts",
            Self::Mp4 => "mp4",
            Self::PackedAac => "aac",
            Self::WebVtt => "vtt",
            Self::Unsupported | Self::Unknown => "bin",
        }
    }

    pub fn from_filename(s: &str) -> Self {
        let (_, ext) = s.rsplit_once('.').unwrap_or(("", s));
        match ext.to_lowercase().as_str() {
            "ts" | "m2ts" | "mts" => Self::MpegTs,
            "mp4" | "m4s" | "m4f" | "m4v" | "m4a" | "cmfv" | "cmfa" => Self::Mp4,
            "aac" | "adts" => Self::PackedAac,
            "vtt" | "webvtt" => Self::WebVtt,
            _ => Self::Unknown,
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        match mime.to_lowercase().as_str() {
            "video/mp4" | "audio/mp4" | "application/mp4" => Self::Mp4,
            "video/mp2t" => Self::MpegTs,
            "audio/aac" => Self::PackedAac,
            "text/vtt" => Self::WebVtt,
            "" => Self::Unknown,
            _ => Self::Unsupported,
        }
    }

    /// Guesses the container from the first bytes of a chunk.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(b"WEBVTT") || data.starts_with("\u{feff}WEBVTT".as_bytes()) {
            Self::WebVtt
        } else if data.len() >= 8
            && matches!(&data[4..8], b"ftyp" | b"styp" | b"moof" | b"moov" | b"sidx")
        {
            Self::Mp4
        } else if data.first() == Some(&0x47) && data.get(188).map_or(true, |b| *b == 0x47) {
            Self::MpegTs
        } else if data.starts_with(b"ID3")
            || (data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF6 == 0xF0)
        {
            // ADTS sync word, or the ID3 timestamp leading packed audio
            Self::PackedAac
        } else {
            Self::Unknown
        }
    }

    pub fn is_playable(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    Main,
    Alternate,
    Supplementary,
    Subtitle,
    #[default]
    Unspecified,
}

impl Role {
    pub fn from_dash(value: &str) -> Self {
        match value {
            "main" => Self::Main,
            "alternate" | "dub" => Self::Alternate,
            "supplementary" | "commentary" => Self::Supplementary,
            "subtitle" | "caption" => Self::Subtitle,
            _ => Self::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationSet {
    pub id: String,
    pub lang: Option<String>,
    pub description: Option<String>,
    pub role: Role,
    pub segment_aligned: bool,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn representation(&self, id: &str) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Period {
    pub id: String,
    pub start: Duration,
    pub duration: Option<Duration>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

/// Root of a parsed manifest.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub kind: ManifestKind,
    pub url: Url,
    pub periods: Vec<Period>,
    /// `MPD@type="dynamic"`; HLS liveness is carried by the representations.
    pub dynamic: bool,
    pub minimum_update_period: Option<Duration>,
    pub presentation_duration: Option<Duration>,
    pub time_shift_buffer_depth: Option<Duration>,
    pub availability_start_time: Option<DateTime<Utc>>,
    /// Start offset in seconds, negative values count from the end.
    pub start_offset: Option<f64>,
    pub session_keys: Vec<Url>,
}

impl Playlist {
    pub fn new(kind: ManifestKind, url: Url) -> Self {
        Self {
            kind,
            url,
            periods: Vec::new(),
            dynamic: false,
            minimum_update_period: None,
            presentation_duration: None,
            time_shift_buffer_depth: None,
            availability_start_time: None,
            start_offset: None,
            session_keys: Vec::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.dynamic || self.representations().any(|r| r.is_live())
    }

    /// Total duration, zero while the presentation is live.
    pub fn duration(&self) -> Duration {
        if self.is_live() {
            return Duration::ZERO;
        }
        if let Some(duration) = self.presentation_duration {
            return duration;
        }
        self.representations()
            .map(|r| r.duration())
            .max()
            .unwrap_or_default()
    }

    pub fn representations(&self) -> impl Iterator<Item = &Representation> {
        self.periods
            .iter()
            .flat_map(|p| p.adaptation_sets.iter())
            .flat_map(|s| s.representations.iter())
    }

    pub fn first_period(&self) -> Option<&Period> {
        self.periods.first()
    }

    pub fn first_period_mut(&mut self) -> Option<&mut Period> {
        self.periods.first_mut()
    }
}
