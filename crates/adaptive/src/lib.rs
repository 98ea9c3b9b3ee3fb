pub mod config;
pub mod dash;
pub mod encryption;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod logic;
pub mod manager;
pub mod playlist;
pub mod stream;
pub mod time;
pub mod tracker;
pub mod util;
pub mod xml;

pub use config::ManagerConfig;
pub use error::{AdaptiveError, AdaptiveResult};
pub use fetch::{ChunkType, Fetcher, HttpFetcher, MemoryFetcher};
pub use manager::{
    parse_manifest, ControlQuery, ControlReply, DemuxChunk, DemuxStatus, Demuxer,
    PlaylistManager,
};
pub use playlist::{Playlist, Representation, Segment, SegmentList};
pub use util::range::ByteRange;

pub mod prelude {
    pub use crate::logic::{AdaptationLogic, LogicType};
    pub use crate::playlist::{
        AdaptationSet, ManifestKind, Period, RefreshPolicy, Role, SegmentSource, StreamFormat,
    };
    pub use crate::tracker::{SegmentTracker, TrackerEvent};
}
