use std::{
    collections::{hash_map::Entry, HashMap},
    path::PathBuf,
};

use adaptive::{prelude::*, AdaptiveResult, DemuxChunk, Demuxer};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};

/// Appends the chunks of every stream to `stream-<id>.<ext>` inside a directory.
pub struct FileDemuxer {
    dir: PathBuf,
    files: HashMap<usize, BufWriter<File>>,
}

impl FileDemuxer {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: HashMap::new(),
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        for file in self.files.values_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

impl Demuxer for FileDemuxer {
    async fn push(&mut self, stream: usize, chunk: DemuxChunk) -> AdaptiveResult<()> {
        let file = match self.files.entry(stream) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self
                    .dir
                    .join(format!("stream-{stream}.{}", chunk.format.as_ext()));
                log::info!("Writing stream {stream} to {}", path.display());
                entry.insert(BufWriter::new(File::create(path).await?))
            }
        };
        file.write_all(&chunk.data).await?;
        log::debug!(
            "stream {stream}: {:?} #{} of {} ({} bytes)",
            chunk.kind,
            chunk.sequence,
            chunk.representation,
            chunk.data.len()
        );
        Ok(())
    }

    fn on_event(&mut self, stream: usize, event: &TrackerEvent) {
        match event {
            TrackerEvent::RepresentationSwitch { prev, next } => {
                log::info!("stream {stream}: representation {prev:?} -> {next}")
            }
            TrackerEvent::FormatChange(format) => {
                log::info!("stream {stream}: format {format:?}")
            }
            TrackerEvent::Discontinuity {
                discontinuity_sequence,
            } => log::info!("stream {stream}: discontinuity {discontinuity_sequence}"),
            TrackerEvent::PositionChange { resume } => {
                log::info!("stream {stream}: resuming at {resume:?}")
            }
            TrackerEvent::SegmentChange { .. } => {}
        }
    }
}
