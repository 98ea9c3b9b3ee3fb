use std::{sync::Arc, time::Duration};

use adaptive::{
    encryption::Keyring, prelude::*, AdaptiveError, AdaptiveResult, ChunkType, ControlQuery,
    ControlReply, DemuxChunk, DemuxStatus, Demuxer, ManagerConfig, MemoryFetcher,
    PlaylistManager,
};
use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use url::Url;

use crate::AssertWrapper;

/// Records everything the manager hands out.
#[derive(Default)]
pub(crate) struct Collector {
    pub(crate) chunks: Vec<(usize, DemuxChunk)>,
    pub(crate) events: Vec<(usize, TrackerEvent)>,
}

impl Collector {
    pub(crate) fn sequences(&self, stream: usize) -> Vec<u64> {
        self.chunks
            .iter()
            .filter(|(s, c)| *s == stream && c.kind == ChunkType::Segment)
            .map(|(_, c)| c.sequence)
            .collect()
    }
}

impl Demuxer for Collector {
    async fn push(&mut self, stream: usize, chunk: DemuxChunk) -> AdaptiveResult<()> {
        self.chunks.push((stream, chunk));
        Ok(())
    }

    fn on_event(&mut self, stream: usize, event: &TrackerEvent) {
        self.events.push((stream, event.clone()));
    }
}

const BASE: &str = "https://example.com/vod/";
const KEY: [u8; 16] = *b"0123456789abcdef";

const VOD: &str = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:10,
s0.ts
#EXTINF:10,
s1.ts
#EXTINF:10,
s2.ts
#EXT-X-ENDLIST
";

const LIVE: &str = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:5
#EXTINF:10,
s5.ts
#EXTINF:10,
s6.ts
";

const LIVE_NEXT: &str = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:6
#EXTINF:10,
s6.ts
#EXTINF:10,
s7.ts
";

fn url(path: &str) -> Url {
    Url::parse(BASE).unwrap().join(path).unwrap()
}

fn fetcher_with(playlist: &str, segments: &[&str]) -> Arc<MemoryFetcher> {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(url("index.m3u8").as_str(), playlist.to_string());
    for segment in segments {
        fetcher.insert(url(segment).as_str(), format!("\x47{segment}"));
    }
    fetcher
}

async fn open(
    fetcher: &Arc<MemoryFetcher>,
) -> AdaptiveResult<PlaylistManager<Arc<MemoryFetcher>, Collector>> {
    crate::init_tracing();
    PlaylistManager::open(
        url("index.m3u8"),
        fetcher.clone(),
        Collector::default(),
        ManagerConfig::default(),
    )
    .await
}

async fn demux_all<F>(manager: &mut PlaylistManager<F, Collector>) -> AdaptiveResult<usize>
where
    F: adaptive::Fetcher,
{
    let mut demuxed = 0;
    loop {
        match manager.demux().await? {
            DemuxStatus::Demuxed => demuxed += 1,
            DemuxStatus::EndOfStream => return Ok(demuxed),
            status => panic!("unexpected status {status:?}"),
        }
    }
}

fn encrypt(iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<aes::Aes128>::new(&KEY.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data)
}

#[tokio::test]
async fn demuxes_in_sequence_order() -> anyhow::Result<()> {
    let fetcher = fetcher_with(VOD, &["s0.ts", "s1.ts", "s2.ts"]);
    let mut manager = open(&fetcher).await?;

    assert_eq!(demux_all(&mut manager).await?, 3);
    let collector = manager.demuxer();
    assert_eq!(collector.sequences(0), vec![0, 1, 2]);

    let (_, first) = &collector.chunks[0];
    assert_eq!(first.format, StreamFormat::MpegTs);
    assert_eq!(first.representation, "0");
    assert_eq!(&first.data[..], b"\x47s0.ts");
    let starts: Vec<_> = collector.chunks.iter().map(|(_, c)| c.start).collect();
    assert_eq!(
        starts,
        vec![Duration::ZERO, Duration::from_secs(10), Duration::from_secs(20)]
    );

    assert_eq!(
        collector.events[0],
        (
            0,
            TrackerEvent::RepresentationSwitch {
                prev: None,
                next: 0
            }
        )
    );
    assert_eq!(collector.events[1], (0, TrackerEvent::FormatChange(StreamFormat::MpegTs)));
    assert!(matches!(
        collector.events[2],
        (0, TrackerEvent::SegmentChange { sequence: 0, .. })
    ));

    // Finished streams stay finished
    assert_eq!(manager.demux().await?, DemuxStatus::EndOfStream);
    Ok(())
}

#[tokio::test]
async fn decrypts_with_explicit_and_derived_iv() -> anyhow::Result<()> {
    let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:7
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x000102030405060708090a0b0c0d0e0f
#EXTINF:10,
s7.ts
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:10,
s8.ts
#EXT-X-ENDLIST
";
    let fetcher = fetcher_with(playlist, &[]);
    fetcher.insert(url("key.bin").as_str(), KEY.to_vec());

    let explicit: [u8; 16] = std::array::from_fn(|i| i as u8);
    let mut derived = [0u8; 16];
    derived[15] = 8;
    fetcher.insert(url("s7.ts").as_str(), encrypt(&explicit, b"\x47segment seven"));
    fetcher.insert(url("s8.ts").as_str(), encrypt(&derived, b"\x47segment eight"));

    let keyring = Arc::new(Keyring::new(4));
    let mut manager = PlaylistManager::open_with_keyring(
        url("index.m3u8"),
        fetcher.clone(),
        Collector::default(),
        ManagerConfig::default(),
        keyring.clone(),
    )
    .await?;

    assert_eq!(demux_all(&mut manager).await?, 2);
    let chunks = &manager.demuxer().chunks;
    assert_eq!(&chunks[0].1.data[..], b"\x47segment seven");
    assert_eq!(&chunks[1].1.data[..], b"\x47segment eight");

    assert_eq!(fetcher.fetch_count(url("key.bin").as_str()), 1);
    assert!(keyring.contains(&url("key.bin")).await);
    Ok(())
}

#[tokio::test]
async fn wrong_key_skips_chunk_and_invalidates() -> anyhow::Result<()> {
    let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:10,
s0.ts
#EXT-X-ENDLIST
";
    let fetcher = fetcher_with(playlist, &["s0.ts"]);
    fetcher.insert(url("key.bin").as_str(), vec![0u8; 16]);
    let mut manager = open(&fetcher).await?;

    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    assert!(manager.demuxer().chunks.is_empty());
    assert!(!manager.keyring().contains(&url("key.bin")).await);
    assert_eq!(manager.demux().await?, DemuxStatus::EndOfStream);
    Ok(())
}

#[tokio::test]
async fn byte_ranges_slice_the_resource() -> anyhow::Result<()> {
    let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-BYTERANGE:4@0
#EXTINF:10,
all.ts
#EXT-X-BYTERANGE:6
#EXTINF:10,
all.ts
#EXT-X-ENDLIST
";
    let fetcher = fetcher_with(playlist, &[]);
    fetcher.insert(url("all.ts").as_str(), &b"\x47abc\x47defgh"[..]);
    let mut manager = open(&fetcher).await?;

    assert_eq!(demux_all(&mut manager).await?, 2);
    let chunks = &manager.demuxer().chunks;
    assert_eq!(&chunks[0].1.data[..], b"\x47abc");
    assert_eq!(&chunks[1].1.data[..], b"\x47defgh");
    Ok(())
}

#[tokio::test]
async fn failed_segment_is_retried_then_skipped() -> anyhow::Result<()> {
    let fetcher = fetcher_with(VOD, &["s0.ts", "s2.ts"]);
    let mut manager = open(&fetcher).await?;

    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    assert_eq!(fetcher.fetch_count(url("s1.ts").as_str()), 3);
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demuxer().sequences(0), vec![0, 2]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn live_refresh_until_failure_threshold() -> anyhow::Result<()> {
    let fetcher = fetcher_with(LIVE, &["s5.ts", "s6.ts", "s7.ts"]);
    let playlist_url = url("index.m3u8");
    let mut manager = open(&fetcher).await?;
    assert_eq!(manager.control(ControlQuery::IsLive).await?, ControlReply::Bool(true));

    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    assert_eq!(fetcher.fetch_count(playlist_url.as_str()), 1);

    // Cooldown not elapsed yet
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    assert_eq!(fetcher.fetch_count(playlist_url.as_str()), 1);

    fetcher.insert(playlist_url.as_str(), LIVE_NEXT.to_string());
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(fetcher.fetch_count(playlist_url.as_str()), 2);
    assert_eq!(manager.demuxer().sequences(0), vec![5, 6, 7]);
    let (_, seventh) = &manager.demuxer().chunks[2];
    assert_eq!(seventh.start, Duration::from_secs(20));

    fetcher.remove(playlist_url.as_str());
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    // Interval is halved after a failure
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    // Given up once the failure count exceeds the maximum of 3
    tokio::time::advance(Duration::from_secs(5)).await;
    let result = manager.demux().await;
    assert!(matches!(result, Err(AdaptiveError::AllRepresentationsFailed(_))));
    assert_eq!(fetcher.fetch_count(playlist_url.as_str()), 6);
    Ok(())
}

#[tokio::test]
async fn cancelled_manager_refuses_to_demux() -> anyhow::Result<()> {
    let fetcher = fetcher_with(VOD, &["s0.ts", "s1.ts", "s2.ts"]);
    let mut manager = open(&fetcher).await?;

    manager.cancellation_token().cancel();
    let result = manager.demux().await;
    assert!(matches!(result, Err(AdaptiveError::Cancelled)));
    assert!(manager.demuxer().chunks.is_empty());
    Ok(())
}

#[tokio::test]
async fn vod_control_queries() -> anyhow::Result<()> {
    let fetcher = fetcher_with(VOD, &["s0.ts", "s1.ts", "s2.ts"]);
    let mut manager = open(&fetcher).await?;

    assert_eq!(manager.control(ControlQuery::CanSeek).await?, ControlReply::Bool(true));
    assert_eq!(manager.control(ControlQuery::CanPause).await?, ControlReply::Bool(true));
    assert_eq!(manager.control(ControlQuery::IsLive).await?, ControlReply::Bool(false));
    assert_eq!(
        manager.control(ControlQuery::GetLength).await?,
        ControlReply::Time(Duration::from_secs(30))
    );

    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(
        manager.control(ControlQuery::GetTime).await?,
        ControlReply::Time(Duration::from_secs(10))
    );

    manager.control(ControlQuery::SetPause(true)).await?;
    assert_eq!(manager.demux().await?, DemuxStatus::Paused);
    manager.control(ControlQuery::SetPause(false)).await?;

    assert_eq!(
        manager.control(ControlQuery::SetTime(Duration::from_secs(5))).await?,
        ControlReply::Bool(true)
    );
    assert_eq!(
        manager.control(ControlQuery::GetPosition).await?,
        ControlReply::Position(5.0 / 30.0)
    );
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demuxer().sequences(0), vec![0, 1, 0]);
    assert!(manager
        .demuxer()
        .events
        .iter()
        .any(|(_, e)| *e == TrackerEvent::PositionChange { resume: Duration::ZERO }));

    assert_eq!(
        manager.control(ControlQuery::SetPosition(0.9)).await?,
        ControlReply::Bool(true)
    );
    assert_eq!(demux_all(&mut manager).await?, 1);
    assert_eq!(manager.demuxer().sequences(0), vec![0, 1, 0, 2]);

    let result = manager
        .control(ControlQuery::SetStreamEnabled {
            stream: 9,
            enabled: true,
        })
        .await;
    assert!(matches!(result, Err(AdaptiveError::UnknownStream(9))));
    Ok(())
}

#[tokio::test]
async fn live_control_queries() -> anyhow::Result<()> {
    let fetcher = fetcher_with(LIVE, &["s5.ts", "s6.ts"]);
    let mut manager = open(&fetcher).await?;

    assert_eq!(manager.control(ControlQuery::CanSeek).await?, ControlReply::Bool(false));
    assert_eq!(manager.control(ControlQuery::CanPause).await?, ControlReply::Bool(false));
    assert!(matches!(
        manager.control(ControlQuery::GetLength).await,
        Err(AdaptiveError::UnknownLength)
    ));
    assert!(matches!(
        manager.control(ControlQuery::GetPosition).await,
        Err(AdaptiveError::UnknownLength)
    ));
    assert!(matches!(
        manager.control(ControlQuery::SetPause(true)).await,
        Err(AdaptiveError::NotPausable)
    ));
    assert!(matches!(
        manager.control(ControlQuery::SetTime(Duration::from_secs(1))).await,
        Err(AdaptiveError::NotSeekable)
    ));
    Ok(())
}

#[tokio::test]
async fn unsupported_manifests() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("https://example.com/video.ism/Manifest", "<SmoothStreamingMedia/>");
    fetcher.insert("https://example.com/play", "hello");

    for target in ["https://example.com/video.ism/Manifest", "https://example.com/play"] {
        let result = PlaylistManager::open(
            Url::parse(target).unwrap(),
            fetcher.clone(),
            Collector::default(),
            ManagerConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(AdaptiveError::UnsupportedManifest(_))));
    }

    PlaylistManager::open(
        Url::parse("https://example.com/missing.m3u8").unwrap(),
        fetcher.clone(),
        Collector::default(),
        ManagerConfig::default(),
    )
    .await
    .map(|_| ())
    .assert_error();
}
