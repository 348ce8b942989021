mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use maya_engine::TracingLogger;
use maya_engine::hls::{
    AcquisitionEvent, AcquisitionRequest, HlsConfig, HlsDownloader, HlsDownloaderError, JobStage,
    JobState,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{TestServer, media_playlist, segment_body};

fn fast_config() -> HlsConfig {
    HlsConfig::builder()
        .segment_retry_delay_base(Duration::from_millis(10))
        .max_retry_delay(Duration::from_millis(50))
        .retry_jitter(false)
        .build()
}

fn downloader(config: HlsConfig) -> HlsDownloader {
    HlsDownloader::new(config, Arc::new(TracingLogger::default())).unwrap()
}

/// Serves `count` segments under `vod/` and returns their concatenation
fn publish_vod(server: &TestServer, count: usize) -> Vec<u8> {
    let names: Vec<String> = (0..count).map(|i| format!("seg{i}.ts")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    server.put("vod/index.m3u8", media_playlist(&refs));
    (0..count)
        .map(|i| {
            let body = segment_body(i);
            server.put(&format!("vod/seg{i}.ts"), body.clone());
            body
        })
        .collect::<Vec<_>>()
        .concat()
}

fn request(server: &TestServer, tmp: &TempDir) -> AcquisitionRequest {
    AcquisitionRequest::new(
        server.url("vod/index.m3u8"),
        tmp.path().join("out").join("vod.ts"),
        tmp.path().join("out").join(".vod.parts"),
    )
}

#[tokio::test]
async fn downloads_and_merges_in_playlist_order() {
    let server = TestServer::start().await;
    let expected = publish_vod(&server, 3);
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp).with_concurrency(2);

    let report = downloader(fast_config())
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&req.output_path).await.unwrap(), expected);
    assert_eq!(report.total_segments, 3);
    assert_eq!(report.downloaded_segments, 3);
    assert_eq!(report.reused_segments, 0);
    assert_eq!(report.bytes, expected.len() as u64);
    assert_eq!(report.duration_seconds, 12.0);
    for i in 0..3 {
        assert_eq!(server.hits(&format!("vod/seg{i}.ts")), 1);
    }
    assert!(!req.temp_dir.exists());
}

#[tokio::test]
async fn rejected_segment_fails_the_job_without_output() {
    let server = TestServer::start().await;
    publish_vod(&server, 3);
    server.fail_always("vod/seg1.ts", StatusCode::NOT_FOUND);
    // segment 0 finishes before the rejection arrives
    server.delay("vod/seg1.ts", Duration::from_millis(300));
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp).with_concurrency(2);

    let err = downloader(fast_config())
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage, JobStage::Downloading);
    assert_eq!(err.segment_index(), Some(1));
    assert!(matches!(
        err.source,
        HlsDownloaderError::SegmentRejected { index: 1, status, .. } if status == StatusCode::NOT_FOUND
    ));
    assert_eq!(server.hits("vod/seg1.ts"), 1);
    assert!(!req.output_path.exists());
    assert_eq!(
        tokio::fs::read(req.temp_dir.join("segment-0")).await.unwrap(),
        segment_body(0)
    );
    assert!(!req.temp_dir.join("segment-1").exists());
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = TestServer::start().await;
    let expected = publish_vod(&server, 2);
    server.fail_times("vod/seg0.ts", StatusCode::SERVICE_UNAVAILABLE, 2);
    server.fail_times("vod/index.m3u8", StatusCode::BAD_GATEWAY, 1);
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp);

    downloader(fast_config())
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(server.hits("vod/index.m3u8"), 2);
    assert_eq!(server.hits("vod/seg0.ts"), 3);
    assert_eq!(tokio::fs::read(&req.output_path).await.unwrap(), expected);
}

#[tokio::test]
async fn master_playlist_selects_highest_bandwidth_variant() {
    let server = TestServer::start().await;
    server.put(
        "live/master.m3u8",
        "#EXTM3U\n\
         #EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=640x360\n\
         low/index.m3u8\n\
         #EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=1280x720\n\
         high/index.m3u8\n\
         #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=960x540\n\
         mid/index.m3u8\n",
    );
    for variant in ["low", "mid", "high"] {
        server.put(
            &format!("live/{variant}/index.m3u8"),
            media_playlist(&["a.ts", "b.ts"]),
        );
        server.put(&format!("live/{variant}/a.ts"), format!("{variant}-a"));
        server.put(&format!("live/{variant}/b.ts"), format!("{variant}-b"));
    }
    let tmp = TempDir::new().unwrap();
    let req = AcquisitionRequest::new(
        server.url("live/master.m3u8"),
        tmp.path().join("show.ts"),
        tmp.path().join(".show.parts"),
    );

    let report = downloader(fast_config())
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.playlist.is_master);
    assert_eq!(
        tokio::fs::read(&req.output_path).await.unwrap(),
        b"high-ahigh-b"
    );
    assert_eq!(server.hits("live/high/index.m3u8"), 1);
    assert_eq!(server.hits("live/low/index.m3u8"), 0);
    assert_eq!(server.hits("live/mid/index.m3u8"), 0);
}

#[tokio::test]
async fn interrupted_job_resumes_without_refetching_completed_segments() {
    let server = TestServer::start().await;
    let expected = publish_vod(&server, 3);
    server.fail_always("vod/seg2.ts", StatusCode::FORBIDDEN);
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp).with_concurrency(1);
    let job = downloader(fast_config());

    let err = job
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_resumable());
    assert!(err.needs_download());

    server.clear_faults();
    let report = job
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.reused_segments, 2);
    assert_eq!(report.downloaded_segments, 1);
    assert_eq!(server.hits("vod/seg0.ts"), 1);
    assert_eq!(server.hits("vod/seg1.ts"), 1);
    assert_eq!(server.hits("vod/seg2.ts"), 2);
    assert_eq!(tokio::fs::read(&req.output_path).await.unwrap(), expected);
}

#[tokio::test]
async fn completed_temp_dir_needs_no_downloads_on_rerun() {
    let server = TestServer::start().await;
    let expected = publish_vod(&server, 4);
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp);
    let config = HlsConfig::builder()
        .remove_temp_dir_on_success(false)
        .build();
    let job = downloader(config);

    job.start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();
    tokio::fs::remove_file(&req.output_path).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let report = job
        .with_event_handler(Arc::new(move |event: AcquisitionEvent| {
            sink.lock().unwrap().push(event);
        }))
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded_segments, 0);
    assert_eq!(report.reused_segments, 4);
    assert_eq!(server.hits_matching(".ts"), 4);
    assert_eq!(tokio::fs::read(&req.output_path).await.unwrap(), expected);

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        AcquisitionEvent::ResumePlanned { total_segments: 4, already_complete: 4, .. }
    )));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, AcquisitionEvent::SegmentCompleted { .. }))
    );
}

#[tokio::test]
async fn empty_playlist_fails_before_any_segment_request() {
    let server = TestServer::start().await;
    server.put(
        "vod/index.m3u8",
        "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-ENDLIST\n",
    );
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp);

    let err = downloader(fast_config())
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage, JobStage::PlaylistFetched);
    assert!(matches!(err.source, HlsDownloaderError::EmptyPlaylist));
    assert_eq!(server.hits_matching(".ts"), 0);
    assert!(!req.output_path.exists());
}

#[tokio::test]
async fn byte_range_segments_are_requested_as_slices() {
    let server = TestServer::start().await;
    let blob: Vec<u8> = (0u8..=255).cycle().take(3000).collect();
    server.put("vod/all.ts", blob.clone());
    server.put(
        "vod/index.m3u8",
        "#EXTM3U\n#EXT-X-VERSION:4\n#EXT-X-TARGETDURATION:4\n\
         #EXTINF:4.0,\n#EXT-X-BYTERANGE:1000@0\nall.ts\n\
         #EXTINF:4.0,\n#EXT-X-BYTERANGE:1500\nall.ts\n\
         #EXTINF:4.0,\n#EXT-X-BYTERANGE:500\nall.ts\n\
         #EXT-X-ENDLIST\n",
    );
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp).with_concurrency(3);

    downloader(fast_config())
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&req.output_path).await.unwrap(), blob);
    let mut ranges: Vec<String> = server
        .range_requests()
        .into_iter()
        .map(|(_, range)| range)
        .collect();
    ranges.sort();
    assert_eq!(
        ranges,
        vec!["bytes=0-999", "bytes=1000-2499", "bytes=2500-2999"]
    );
}

#[tokio::test]
async fn cancellation_stops_the_job_and_a_rerun_finishes_it() {
    let server = TestServer::start().await;
    let expected = publish_vod(&server, 3);
    for i in 0..3 {
        server.delay(&format!("vod/seg{i}.ts"), Duration::from_secs(5));
    }
    let tmp = TempDir::new().unwrap();
    let req = request(&server, &tmp);
    let job = downloader(fast_config());

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = job.start_download(req.clone(), &token).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(err.source, HlsDownloaderError::Cancelled));
    assert_eq!(err.stage, JobStage::Downloading);
    assert!(err.is_resumable());
    assert!(!req.output_path.exists());

    for i in 0..3 {
        server.delay(&format!("vod/seg{i}.ts"), Duration::ZERO);
    }
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let report = job
        .with_event_handler(Arc::new(move |event: AcquisitionEvent| {
            if let AcquisitionEvent::StateChanged(state) = event {
                sink.lock().unwrap().push(state);
            }
        }))
        .start_download(req.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded_segments, 3);
    assert_eq!(tokio::fs::read(&req.output_path).await.unwrap(), expected);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            JobState::PlaylistFetched,
            JobState::ManifestReady,
            JobState::Downloading,
            JobState::Merging,
            JobState::Done,
        ]
    );
}
