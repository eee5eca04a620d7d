mod common;

use common::{Harness, payload, url};
use object_transfer::{ChannelObserver, ProgressEvent, Rate, TransferOptions};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn assert_single_final(events: &[ProgressEvent], size: u64) {
    let finals: Vec<_> = events.iter().filter(|e| e.is_done).collect();
    assert_eq!(finals.len(), 1, "{events:?}");
    let last = events.last().unwrap();
    assert!(last.is_done);
    assert_eq!(last.bytes_transferred, size);
    assert_eq!(last.total, Some(size));
}

#[tokio::test]
async fn throttled_upload_reports_periodically_then_once_at_the_end() {
    let h = Harness::new().await;
    let data = payload(10_000);
    let src = h.write_file("ten-k.bin", &data);

    let (observer, mut rx) = ChannelObserver::new();
    let options = TransferOptions::new()
        .with_progress(observer)
        .with_progress_interval_ms(200)
        .with_rate_limit(Rate::new(5_000).unwrap());

    let report = h
        .service()
        .upload(&src, &url("ten-k.bin"), &options)
        .await
        .unwrap();
    assert!(report.verification.is_verified());
    assert!(report.elapsed >= Duration::from_millis(1_500), "{:?}", report.elapsed);

    let events = drain(&mut rx);
    let periodic: Vec<_> = events.iter().filter(|e| !e.is_done).collect();
    assert!(!periodic.is_empty(), "{events:?}");
    assert!(
        periodic
            .windows(2)
            .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred)
    );
    assert!(periodic.iter().all(|e| e.bytes_transferred <= 10_000));
    assert_single_final(&events, 10_000);
    assert_eq!(events.last().unwrap().label.as_deref(), Some(url("ten-k.bin").as_str()));

    // Nothing arrives after the final event.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn zero_interval_emits_only_the_final_event() {
    let h = Harness::new().await;
    let data = payload(4_000);
    let src = h.write_file("four-k.bin", &data);
    h.service()
        .upload(&src, &url("four-k.bin"), &TransferOptions::new())
        .await
        .unwrap();

    let (observer, mut rx) = ChannelObserver::new();
    let options = TransferOptions::new()
        .with_progress(observer)
        .with_progress_interval_ms(0)
        .with_rate_limit(Rate::new(8_000).unwrap());

    h.service()
        .download(&url("four-k.bin"), &h.path("four-k.out"), &options)
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1, "{events:?}");
    assert_single_final(&events, 4_000);
}
