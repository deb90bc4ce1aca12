use std::sync::{Arc, Mutex};
use std::time::Duration;

use hlsbridge_server::advertise::{AdvertiseError, ServiceAdvertiser};
use hlsbridge_server::error::PublishError;
use hlsbridge_server::publisher::{PublishPhase, Publisher, PublisherSettings, StopReason};
use hlsbridge_transcoder::area::OutputArea;

fn settings(startup_timeout: Duration) -> PublisherSettings {
    PublisherSettings {
        startup_timeout,
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Remembers every call instead of touching the network.
#[derive(Default)]
struct RecordingAdvertiser {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl ServiceAdvertiser for RecordingAdvertiser {
    fn advertise(&self, name: &str, port: u16) -> Result<String, AdvertiseError> {
        self.calls.lock().unwrap().push(format!("advertise {name} {port}"));
        if self.fail {
            return Err(AdvertiseError::Mdns(mdns_sd::Error::Msg("no multicast".into())));
        }
        Ok(format!("{name}._http._tcp.local."))
    }

    fn withdraw(&self, registration: &str) {
        self.calls.lock().unwrap().push(format!("withdraw {registration}"));
    }
}

fn is_listening(port: u16) -> bool {
    std::net::TcpStream::connect(("127.0.0.1", port)).is_ok()
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let area = OutputArea::create(root.path(), "html").unwrap();
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let err = Publisher::start(&area, port, "Test", settings(Duration::from_secs(10)), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PublishError::BindFailed { port: p, .. } if p == port));
}

#[tokio::test]
async fn placeholder_then_stop_releases_port() {
    let root = tempfile::tempdir().unwrap();
    let area = OutputArea::create(root.path(), "html").unwrap();
    let publisher = Publisher::start(&area, 0, "Driveway", settings(Duration::from_secs(10)), None)
        .await
        .unwrap();
    let port = publisher.local_addr().port();
    assert_eq!(publisher.phase(), PublishPhase::AwaitingFirstSegment);

    let body = reqwest::get(format!("http://127.0.0.1:{port}/stream.m3u8"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("<title>Driveway</title>"));
    assert!(body.contains("URL=/"));

    let mut phase = publisher.subscribe_phase();
    publisher.stop().await;
    assert_eq!(*phase.borrow_and_update(), PublishPhase::Stopped(StopReason::Requested));
    assert!(!is_listening(port));
}

#[tokio::test]
async fn watchdog_switches_without_requests() {
    let root = tempfile::tempdir().unwrap();
    let area = OutputArea::create(root.path(), "html").unwrap();
    let publisher = Publisher::start(&area, 0, "Test", settings(Duration::from_secs(10)), None)
        .await
        .unwrap();

    std::fs::write(area.index_path(), "#EXTM3U\n").unwrap();
    std::fs::write(area.dir().join("stream0.ts"), b"x").unwrap();

    let mut phase = publisher.subscribe_phase();
    tokio::time::timeout(
        Duration::from_secs(5),
        phase.wait_for(|p| *p == PublishPhase::Publishing),
    )
    .await
    .unwrap()
    .unwrap();

    publisher.stop().await;
}

#[tokio::test]
async fn startup_timeout_stops_listener() {
    let root = tempfile::tempdir().unwrap();
    let area = OutputArea::create(root.path(), "html").unwrap();
    let publisher = Publisher::start(&area, 0, "Test", settings(Duration::from_millis(200)), None)
        .await
        .unwrap();
    let port = publisher.local_addr().port();

    let mut phase = publisher.subscribe_phase();
    tokio::time::timeout(
        Duration::from_secs(5),
        phase.wait_for(|p| matches!(p, PublishPhase::Stopped(_))),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(publisher.phase(), PublishPhase::Stopped(StopReason::StartupTimeout));

    // stop() after a timeout keeps the timeout as the recorded reason
    publisher.stop().await;
    assert_eq!(*phase.borrow(), PublishPhase::Stopped(StopReason::StartupTimeout));
    assert!(!is_listening(port));
}

#[tokio::test]
async fn advertises_stream_name_until_stopped() {
    let root = tempfile::tempdir().unwrap();
    let area = OutputArea::create(root.path(), "html").unwrap();
    let advertiser = Arc::new(RecordingAdvertiser::default());
    let publisher = Publisher::start(
        &area,
        0,
        "Driveway",
        settings(Duration::from_secs(10)),
        Some(advertiser.clone()),
    )
    .await
    .unwrap();
    let port = publisher.local_addr().port();
    assert_eq!(*advertiser.calls.lock().unwrap(), vec![format!("advertise Driveway {port}")]);

    publisher.stop().await;
    assert_eq!(
        *advertiser.calls.lock().unwrap(),
        vec![
            format!("advertise Driveway {port}"),
            "withdraw Driveway._http._tcp.local.".to_string(),
        ]
    );
}

#[tokio::test]
async fn failed_advertisement_still_serves() {
    let root = tempfile::tempdir().unwrap();
    let area = OutputArea::create(root.path(), "html").unwrap();
    let advertiser = Arc::new(RecordingAdvertiser {
        fail: true,
        ..Default::default()
    });
    let publisher = Publisher::start(
        &area,
        0,
        "Driveway",
        settings(Duration::from_secs(10)),
        Some(advertiser.clone()),
    )
    .await
    .unwrap();
    assert!(is_listening(publisher.local_addr().port()));

    publisher.stop().await;
    // Nothing registered, nothing to withdraw
    assert_eq!(advertiser.calls.lock().unwrap().len(), 1);
}
