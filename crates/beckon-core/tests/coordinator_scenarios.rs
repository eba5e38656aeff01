//! Tests for the transfer coordinator.
//!
//! These drive a real coordinator with test doubles for the chooser,
//! signaler and fetcher, and check the events it reports and the files it
//! writes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use beckon_core::config::{DeliveryMode, DuplicatePolicy};
use beckon_core::coordinator::{
    Capabilities, CoordinatorConfig, Origin, TransferCoordinator, TransferEvent, TransferState,
};
use beckon_core::resolver::{FixedDestination, PathResolver};
use beckon_core::signal::{HolderAnswer, WebSocketSignaler};
use beckon_core::watcher::FileArrived;
use beckon_core::{Error, FailureReason};

use common::*;

fn fixed(dir: &std::path::Path) -> PathResolver {
    PathResolver::new(Arc::new(FixedDestination::new(dir)))
}

/// The file is already shared when it is requested.
#[tokio::test]
async fn test_file_already_present() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let content = random_bytes(64 * 1024);
    let source = create_test_file(shared.path(), "report.pdf", &content);

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();

    let status = handle.request_file("report.pdf").await.unwrap();
    assert_eq!(status.origin, Origin::LocalAlreadyPresent);
    assert_eq!(status.state, TransferState::AwaitingDestination);

    let seen = events_until_terminal(&mut events).await;
    assert_eq!(copies_started(&seen), 1);
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Completed { bytes, .. }) if *bytes == content.len() as u64
    ));
    assert_files_equal(&source, &downloads.path().join("report.pdf"));
    assert!(source.exists(), "the shared file must be left in place");
    assert!(handle.snapshot().await.unwrap().is_empty());
}

/// Destination first, the file lands in the watched folder later.
#[tokio::test]
async fn test_destination_first_then_arrival() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let target = downloads.path().join("video.mp4");

    let config = CoordinatorConfig {
        debounce_ms: 50,
        ..CoordinatorConfig::new(shared.path())
    };
    let (handle, mut events) =
        TransferCoordinator::spawn(config, Capabilities::local(fixed(downloads.path()))).unwrap();

    let status = handle.request_file_to("video.mp4", &target).await.unwrap();
    assert_eq!(status.state, TransferState::AwaitingFile);
    assert_eq!(status.origin, Origin::LocalPendingArrival);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!target.exists(), "copied before the file arrived");

    let content = random_bytes(16 * 1024);
    let source = create_test_file(shared.path(), "video.mp4", &content);

    let seen = events_until_terminal(&mut events).await;
    let ready = position(&seen, |e| matches!(e, TransferEvent::FileReady { .. }));
    let copying = position(&seen, |e| matches!(e, TransferEvent::Fulfilling { .. }));
    assert!(ready < copying);
    assert_eq!(copies_started(&seen), 1);
    assert!(matches!(seen.last(), Some(TransferEvent::Completed { .. })));
    assert_files_equal(&source, &target);
}

/// The chooser is cancelled and a later arrival is ignored.
#[tokio::test]
async fn test_cancelled_chooser() {
    let shared = create_temp_dir();
    let resolver = PathResolver::new(Arc::new(CancellingChooser));

    let (handle, mut events) =
        TransferCoordinator::spawn(local_config(shared.path()), Capabilities::local(resolver))
            .unwrap();

    handle.request_file("doc.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::NoDestination, .. })
    ));
    assert!(handle.snapshot().await.unwrap().is_empty());

    let path = create_test_file(shared.path(), "doc.txt", b"too late");
    handle
        .file_arrived(FileArrived {
            name: "doc.txt".to_string(),
            path,
        })
        .unwrap();

    // The snapshot is answered after the arrival was handled.
    assert!(handle.snapshot().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());
}

/// The holder cannot be reached.
#[tokio::test]
async fn test_signaling_unreachable() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let (chooser, _gate) = GatedChooser::new(downloads.path());

    let config = local_config(shared.path()).with_peer(closed_port_address());
    let caps = Capabilities::local(PathResolver::new(Arc::new(chooser)))
        .with_signaler(Arc::new(WebSocketSignaler::new(Duration::from_secs(2))));
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    let status = handle.request_file("doc.txt").await.unwrap();
    assert_eq!(status.origin, Origin::RemotePending);
    assert!(status.signaled);

    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::SignalingUnreachable(_), .. })
    ));
    assert_eq!(copies_started(&seen), 0);
    assert!(handle.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_arrivals_copy_once() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let target = downloads.path().join("a.txt");

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();
    handle.request_file_to("a.txt", &target).await.unwrap();

    let path = create_test_file(shared.path(), "a.txt", b"only once");
    for _ in 0..5 {
        handle
            .file_arrived(FileArrived {
                name: "a.txt".to_string(),
                path: path.clone(),
            })
            .unwrap();
    }

    let seen = events_until_terminal(&mut events).await;
    assert_eq!(copies_started(&seen), 1);
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, TransferEvent::FileReady { .. }))
            .count(),
        1
    );

    // Arrivals after completion don't start anything either.
    handle
        .file_arrived(FileArrived {
            name: "a.txt".to_string(),
            path,
        })
        .unwrap();
    assert!(handle.snapshot().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());
    assert_eq!(std::fs::read(&target).unwrap(), b"only once");
}

async fn run_ordering(destination_first: bool) -> (Vec<TransferEvent>, Vec<u8>) {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let (chooser, gate) = GatedChooser::new(downloads.path());

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(PathResolver::new(Arc::new(chooser))),
    )
    .unwrap();
    handle.request_file("notes.md").await.unwrap();
    assert!(matches!(next_event(&mut events).await, TransferEvent::Accepted { .. }));

    let path = create_test_file(shared.path(), "notes.md", b"# notes");
    let arrive = || {
        handle
            .file_arrived(FileArrived {
                name: "notes.md".to_string(),
                path: path.clone(),
            })
            .unwrap();
    };

    if destination_first {
        gate.notify_one();
        assert!(matches!(
            next_event(&mut events).await,
            TransferEvent::DestinationChosen { .. }
        ));
        arrive();
    } else {
        arrive();
        assert!(matches!(next_event(&mut events).await, TransferEvent::FileReady { .. }));
        gate.notify_one();
    }

    let seen = events_until_terminal(&mut events).await;
    let saved = std::fs::read(downloads.path().join("notes.md")).unwrap();
    (seen, saved)
}

#[tokio::test]
async fn test_order_independence() {
    let (dest_first, saved_a) = run_ordering(true).await;
    let (file_first, saved_b) = run_ordering(false).await;

    assert_eq!(copies_started(&dest_first), 1);
    assert_eq!(copies_started(&file_first), 1);
    assert!(matches!(dest_first.last(), Some(TransferEvent::Completed { .. })));
    assert!(matches!(file_first.last(), Some(TransferEvent::Completed { .. })));
    assert_eq!(saved_a, saved_b);
}

#[tokio::test]
async fn test_arrival_without_request_is_ignored() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();

    let path = create_test_file(shared.path(), "stray.bin", b"nobody asked");
    handle
        .file_arrived(FileArrived {
            name: "stray.bin".to_string(),
            path,
        })
        .unwrap();

    assert!(handle.snapshot().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());
    assert!(!downloads.path().join("stray.bin").exists());
}

#[tokio::test]
async fn test_duplicate_request_rejected() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let (chooser, _gate) = GatedChooser::new(downloads.path());

    let (handle, _events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(PathResolver::new(Arc::new(chooser))),
    )
    .unwrap();

    handle.request_file("a.txt").await.unwrap();
    let second = handle.request_file("a.txt").await;
    assert!(matches!(second, Err(Error::DuplicateRequest(name)) if name == "a.txt"));

    // Other names are unaffected.
    handle.request_file("b.txt").await.unwrap();
    assert_eq!(handle.snapshot().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_request_attached() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let (chooser, gate) = GatedChooser::new(downloads.path());

    let config = CoordinatorConfig {
        duplicate_policy: DuplicatePolicy::Attach,
        ..local_config(shared.path())
    };
    let (handle, mut events) = TransferCoordinator::spawn(
        config,
        Capabilities::local(PathResolver::new(Arc::new(chooser))),
    )
    .unwrap();

    let first = handle.request_file("a.txt").await.unwrap();
    let second = handle.request_file("a.txt").await.unwrap();
    assert!(!first.attached);
    assert!(second.attached);
    assert_eq!(first.id, second.id);
    assert_eq!(handle.snapshot().await.unwrap().len(), 1);

    create_test_file(shared.path(), "a.txt", b"shared once");
    handle
        .file_arrived(FileArrived {
            name: "a.txt".to_string(),
            path: shared.path().join("a.txt"),
        })
        .unwrap();
    gate.notify_one();

    let seen = events_until_terminal(&mut events).await;
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, TransferEvent::Accepted { .. }))
            .count(),
        1
    );
    assert_eq!(copies_started(&seen), 1);
}

#[tokio::test]
async fn test_request_timeout() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();

    let config = CoordinatorConfig {
        request_timeout: Some(Duration::from_millis(100)),
        ..local_config(shared.path())
    };
    let (handle, mut events) =
        TransferCoordinator::spawn(config, Capabilities::local(fixed(downloads.path()))).unwrap();

    handle.request_file("never.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;

    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::Timeout(1), .. })
    ));
    assert!(handle.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_mode() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let staging = create_temp_dir();
    let signaler = Arc::new(RecordingSignaler::default());

    let config = CoordinatorConfig {
        mode: DeliveryMode::Fetch,
        staging_dir: staging.path().to_path_buf(),
        ..local_config(shared.path()).with_peer("127.0.0.1:8765")
    };
    let caps = Capabilities::local(fixed(downloads.path()))
        .with_signaler(Arc::clone(&signaler) as _)
        .with_fetcher(Arc::new(StaticFetcher::serving(b"remote bytes")));
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    handle.request_file("remote.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;

    let sent = position(&seen, |e| matches!(e, TransferEvent::RequestSent { .. }));
    let ready = position(&seen, |e| matches!(e, TransferEvent::FileReady { .. }));
    assert!(sent < ready);
    assert!(matches!(seen.last(), Some(TransferEvent::Completed { .. })));
    assert_eq!(
        signaler.calls(),
        vec![("127.0.0.1:8765".to_string(), "remote.txt".to_string())]
    );
    assert_eq!(
        std::fs::read(downloads.path().join("remote.txt")).unwrap(),
        b"remote bytes"
    );
    assert!(!staging.path().join("remote.txt").exists());
    assert!(!shared.path().join("remote.txt").exists());
}

#[tokio::test]
async fn test_fetch_failure() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let staging = create_temp_dir();

    let config = CoordinatorConfig {
        mode: DeliveryMode::Fetch,
        staging_dir: staging.path().to_path_buf(),
        ..local_config(shared.path()).with_peer("127.0.0.1:8765")
    };
    let caps = Capabilities::local(fixed(downloads.path()))
        .with_signaler(Arc::new(RecordingSignaler::default()))
        .with_fetcher(Arc::new(StaticFetcher::failing()));
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    handle.request_file("remote.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;

    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::FetchFailed(_), .. })
    ));
}

#[tokio::test]
async fn test_present_file_is_not_signaled() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let (chooser, gate) = GatedChooser::new(downloads.path());
    let signaler = Arc::new(RecordingSignaler::failing());
    create_test_file(shared.path(), "here.txt", b"already here");

    let config = local_config(shared.path()).with_peer("127.0.0.1:8765");
    let caps = Capabilities::local(PathResolver::new(Arc::new(chooser)))
        .with_signaler(Arc::clone(&signaler) as _);
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    let status = handle.request_file("here.txt").await.unwrap();
    assert!(!status.signaled);
    gate.notify_one();

    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(seen.last(), Some(TransferEvent::Completed { .. })));
    assert!(signaler.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_fails_pending_requests() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let (chooser, _gate) = GatedChooser::new(downloads.path());

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(PathResolver::new(Arc::new(chooser))),
    )
    .unwrap();

    handle.request_file("pending.txt").await.unwrap();
    handle.shutdown().await.unwrap();

    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::Shutdown, .. })
    ));
    assert!(matches!(
        handle.request_file("other.txt").await,
        Err(Error::CoordinatorStopped)
    ));
}

#[tokio::test]
async fn test_invalid_file_name() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();

    assert!(matches!(
        handle.request_file("../etc/passwd").await,
        Err(Error::InvalidFileName(_))
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_missing_shared_directory() {
    let result = TransferCoordinator::spawn(
        CoordinatorConfig::new("/nonexistent/beckon/shared"),
        Capabilities::local(fixed(std::path::Path::new("/tmp"))),
    );
    assert!(matches!(result, Err(Error::DirectoryNotFound(_))));
}

#[tokio::test]
async fn test_staging_dir_overlapping_shared_is_rejected() {
    let root = create_temp_dir();
    let downloads = create_temp_dir();
    let shared = root.path().join("inbox");
    let kept = create_test_file(&shared, "keep.txt", b"keep me");

    for staging in [
        root.path().to_path_buf(),
        shared.clone(),
        shared.join(".staging"),
    ] {
        let config = CoordinatorConfig {
            staging_dir: staging.clone(),
            ..local_config(&shared)
        };
        let result =
            TransferCoordinator::spawn(config, Capabilities::local(fixed(downloads.path())));
        assert!(
            matches!(result, Err(Error::InvalidInput(_))),
            "staging dir {} was accepted",
            staging.display()
        );
    }
    assert!(kept.exists());
}

#[tokio::test]
async fn test_destination_inside_shared_is_rejected() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    create_test_file(shared.path(), "a.txt", b"shared bytes");

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();

    assert!(matches!(
        handle
            .request_file_to("a.txt", shared.path().join("copy.txt"))
            .await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        handle.request_file_to("a.txt", shared.path()).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        handle
            .request_file_to("a.txt", shared.path().join("sub/../nested.txt"))
            .await,
        Err(Error::InvalidInput(_))
    ));

    assert!(handle.snapshot().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());
    assert!(!shared.path().join("copy.txt").exists());
}

#[tokio::test]
async fn test_chosen_destination_inside_shared_fails() {
    let shared = create_temp_dir();
    create_test_file(shared.path(), "a.txt", b"shared bytes");

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(shared.path())),
    )
    .unwrap();

    handle.request_file("a.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;

    assert_eq!(copies_started(&seen), 0);
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed {
            reason: FailureReason::DestinationInSharedFolder(_),
            ..
        })
    ));
    assert_eq!(
        std::fs::read(shared.path().join("a.txt")).unwrap(),
        b"shared bytes"
    );
}

/// The last handle goes away while a large copy is running.
#[tokio::test]
async fn test_dropping_handles_finishes_running_copy() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let content = random_bytes(32 * 1024 * 1024);
    let source = create_test_file(shared.path(), "large.bin", &content);

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();

    handle
        .request_file_to("large.bin", downloads.path())
        .await
        .unwrap();
    loop {
        let event = next_event(&mut events).await;
        assert!(!event.is_terminal(), "request ended before copying: {event}");
        if matches!(event, TransferEvent::Fulfilling { .. }) {
            break;
        }
    }
    drop(handle);

    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Completed { bytes, .. }) if *bytes == content.len() as u64
    ));
    assert_files_equal(&source, &downloads.path().join("large.bin"));

    // The coordinator stops once nothing is left to report.
    let closed = tokio::time::timeout(EVENT_TIMEOUT, events.recv()).await;
    assert!(matches!(closed, Ok(None)));
}

#[tokio::test]
async fn test_dropping_handles_fails_pending_requests() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();

    let (handle, mut events) = TransferCoordinator::spawn(
        local_config(shared.path()),
        Capabilities::local(fixed(downloads.path())),
    )
    .unwrap();

    handle.request_file("later.txt").await.unwrap();
    drop(handle);

    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::Shutdown, .. })
    ));
}

/// In push mode a holder that serves the file is fetched from.
#[tokio::test]
async fn test_push_mode_fetches_offered_file() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let staging = create_temp_dir();
    let fetcher = Arc::new(StaticFetcher::serving(b"offered bytes"));

    let config = CoordinatorConfig {
        staging_dir: staging.path().to_path_buf(),
        ..local_config(shared.path()).with_peer("127.0.0.1:8765")
    };
    assert_eq!(config.mode, DeliveryMode::Push);
    let caps = Capabilities::local(fixed(downloads.path()))
        .with_signaler(Arc::new(RecordingSignaler::answering(
            HolderAnswer::Available { file_port: 7001 },
        )))
        .with_fetcher(Arc::clone(&fetcher) as _);
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    handle.request_file("offered.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;

    assert!(matches!(seen.last(), Some(TransferEvent::Completed { .. })));
    assert_eq!(fetcher.peers(), vec!["127.0.0.1:7001".to_string()]);
    assert_eq!(
        std::fs::read(downloads.path().join("offered.txt")).unwrap(),
        b"offered bytes"
    );
    assert!(!staging.path().join("offered.txt").exists());
}

/// In push mode a holder that only acknowledges leaves the request waiting.
#[tokio::test]
async fn test_push_mode_acknowledged_waits_for_arrival() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();
    let fetcher = Arc::new(StaticFetcher::serving(b"unused"));

    let config = local_config(shared.path()).with_peer("127.0.0.1:8765");
    let caps = Capabilities::local(fixed(downloads.path()))
        .with_signaler(Arc::new(RecordingSignaler::default()))
        .with_fetcher(Arc::clone(&fetcher) as _);
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    handle.request_file("pushed.txt").await.unwrap();
    loop {
        if matches!(next_event(&mut events).await, TransferEvent::RequestSent { .. }) {
            break;
        }
    }

    let path = create_test_file(shared.path(), "pushed.txt", b"pushed bytes");
    handle
        .file_arrived(FileArrived {
            name: "pushed.txt".to_string(),
            path,
        })
        .unwrap();

    let seen = events_until_terminal(&mut events).await;
    assert!(matches!(seen.last(), Some(TransferEvent::Completed { .. })));
    assert!(fetcher.peers().is_empty());
}

#[tokio::test]
async fn test_holder_without_file_fails_request() {
    let shared = create_temp_dir();
    let downloads = create_temp_dir();

    let config = local_config(shared.path()).with_peer("127.0.0.1:8765");
    let caps = Capabilities::local(fixed(downloads.path()))
        .with_signaler(Arc::new(RecordingSignaler::answering(HolderAnswer::NotFound)));
    let (handle, mut events) = TransferCoordinator::spawn(config, caps).unwrap();

    handle.request_file("absent.txt").await.unwrap();
    let seen = events_until_terminal(&mut events).await;

    assert!(matches!(
        seen.last(),
        Some(TransferEvent::Failed { reason: FailureReason::NotOnHolder, .. })
    ));
}
