use super::*;

#[tokio::test]
async fn test_shutdown_cancels_active_download() {
    let t = create_test_relay(StubEngine::stalled()).await;
    let replier = RecordingReplier::new();
    let descriptor = fixtures::single_file("a.bin", 1);
    let alice = user("alice");

    let request = t
        .relay
        .handle_document(&alice, "a.torrent", &descriptor, &replier);
    let shutdown = async {
        wait_until(|| t.engine.start_count() == 1).await;
        t.relay.shutdown().await
    };

    let (result, shutdown) = tokio::join!(request, shutdown);

    shutdown.unwrap();
    assert!(matches!(
        result.unwrap_err(),
        Error::Download(DownloadError::Cancelled { .. })
    ));
    assert_eq!(t.engine.stop_count(), 1);
    assert_eq!(t.relay.active_downloads().await, 0);
    assert_eq!(work_dir_entries(&t.relay), 0);
    assert!(replier.any_text_contains("restarting"));
}

#[tokio::test]
async fn test_requests_after_shutdown_are_refused() {
    let t = create_test_relay(StubEngine::completing_after(1, &[("a.bin", 1)])).await;
    let replier = RecordingReplier::new();

    t.relay.shutdown().await.unwrap();
    assert!(!t.relay.is_accepting());

    let err = t
        .relay
        .handle_document(
            &user("alice"),
            "a.torrent",
            &fixtures::single_file("a.bin", 1),
            &replier,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ShuttingDown));
    assert_eq!(t.engine.start_count(), 0);
    assert_eq!(replier.texts().len(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_cleanups() {
    let t = create_test_relay(StubEngine::completing_after(1, &[("a.bin", 1)])).await;
    let replier = RecordingReplier::new();

    let summary = t
        .relay
        .handle_document(
            &user("alice"),
            "a.torrent",
            &fixtures::single_file("a.bin", 1),
            &replier,
        )
        .await
        .unwrap();
    assert!(summary.work_dir.exists());

    t.relay.shutdown().await.unwrap();

    assert!(!summary.work_dir.exists());
    assert_eq!(t.relay.cleanup().pending(), 0);
}

#[tokio::test]
async fn test_shutdown_emits_event() {
    let t = create_test_relay(StubEngine::stalled()).await;
    let mut events = t.relay.subscribe();

    t.relay.shutdown().await.unwrap();

    assert!(matches!(events.try_recv().unwrap(), Event::Shutdown));
}

#[tokio::test]
async fn test_shutdown_marks_database_clean() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Arc::new(
        Database::new(&temp_dir.path().join("relay.db"))
            .await
            .unwrap(),
    );
    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    let config = test_config(temp_dir.path());
    let mut relay = TorrentRelay::with_components(
        config,
        db.clone(),
        Arc::new(StubEngine::stalled()),
        Arc::new(StubUploader::new()),
    )
    .await
    .unwrap();
    relay.db = Some(db.clone());

    relay.shutdown().await.unwrap();

    let reopened = Database::new(&temp_dir.path().join("relay.db"))
        .await
        .unwrap();
    assert!(!reopened.was_unclean_shutdown().await.unwrap());
}

#[tokio::test]
async fn test_sweep_removes_leftover_directories() {
    let t = create_test_relay(StubEngine::stalled()).await;
    let work_root = t.relay.config().download.work_dir.clone();
    std::fs::create_dir_all(work_root.join("alice_1700000000000000_3").join("nested")).unwrap();
    std::fs::write(
        work_root.join("alice_1700000000000000_3").join("nested").join("f"),
        b"x",
    )
    .unwrap();
    std::fs::create_dir_all(work_root.join("bob_1700000000000001_4")).unwrap();
    std::fs::create_dir_all(work_root.join("downloads")).unwrap();

    let removed = t.relay.sweep_work_dir().await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(work_dir_entries(&t.relay), 1);
    assert!(work_root.join("downloads").is_dir());
}

#[tokio::test]
async fn test_with_components_rejects_invalid_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.download.max_concurrent_downloads = 0;

    let result = TorrentRelay::with_components(
        config,
        Arc::new(MemoryQuotaStore::new()),
        Arc::new(StubEngine::stalled()),
        Arc::new(StubUploader::new()),
    )
    .await;

    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn test_with_components_creates_work_root() {
    let t = create_test_relay(StubEngine::stalled()).await;

    assert!(t.relay.config().download.work_dir.is_dir());
    assert!(t.relay.is_accepting());
    assert!(t.relay.db.is_none());
    assert!(t.temp_dir.path().exists());
}

#[tokio::test]
async fn test_concurrent_sessions_are_bounded() {
    let t = create_test_relay_with(
        StubEngine::completing_after(25, &[("a.bin", 1)]),
        Arc::new(MemoryQuotaStore::new()),
        |config| config.download.max_concurrent_downloads = 1,
    )
    .await;
    let descriptor = fixtures::single_file("a.bin", 1);
    let first_replier = RecordingReplier::new();
    let second_replier = RecordingReplier::new();
    let alice = user("alice");
    let bob = user("bob");

    let first = t
        .relay
        .handle_document(&alice, "a.torrent", &descriptor, &first_replier);
    let second = async {
        wait_until(|| t.engine.start_count() == 1).await;
        let waiting = t
            .relay
            .handle_document(&bob, "a.torrent", &descriptor, &second_replier);
        tokio::pin!(waiting);
        // The permit is held by the first request, so the second cannot start yet
        let early = tokio::time::timeout(Duration::from_millis(50), &mut waiting).await;
        assert!(early.is_err());
        assert_eq!(t.engine.start_count(), 1);
        waiting.await
    };

    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();
    assert_eq!(t.engine.start_count(), 2);
}
