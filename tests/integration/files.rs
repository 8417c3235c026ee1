use crate::*;

/// 300 KiB chunked file goes out as 128 + 128 + 44 KiB and comes back
/// bit-identical.
#[tokio::test(flavor = "multi_thread")]
async fn test_chunked_file_reassembles_identically() -> Result<()> {
    let content = pattern(300 * KIB, 7);
    let src = source_tree(&[("tracking/tracks.csv", &content)])?;
    let node = Node::start()?;

    let tap = Arc::new(Tap::default());
    node.bus.subscribe("workdir/tracking/**", tap.clone())?;

    let sender = node.sender(settings(128 * KIB))?;
    let report = sender.send_tree(src.path(), &folders()).await?;

    assert_eq!(report.chunked_files, 1);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.bytes, (300 * KIB) as u64);
    assert_eq!(read(node.dest.path(), "tracking/tracks.csv")?, content);
    assert!(node.receiver.store().in_progress().is_empty());

    let seen_tap = tap.clone();
    wait_until(Duration::from_secs(5), move || seen_tap.seen().len() == 4).await?;
    let mut seen = tap.seen();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            "workdir/tracking/tracks.csv.chunk0",
            "workdir/tracking/tracks.csv.chunk1",
            "workdir/tracking/tracks.csv.chunk2",
            "workdir/tracking/tracks.csv.end",
        ]
    );
    Ok(())
}

/// Zero-byte raw file lands as a zero-byte file and the run completes.
#[tokio::test(flavor = "multi_thread")]
async fn test_empty_raw_file() -> Result<()> {
    let src = source_tree(&[("splitted/0001/empty.png", b"")])?;
    let node = Node::start()?;

    let report = node
        .sender(settings(128 * KIB))?
        .send_tree(src.path(), &folders())
        .await?;

    assert_eq!(report.raw_files, 1);
    assert_eq!(report.bytes, 0);
    let written = node.dest.path().join("splitted/0001/empty.png");
    assert!(written.is_file());
    assert_eq!(std::fs::metadata(&written)?.len(), 0);
    Ok(())
}

/// Empty chunked file: no chunks, just an end marker. Nothing is written
/// and the transfer still finishes.
#[tokio::test(flavor = "multi_thread")]
async fn test_empty_chunked_file_writes_nothing() -> Result<()> {
    let src = source_tree(&[("tracking/tracks.csv", b"")])?;
    let node = Node::start()?;

    let report = node
        .sender(settings(128 * KIB))?
        .send_tree(src.path(), &folders())
        .await?;

    assert_eq!(report.chunked_files, 1);
    assert_eq!(report.chunks, 0);
    assert!(!node.dest.path().join("tracking/tracks.csv").exists());
    node.wait_complete().await?;
    Ok(())
}

/// A realistic tree: many raw frames, both chunked files, and noise that
/// must not be sent.
#[tokio::test(flavor = "multi_thread")]
async fn test_full_tree_mirrors_selected_files() -> Result<()> {
    let quads = pattern(70 * KIB, 3);
    let tracks = pattern(33 * KIB, 9);
    let frames: Vec<(String, Vec<u8>)> = (0..12)
        .map(|i| {
            let rel = format!("splitted/{:04}/frame_{i:02}.png", i / 4);
            (rel, pattern(500 + i, i as u8))
        })
        .collect();

    let mut files: Vec<(&str, &[u8])> = frames
        .iter()
        .map(|(rel, data)| (rel.as_str(), data.as_slice()))
        .collect();
    files.push(("quadrilaterals/quadrilaterals.pkl", &quads));
    files.push(("tracking/tracks.csv", &tracks));
    files.push(("tracking/debug.log", b"not part of the transfer"));
    files.push(("models/weights.bin", b"folder not walked"));
    let src = source_tree(&files)?;

    let node = Node::start()?;
    let report = node
        .sender(settings(16 * KIB))?
        .send_tree(src.path(), &folders())
        .await?;

    assert_eq!(report.raw_files, 12);
    assert_eq!(report.chunked_files, 2);
    // 70 KiB -> 5 chunks, 33 KiB -> 3 chunks
    assert_eq!(report.chunks, 8);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.republished, 0);

    for (rel, data) in &frames {
        assert_eq!(&read(node.dest.path(), rel)?, data, "{rel}");
    }
    assert_eq!(read(node.dest.path(), "quadrilaterals/quadrilaterals.pkl")?, quads);
    assert_eq!(read(node.dest.path(), "tracking/tracks.csv")?, tracks);
    assert!(!node.dest.path().join("tracking/debug.log").exists());
    assert!(!node.dest.path().join("models").exists());

    node.wait_complete().await?;
    assert_eq!(node.hook.count(), 1);
    Ok(())
}

/// Sending the same tree twice overwrites with identical results.
#[tokio::test(flavor = "multi_thread")]
async fn test_resend_is_idempotent() -> Result<()> {
    let frame = pattern(2 * KIB, 1);
    let tracks = pattern(10 * KIB, 2);
    let src = source_tree(&[
        ("splitted/a/frame.png", &frame),
        ("tracking/tracks.csv", &tracks),
    ])?;
    let node = Node::start()?;
    let sender = node.sender(settings(4 * KIB))?;

    sender.send_tree(src.path(), &folders()).await?;
    sender.send_tree(src.path(), &folders()).await?;

    assert_eq!(read(node.dest.path(), "splitted/a/frame.png")?, frame);
    assert_eq!(read(node.dest.path(), "tracking/tracks.csv")?, tracks);
    node.wait_complete().await?;
    Ok(())
}

/// Missing folders are skipped; the rest still goes through.
#[tokio::test(flavor = "multi_thread")]
async fn test_missing_folder_is_skipped() -> Result<()> {
    let src = source_tree(&[("splitted/x/only.png", b"only")])?;
    let node = Node::start()?;

    let report = node
        .sender(settings(128 * KIB))?
        .send_tree(src.path(), &folders())
        .await?;

    assert_eq!(report.raw_files, 1);
    assert_eq!(report.chunked_files, 0);
    assert_eq!(read(node.dest.path(), "splitted/x/only.png")?, b"only");
    Ok(())
}
