use crate::*;

use tether_services::TcpTransport;

/// Sender and receiver in separate transport sessions over TCP loopback.
#[tokio::test(flavor = "multi_thread")]
async fn test_transfer_over_tcp() -> Result<()> {
    let quads = pattern(300 * KIB, 11);
    let tracks = pattern(5 * KIB, 12);
    let src = source_tree(&[
        ("splitted/0001/a.png", b"frame-a"),
        ("splitted/0002/b.png", b""),
        ("quadrilaterals/quadrilaterals.pkl", &quads),
        ("tracking/tracks.csv", &tracks),
    ])?;

    let listener = Arc::new(TcpTransport::listen("127.0.0.1:0").await?);
    let addr = listener.local_addr().to_string();
    let dest = TempDir::new()?;
    let hook = Arc::new(CountingHook::default());
    let receiver = Arc::new(Receiver::new(
        namespace(),
        dest.path().to_path_buf(),
        listener.clone(),
        hook.clone(),
    ));
    receiver.start()?;

    let dialer = Arc::new(TcpTransport::connect(&addr).await?);
    let peers = listener.clone();
    wait_until(Duration::from_secs(5), move || peers.peer_count() == 1).await?;

    let sender = Sender::new(dialer.clone(), namespace(), policy(), settings(128 * KIB))?;
    let report = sender.send_tree(src.path(), &folders()).await?;

    assert_eq!(report.raw_files, 2);
    assert_eq!(report.chunked_files, 2);
    assert_eq!(report.chunks, 4);
    assert_eq!(read(dest.path(), "splitted/0001/a.png")?, b"frame-a");
    assert_eq!(read(dest.path(), "splitted/0002/b.png")?, b"");
    assert_eq!(read(dest.path(), "quadrilaterals/quadrilaterals.pkl")?, quads);
    assert_eq!(read(dest.path(), "tracking/tracks.csv")?, tracks);

    let fired = hook.clone();
    wait_until(Duration::from_secs(5), move || fired.count() == 1).await?;

    dialer.close();
    listener.close();
    Ok(())
}

/// A closed session refuses to publish.
#[tokio::test(flavor = "multi_thread")]
async fn test_closed_tcp_session_rejects_publish() -> Result<()> {
    let listener = TcpTransport::listen("127.0.0.1:0").await?;
    listener.close();
    let err = listener
        .publish("workdir/x", Bytes::from_static(b"x"))
        .expect_err("closed transport must reject publish");
    assert!(matches!(err, TransportError::Closed));
    Ok(())
}
