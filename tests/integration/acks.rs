use crate::*;

use tether_services::{AckListener, AckWaiter};

/// Acks published out of order on a live bus still release their own
/// waiters in correlated mode.
#[tokio::test(flavor = "multi_thread")]
async fn test_correlated_acks_survive_reordering() -> Result<()> {
    let bus = MemoryBus::new();
    let waiter = Arc::new(AckWaiter::new(AckMode::Correlated));
    bus.subscribe("ack/**", Arc::new(AckListener::new(waiter.clone())))?;

    let mut first = waiter.register("workdir/a");
    let mut second = waiter.register("workdir/b");
    bus.publish("ack/workdir/b", Bytes::from_static(b"ACK"))?;
    bus.publish("ack/workdir/a", Bytes::from_static(b"ACK"))?;

    let timeout = Some(Duration::from_secs(2));
    waiter.wait(&mut first, timeout).await?;
    waiter.wait(&mut second, timeout).await?;
    assert_eq!(waiter.pending_count(), 0);
    Ok(())
}

/// FIFO mode discards an ack that shows up before its waiter asks for it,
/// so the later wait can only time out.
#[tokio::test(flavor = "multi_thread")]
async fn test_fifo_acks_lose_reordered_entries() -> Result<()> {
    let bus = MemoryBus::new();
    let waiter = Arc::new(AckWaiter::new(AckMode::Fifo));
    bus.subscribe("ack/**", Arc::new(AckListener::new(waiter.clone())))?;

    let mut first = waiter.register("workdir/a");
    let mut second = waiter.register("workdir/b");
    bus.publish("ack/workdir/b", Bytes::from_static(b"ACK"))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.publish("ack/workdir/a", Bytes::from_static(b"ACK"))?;

    waiter.wait(&mut first, Some(Duration::from_secs(2))).await?;
    let err = waiter
        .wait(&mut second, Some(Duration::from_millis(200)))
        .await
        .expect_err("discarded ack cannot resolve the second wait");
    assert!(matches!(err, tether_services::AckError::TimedOut(_)));
    Ok(())
}

/// A full transfer behaves the same under both ack modes when the
/// receiver answers in order.
#[tokio::test(flavor = "multi_thread")]
async fn test_transfer_in_fifo_mode() -> Result<()> {
    let quads = pattern(20 * KIB, 8);
    let src = source_tree(&[
        ("splitted/a/1.png", b"1"),
        ("splitted/a/2.png", b"22"),
        ("quadrilaterals/quadrilaterals.pkl", &quads),
    ])?;
    let node = Node::start()?;
    let sender = node.sender(SenderSettings {
        ack_mode: AckMode::Fifo,
        ..settings(8 * KIB)
    })?;

    let report = sender.send_tree(src.path(), &folders()).await?;
    assert_eq!(report.raw_files, 2);
    assert_eq!(report.chunks, 3);
    assert_eq!(read(node.dest.path(), "quadrilaterals/quadrilaterals.pkl")?, quads);
    node.wait_complete().await?;
    Ok(())
}
