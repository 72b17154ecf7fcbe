// ── Subscription delivery ──
//
// One task per subscription drains the protocol-native stream into a
// bounded channel. A slow consumer sheds updates here, at the consumer
// edge, and gets told how many; the transport read loop is never the
// party that blocks.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use wireplane_api::{GnmiUpdates, NetconfNotifications, RestconfNotifications, Update};

use crate::error::Error;

const UPDATE_BUFFER: usize = 128;

/// The protocol-native sources a delivery task can drain. CLI sessions
/// never appear here; they have no subscription mechanism.
pub(crate) enum ProtocolUpdates {
    Netconf(NetconfNotifications),
    Restconf(RestconfNotifications),
    Gnmi(GnmiUpdates),
    #[cfg(test)]
    Mock(mpsc::Receiver<Result<Update, wireplane_api::Error>>),
}

impl ProtocolUpdates {
    async fn next(&mut self) -> Option<Result<Update, wireplane_api::Error>> {
        match self {
            ProtocolUpdates::Netconf(stream) => stream.next().await,
            ProtocolUpdates::Restconf(stream) => stream.next().await,
            ProtocolUpdates::Gnmi(stream) => stream.next().await,
            #[cfg(test)]
            ProtocolUpdates::Mock(rx) => rx.recv().await,
        }
    }
}

/// A live subscription as handed out by
/// [`Client::subscribe`](crate::Client::subscribe).
///
/// Yields decoded updates in arrival order with exactly one terminal
/// outcome: the source ends (`None`), a transport error ends it (one
/// `Err` then `None`), or it is cancelled. After [`cancel`] is observed
/// no further items are yielded, including ones already buffered.
///
/// [`cancel`]: UpdateStream::cancel
#[derive(Debug)]
pub struct UpdateStream {
    rx: mpsc::Receiver<Result<Update, Error>>,
    cancel: CancellationToken,
}

impl UpdateStream {
    pub(crate) fn spawn(source: ProtocolUpdates, parent: &CancellationToken) -> Self {
        Self::spawn_with_buffer(source, parent, UPDATE_BUFFER)
    }

    fn spawn_with_buffer(
        source: ProtocolUpdates,
        parent: &CancellationToken,
        buffer: usize,
    ) -> Self {
        // Child of the client's token: closing the client cancels
        // every outstanding subscription with it.
        let cancel = parent.child_token();
        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(deliver(source, tx, cancel.clone()));
        Self { rx, cancel }
    }

    /// Next update, `None` once the stream is over. Cancel-safe:
    /// dropping the future loses nothing.
    pub async fn next(&mut self) -> Option<Result<Update, Error>> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.rx.close();
                None
            }
            item = self.rx.recv() => item,
        }
    }

    /// Stop delivery. Idempotent; also triggered by dropping the
    /// stream or closing the client.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for UpdateStream {
    type Item = Result<Update, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

// ── Delivery task ────────────────────────────────────────────────

async fn deliver(
    mut source: ProtocolUpdates,
    tx: mpsc::Sender<Result<Update, Error>>,
    cancel: CancellationToken,
) {
    let mut dropped: u64 = 0;
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = source.next() => item,
        };
        let Some(item) = item else { break };
        let item = item.map_err(Error::from);

        // Anything but an upstream overflow marker ends the stream
        // when it is an error.
        let terminal = item.as_ref().is_err_and(|e| !matches!(e, Error::Overflow { .. }));
        if terminal {
            // The source is done; waiting for buffer space here
            // cannot stall a transport, and the consumer must not
            // lose the reason the stream ended.
            if dropped > 0
                && !send_or_cancelled(&tx, &cancel, Err(Error::Overflow { dropped })).await
            {
                return;
            }
            let _ = send_or_cancelled(&tx, &cancel, item).await;
            return;
        }

        if dropped > 0 {
            match tx.try_send(Err(Error::Overflow { dropped })) {
                Ok(()) => dropped = 0,
                Err(TrySendError::Full(_)) => {
                    // Still no space: the current update is shed too.
                    dropped += 1;
                    continue;
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }

        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => dropped += 1,
            Err(TrySendError::Closed(_)) => return,
        }
    }

    // Updates shed right before the source ended still get accounted.
    if dropped > 0 {
        let _ = send_or_cancelled(&tx, &cancel, Err(Error::Overflow { dropped })).await;
    }
    debug!("subscription delivery stopped");
}

async fn send_or_cancelled(
    tx: &mpsc::Sender<Result<Update, Error>>,
    cancel: &CancellationToken,
    item: Result<Update, Error>,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use wireplane_api::{Path, Update, Value};

    use super::{ProtocolUpdates, UpdateStream};
    use crate::error::Error;

    fn update(n: i64) -> Update {
        Update {
            path: Path::parse("/interfaces/interface[name=eth0]/counters").unwrap(),
            value: Value::Int(n),
            timestamp: None,
        }
    }

    /// Source channel plus the sender the test feeds it through.
    fn mock_source(
        capacity: usize,
    ) -> (mpsc::Sender<Result<Update, wireplane_api::Error>>, ProtocolUpdates) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ProtocolUpdates::Mock(rx))
    }

    #[tokio::test]
    async fn updates_flow_in_order_and_the_stream_ends_cleanly() {
        let (tx, source) = mock_source(8);
        for n in 0..3 {
            tx.send(Ok(update(n))).await.unwrap();
        }
        drop(tx);

        let mut stream = UpdateStream::spawn(source, &CancellationToken::new());
        for n in 0..3 {
            let item = stream.next().await.expect("update present").expect("not an error");
            assert_eq!(item.value, Value::Int(n));
        }
        assert!(stream.next().await.is_none(), "clean end after the last update");
        assert!(stream.next().await.is_none(), "stays ended");
    }

    #[tokio::test]
    async fn cancelling_silences_the_stream_and_stops_the_task() {
        let (tx, source) = mock_source(8);
        tx.send(Ok(update(1))).await.unwrap();

        let mut stream = UpdateStream::spawn(source, &CancellationToken::new());
        assert!(stream.next().await.is_some());

        // More updates are in flight when the consumer cancels.
        tx.send(Ok(update(2))).await.unwrap();
        stream.cancel();
        assert!(stream.next().await.is_none(), "no items after cancellation");
        assert!(stream.next().await.is_none());

        // The delivery task notices and drops its end of the source.
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("delivery task stopped");
    }

    #[tokio::test]
    async fn dropping_the_stream_tears_down_the_delivery_task() {
        let (tx, source) = mock_source(8);
        let stream = UpdateStream::spawn(source, &CancellationToken::new());
        drop(stream);

        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("delivery task stopped");
    }

    #[tokio::test]
    async fn closing_the_parent_token_cancels_the_subscription() {
        let (tx, source) = mock_source(8);
        tx.send(Ok(update(1))).await.unwrap();

        let parent = CancellationToken::new();
        let mut stream = UpdateStream::spawn(source, &parent);
        parent.cancel();

        assert!(stream.next().await.is_none());
        assert!(stream.is_cancelled());
    }

    #[tokio::test]
    async fn a_full_buffer_sheds_updates_and_reports_the_count() {
        let (tx, source) = mock_source(8);
        for n in 0..4 {
            tx.send(Ok(update(n))).await.unwrap();
        }
        drop(tx);

        // Buffer of two: the task forwards two updates, sheds two,
        // and flushes the count once the source ends.
        let mut stream = UpdateStream::spawn_with_buffer(source, &CancellationToken::new(), 2);
        assert_eq!(stream.next().await.unwrap().unwrap().value, Value::Int(0));
        assert_eq!(stream.next().await.unwrap().unwrap().value, Value::Int(1));
        match stream.next().await {
            Some(Err(Error::Overflow { dropped })) => assert_eq!(dropped, 2),
            other => panic!("expected the shed count, got: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_errors_end_the_stream_after_delivery() {
        let (tx, source) = mock_source(8);
        tx.send(Ok(update(1))).await.unwrap();
        tx.send(Err(wireplane_api::Error::Closed)).await.unwrap();
        // Keep `tx` alive: the stream must end because of the error,
        // not because the source ran dry.

        let mut stream = UpdateStream::spawn(source, &CancellationToken::new());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(stream.next().await, Some(Err(Error::Closed))));
        assert!(stream.next().await.is_none());

        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("delivery task stopped");
        drop(tx);
    }

    #[tokio::test]
    async fn upstream_overflow_markers_do_not_end_delivery() {
        let (tx, source) = mock_source(8);
        tx.send(Err(wireplane_api::Error::Overflow { dropped: 7 })).await.unwrap();
        tx.send(Ok(update(1))).await.unwrap();
        drop(tx);

        let mut stream = UpdateStream::spawn(source, &CancellationToken::new());
        assert!(matches!(stream.next().await, Some(Err(Error::Overflow { dropped: 7 }))));
        assert_eq!(stream.next().await.unwrap().unwrap().value, Value::Int(1));
        assert!(stream.next().await.is_none());
    }
}
