use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Result;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Handle to a live query. Yields a full snapshot every time the result may
/// have changed. Dropping the handle detaches the query.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T>>,
    token: CancellationToken,
    worker: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<T>>,
        token: CancellationToken,
        worker: JoinHandle<()>,
    ) -> Self {
        Self { rx, token, worker }
    }

    /// Wait for the next snapshot. `None` once the query has stopped, either
    /// because it was cancelled or because it delivered an error.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Detach the query and wait until its worker has exited.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.worker).await {
            if e.is_panic() {
                error!("Live query worker panicked: {}", e);
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
