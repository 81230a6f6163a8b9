use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sharebook_db::{Database, Document, Query};
use sharebook_types::events::ChangeEvent;

use crate::subscription::Subscription;

/// Snapshots queued for a slow subscriber before its worker waits.
const SNAPSHOT_BUFFER: usize = 16;

/// Runs live queries against the store and pushes fresh snapshots to their
/// subscribers whenever the underlying collection changes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,
    /// Parent of every subscription token; cancelling it stops all queries.
    shutdown: CancellationToken,
    workers: TaskTracker,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                shutdown: CancellationToken::new(),
                workers: TaskTracker::new(),
            }),
        }
    }

    /// Register a live query. `project` turns each raw result set into the
    /// value handed to the subscriber; an `Err` from it ends the query.
    pub fn watch<T, F>(&self, query: Query, project: F) -> Subscription<T>
    where
        T: Send + 'static,
        F: Fn(Vec<Document>) -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let token = self.inner.shutdown.child_token();

        // Subscribe before the first read so no write can slip in between.
        let changes = self.inner.db.subscribe();

        let live = LiveQuery {
            db: self.inner.db.clone(),
            query,
            project,
            tx,
            token: token.clone(),
        };
        let worker = self.inner.workers.spawn(live.run(changes));

        Subscription::new(rx, token, worker)
    }

    /// Number of live queries still running.
    pub fn active(&self) -> usize {
        self.inner.workers.len()
    }

    /// Cancel every live query and wait for the workers to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.workers.close();
        self.inner.workers.wait().await;
        info!("All live queries stopped");
    }
}

struct LiveQuery<T, F> {
    db: Arc<Database>,
    query: Query,
    project: F,
    tx: mpsc::Sender<Result<T>>,
    token: CancellationToken,
}

impl<T, F> LiveQuery<T, F>
where
    T: Send + 'static,
    F: Fn(Vec<Document>) -> Result<T> + Send + Sync + 'static,
{
    async fn run(self, mut changes: broadcast::Receiver<ChangeEvent>) {
        let collection = self.query.collection_name().to_string();
        debug!("Live query on {} started", collection);

        loop {
            let snapshot = self.evaluate().await;
            let failed = snapshot.is_err();

            tokio::select! {
                _ = self.token.cancelled() => break,
                sent = self.tx.send(snapshot) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }

            if failed || !self.wait_for_change(&mut changes).await {
                break;
            }
        }

        debug!("Live query on {} stopped", collection);
    }

    async fn evaluate(&self) -> Result<T> {
        let db = self.db.clone();
        let query = self.query.clone();

        let docs = tokio::task::spawn_blocking(move || db.run_query(&query))
            .await
            .map_err(|e| anyhow!("Live query join error: {}", e))??;

        (self.project)(docs)
    }

    /// Block until a change that can affect the query arrives, then drain
    /// anything else already queued so a burst costs one re-evaluation.
    /// Returns false when the query should stop instead.
    async fn wait_for_change(&self, changes: &mut broadcast::Receiver<ChangeEvent>) -> bool {
        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => return false,
                _ = self.tx.closed() => return false,
                event = changes.recv() => event,
            };

            match event {
                Ok(event) if self.query.is_affected_by(&event) => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!(
                        "Live query on {} lagged by {} change(s), re-reading",
                        self.query.collection_name(),
                        n
                    );
                    break;
                }
                Err(RecvError::Closed) => return false,
            }
        }

        loop {
            match changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use sharebook_db::server_timestamp;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup() -> (Arc<Database>, Dispatcher) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(db.clone());
        (db, dispatcher)
    }

    fn titles(docs: Vec<Document>) -> Result<Vec<String>> {
        Ok(docs
            .iter()
            .filter_map(|d| d.get("title").and_then(|t| t.as_str()).map(String::from))
            .collect())
    }

    async fn next<T>(sub: &mut Subscription<T>) -> T {
        tokio::time::timeout(WAIT, sub.next())
            .await
            .expect("snapshot in time")
            .expect("subscription open")
            .expect("snapshot ok")
    }

    async fn wait_idle(dispatcher: &Dispatcher) {
        tokio::time::timeout(WAIT, async {
            while dispatcher.active() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("workers exit");
    }

    #[tokio::test]
    async fn first_snapshot_then_one_per_change() {
        let (db, dispatcher) = setup();
        db.add("books", json!({ "title": "Emma", "at": server_timestamp() })).unwrap();

        let mut sub = dispatcher.watch(Query::collection("books"), titles);
        assert_eq!(next(&mut sub).await, vec!["Emma"]);

        db.add("books", json!({ "title": "Persuasion", "at": server_timestamp() })).unwrap();
        assert_eq!(next(&mut sub).await, vec!["Emma", "Persuasion"]);
    }

    #[tokio::test]
    async fn changes_to_other_collections_are_ignored() {
        let (db, dispatcher) = setup();
        let mut sub = dispatcher.watch(Query::collection("books"), titles);
        assert!(next(&mut sub).await.is_empty());

        db.add("messages", json!({ "text": "hi" })).unwrap();
        let quiet = tokio::time::timeout(Duration::from_millis(150), sub.next()).await;
        assert!(quiet.is_err(), "no snapshot expected for an unrelated write");
    }

    #[tokio::test]
    async fn filters_apply_to_every_snapshot() {
        let (db, dispatcher) = setup();
        let mut sub = dispatcher.watch(
            Query::collection("books").where_eq("isAvailable", true),
            titles,
        );
        assert!(next(&mut sub).await.is_empty());

        db.add("books", json!({ "title": "Lent", "isAvailable": false })).unwrap();
        assert!(next(&mut sub).await.is_empty());

        let id = db.add("books", json!({ "title": "Free", "isAvailable": true })).unwrap();
        assert_eq!(next(&mut sub).await, vec!["Free"]);

        db.update("books", &id, json!({ "isAvailable": false })).unwrap();
        assert!(next(&mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_waits_for_the_worker() {
        let (_db, dispatcher) = setup();
        let mut sub = dispatcher.watch(Query::collection("books"), titles);
        next(&mut sub).await;
        assert_eq!(dispatcher.active(), 1);

        sub.cancel().await;
        assert_eq!(dispatcher.active(), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_detaches_the_query() {
        let (db, dispatcher) = setup();
        let mut sub = dispatcher.watch(Query::collection("books"), titles);
        next(&mut sub).await;

        drop(sub);
        wait_idle(&dispatcher).await;

        // Writes after the drop must not wake anything up.
        db.add("books", json!({ "title": "Late" })).unwrap();
        assert_eq!(dispatcher.active(), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_every_subscription() {
        let (_db, dispatcher) = setup();
        let mut a = dispatcher.watch(Query::collection("books"), titles);
        let mut b = dispatcher.watch(Query::collection("messages"), titles);
        next(&mut a).await;
        next(&mut b).await;

        dispatcher.shutdown().await;

        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(a.next().await.is_none());
        assert!(b.next().await.is_none());
    }

    #[tokio::test]
    async fn projection_errors_are_delivered_and_end_the_query() {
        let (_db, dispatcher) = setup();
        let mut sub: Subscription<()> =
            dispatcher.watch(Query::collection("books"), |_| Err(anyhow!("bad shape")));

        let first = tokio::time::timeout(WAIT, sub.next()).await.unwrap().unwrap();
        assert!(first.is_err());
        assert!(sub.next().await.is_none());
    }
}
