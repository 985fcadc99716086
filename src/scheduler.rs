use crate::collectors::SnapshotSource;
use crate::metrics::Metrics;
use crate::snapshot::HostSnapshot;
use crate::store::SnapshotStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Latest snapshot handed to the rendering side by the live loop.
pub type LiveFeed = watch::Receiver<Option<Arc<HostSnapshot>>>;

/// Runs a snapshot source off the async runtime and refreshes the
/// `infos-<host>.json` file after every collection.
#[derive(Clone)]
pub struct Collector {
    source: Arc<Mutex<Box<dyn SnapshotSource>>>,
    store: Arc<SnapshotStore>,
    metrics: Arc<Metrics>,
}

impl Collector {
    pub fn new(source: Box<dyn SnapshotSource>, store: Arc<SnapshotStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            store,
            metrics,
        }
    }

    /// `None` only when the collection task itself died.
    pub async fn collect(&self) -> Option<Arc<HostSnapshot>> {
        let source = self.source.clone();
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || {
            let snapshot = {
                let mut guard = source.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.capture()
            };
            let written = store.write_latest(&snapshot);
            (snapshot, written)
        })
        .await;

        let (snapshot, written) = match result {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "snapshot collection task failed");
                return None;
            }
        };
        if let Err(err) = written {
            warn!(error = %err, "failed to write latest snapshot");
            self.metrics.inc_store_error("latest");
        }
        self.metrics.update_from_snapshot(&snapshot);
        Some(Arc::new(snapshot))
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// A running periodic loop that can be stopped on its own.
pub struct LoopHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the loop and waits for the tick in progress to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            error!(task = self.name, error = %err, "loop task ended abnormally");
        }
    }
}

/// Collects every `period` and publishes the snapshot on `publish`. The
/// next tick starts `period` after the previous one completed.
pub fn spawn_live(
    collector: Collector,
    period: Duration,
    publish: watch::Sender<Option<Arc<HostSnapshot>>>,
) -> LoopHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        info!(period_secs = period.as_secs_f64(), "live loop started");
        loop {
            if *stop_rx.borrow() {
                break;
            }
            if let Some(snapshot) = collector.collect().await {
                debug!(host = %snapshot.host_name, cpu = snapshot.cpu_usage_percent, "live tick");
                publish.send_replace(Some(snapshot));
                collector.metrics().inc_tick("live");
            }
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
        info!("live loop stopped");
    });
    LoopHandle {
        name: "live",
        stop,
        task,
    }
}

/// Collects every `period` and writes each snapshot to the next archive
/// slot. Slot numbering resumes after the newest existing archive file and
/// wraps at the store's bound.
pub fn spawn_archive(collector: Collector, store: Arc<SnapshotStore>, period: Duration) -> LoopHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        info!(period_secs = period.as_secs_f64(), "archive loop started");
        let mut next: Option<u32> = None;
        loop {
            if *stop_rx.borrow() {
                break;
            }
            if let Some(snapshot) = collector.collect().await {
                let index = match next {
                    Some(index) => index,
                    None => {
                        let store = store.clone();
                        let host = snapshot.host_name.clone();
                        tokio::task::spawn_blocking(move || store.resume_index(&host))
                            .await
                            .unwrap_or(1)
                    }
                };
                archive_one(&store, collector.metrics(), index, snapshot).await;
                let following = store.next_index(index);
                if following < index {
                    info!(index, "archive index wrapped, oldest files will be overwritten");
                }
                next = Some(following);
                collector.metrics().inc_tick("archive");
            }
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
        info!("archive loop stopped");
    });
    LoopHandle {
        name: "archive",
        stop,
        task,
    }
}

async fn archive_one(store: &Arc<SnapshotStore>, metrics: &Arc<Metrics>, index: u32, snapshot: Arc<HostSnapshot>) {
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || store.write_archive(index, &snapshot)).await;
    match result {
        Ok(Ok(path)) => {
            info!(index, path = %path.display(), "snapshot archived");
            metrics.inc_archive_write();
        }
        Ok(Err(err)) => {
            warn!(index, error = %err, "failed to archive snapshot");
            metrics.inc_store_error("archive");
        }
        Err(err) => {
            error!(index, error = %err, "archive write task failed");
            metrics.inc_store_error("archive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::sample_snapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    struct CountingSource {
        count: Arc<AtomicUsize>,
    }

    impl SnapshotSource for CountingSource {
        fn capture(&mut self) -> HostSnapshot {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            let mut snapshot = sample_snapshot();
            snapshot.uptime_seconds = n as u64;
            snapshot
        }
    }

    fn setup(max_index: u32) -> (TempDir, Arc<SnapshotStore>, Collector, Arc<AtomicUsize>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(
            dir.path().join("out"),
            dir.path().join("archive"),
            max_index,
        ));
        let count = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new(
            Box::new(CountingSource {
                count: count.clone(),
            }),
            store.clone(),
            Metrics::new().unwrap(),
        );
        (dir, store, collector, count)
    }

    #[tokio::test(start_paused = true)]
    async fn live_loop_publishes_every_period() {
        let (dir, _store, collector, count) = setup(10);
        let (tx, mut rx) = watch::channel(None);
        let handle = spawn_live(collector, Duration::from_secs(1), tx);

        rx.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 4);
        let latest = rx.borrow().clone().expect("published");
        assert_eq!(latest.uptime_seconds, 3);
        assert!(dir.path().join("out").join("infos-web-01.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn archive_loop_rotates_indices() {
        let (dir, store, collector, count) = setup(2);
        let metrics = collector.metrics().clone();
        let handle = spawn_archive(collector, store.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.agent_archive_writes_total.get(), 3.0);
        let archive = dir.path().join("archive");
        let mut names: Vec<String> = std::fs::read_dir(&archive)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["infos1-web-01.json", "infos2-web-01.json"]);
        // third tick wrapped onto slot 1
        let slot1 = SnapshotStore::read(&archive.join("infos1-web-01.json")).unwrap();
        assert_eq!(slot1.uptime_seconds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loops_stop_independently() {
        let (_dir, store, collector, _count) = setup(10);
        let (tx, _rx) = watch::channel(None);
        let live = spawn_live(collector.clone(), Duration::from_secs(1), tx);
        let archive = spawn_archive(collector, store, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(2)).await;
        live.stop().await;
        assert!(!archive.is_finished());
        assert_eq!(archive.name(), "archive");
        archive.stop().await;
    }
}
