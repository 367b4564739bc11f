use crate::{
    config::{ConfigStore, Reload},
    metrics::ReloadMetrics,
};
use anyhow::{anyhow, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::{
    ffi::{OsStr, OsString},
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, error, info, info_span, Instrument};

/// Kubernetes projects ConfigMap volumes through a `..data` symlink that it
/// swaps atomically when the ConfigMap changes; the file itself is never
/// written in place.
const CONFIGMAP_DATA: &str = "..data";

/// Reloads a [`ConfigStore`] when its file changes.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    store: Arc<ConfigStore>,
    debounce: time::Duration,
    metrics: ReloadMetrics,
}

// === impl ConfigWatcher ===

impl ConfigWatcher {
    pub fn new(
        path: PathBuf,
        store: Arc<ConfigStore>,
        debounce: time::Duration,
        metrics: ReloadMetrics,
    ) -> Self {
        Self {
            path,
            store,
            debounce,
            metrics,
        }
    }

    /// Watches the directory containing the config file and spawns a task
    /// that reloads the store at most once per burst of changes.
    ///
    /// If the watch fails, the task ends and the last loaded policy keeps
    /// serving.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let Self {
            path,
            store,
            debounce: delay,
            metrics,
        } = self;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("config path {} has no file name", path.display()))?
            .to_os_string();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(on_event(file_name, changes_tx))?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "Watching config directory for changes");

        let on_quiet = move || {
            let store = store.clone();
            let path = path.clone();
            let metrics = metrics.clone();
            async move {
                // Reads and parses the file off of the runtime's workers.
                let reloaded =
                    tokio::task::spawn_blocking(move || reload(&store, &path, &metrics)).await;
                if let Err(error) = reloaded {
                    error!(%error, "Config reload task failed");
                }
            }
        };
        let task = tokio::spawn(
            async move {
                debounce(changes_rx, delay, on_quiet).await;
                // Keep the watch registered for as long as we debounce.
                drop(watcher);
                debug!("Config watch ended");
            }
            .instrument(info_span!("config_watcher")),
        );
        Ok(task)
    }
}

/// Builds the watch callback. It runs on the watcher's thread and forwards
/// relevant changes to the debouncer. A watch error closes the channel, which
/// ends the debouncer.
fn on_event(
    file_name: OsString,
    changes_tx: mpsc::UnboundedSender<()>,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    let mut changes_tx = Some(changes_tx);
    move |res| match res {
        Ok(event) => {
            debug!(kind = ?event.kind, paths = ?event.paths, "Filesystem event");
            if !is_config_event(&event, &file_name) {
                return;
            }
            info!(paths = ?event.paths, "Config file changed");
            if let Some(tx) = changes_tx.as_ref() {
                let _ = tx.send(());
            }
        }
        Err(error) => {
            if changes_tx.take().is_some() {
                error!(%error, "Config watch failed; hot reloading is disabled");
            }
        }
    }
}

fn is_config_event(event: &Event, file_name: &OsStr) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }

    event.paths.iter().any(|path| {
        path.file_name()
            .map(|name| name == file_name || name == CONFIGMAP_DATA)
            .unwrap_or(false)
    })
}

fn reload(store: &ConfigStore, path: &Path, metrics: &ReloadMetrics) {
    match store.load_from_file(path) {
        Ok(Reload::Updated) => {
            metrics.updated();
            info!(fingerprint = ?store.fingerprint(), "Config reloaded");
        }
        Ok(Reload::Unchanged) => {
            metrics.unchanged();
            debug!("Config contents unchanged");
        }
        Err(error) => {
            metrics.failed();
            error!(%error, "Failed to reload config; keeping the previous policy");
        }
    }
}

/// Runs `reload` once `delay` has passed without a change.
///
/// The timer is owned by this task: each change re-arms it, so a burst of
/// changes produces a single reload. Returns when the channel closes.
pub(crate) async fn debounce<F, R>(
    mut changes: mpsc::UnboundedReceiver<()>,
    delay: time::Duration,
    mut reload: F,
) where
    F: FnMut() -> R,
    R: Future<Output = ()>,
{
    // Idle: wait for the first change of a burst.
    while changes.recv().await.is_some() {
        // Armed: push the deadline out on each subsequent change.
        let timer = time::sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                () = &mut timer => {
                    reload().await;
                    break;
                }
                change = changes.recv() => match change {
                    Some(()) => timer.as_mut().reset(time::Instant::now() + delay),
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use notify::event::{CreateKind, DataChange, ModifyKind, RenameMode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DELAY: time::Duration = time::Duration::from_millis(200);

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> future::Ready<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let reload = {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                future::ready(())
            }
        };
        (count, reload)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_reloads_once_after_the_last_change() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (count, reload) = counter();
        let task = tokio::spawn(debounce(rx, DELAY, reload));

        tx.send(()).unwrap();
        time::sleep(time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        // The first change's deadline has passed, but the second re-armed it.
        time::sleep(DELAY - time::Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(time::Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Nothing further happens without new changes.
        time::sleep(DELAY * 10).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn each_quiet_period_reloads() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (count, reload) = counter();
        let task = tokio::spawn(debounce(rx, DELAY, reload));

        for expected in 1..=3 {
            for _ in 0..5 {
                tx.send(()).unwrap();
                time::sleep(time::Duration::from_millis(10)).await;
            }
            time::sleep(DELAY).await;
            assert_eq!(count.load(Ordering::SeqCst), expected);
        }

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cancels_a_pending_reload() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (count, reload) = counter();
        let task = tokio::spawn(debounce(rx, DELAY, reload));

        tx.send(()).unwrap();
        time::sleep(time::Duration::from_millis(10)).await;
        drop(tx);
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn filters_events() {
        let file_name = OsStr::new("config.yaml");
        let dir = PathBuf::from("/etc/route-validator");

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(dir.join("config.yaml"));
        assert!(is_config_event(&write, file_name));

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(dir.join("..data_tmp"))
            .add_path(dir.join("..data"));
        assert!(is_config_event(&rename, file_name));

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(dir.join("other.yaml"));
        assert!(!is_config_event(&create, file_name));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(dir.join("config.yaml"));
        assert!(!is_config_event(&access, file_name));
    }

    #[tokio::test]
    async fn reloads_store_on_file_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "matchDomains: [example.com]\n").expect("write");

        let store = Arc::new(ConfigStore::load(&path).expect("config must load"));
        let metrics = ReloadMetrics::default();
        let task = ConfigWatcher::new(
            path.clone(),
            store.clone(),
            time::Duration::from_millis(20),
            metrics.clone(),
        )
        .spawn()
        .expect("watch must start");

        std::fs::write(&path, "matchDomains: [example.org]\n").expect("write");

        let reloaded = time::timeout(time::Duration::from_secs(10), async {
            while store.get().match_domains != vec!["example.org"] {
                time::sleep(time::Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reloaded.is_ok(), "config must be reloaded");
        assert!(metrics.count("updated") >= 1);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn watch_errors_end_the_debouncer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (count, reload) = counter();
        let task = tokio::spawn(debounce(rx, DELAY, reload));

        let mut handle = on_event(OsString::from("config.yaml"), tx);
        let write = || {
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(PathBuf::from("/etc/route-validator/config.yaml"))
        };
        handle(Ok(write()));
        handle(Err(notify::Error::generic("inotify event queue overflowed")));
        // Events after the failure are dropped.
        handle(Ok(write()));

        time::timeout(DELAY * 10, task)
            .await
            .expect("debouncer must end")
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reload_failures_keep_watching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "matchDomains: [example.com]\n").expect("write");

        let store = Arc::new(ConfigStore::load(&path).expect("config must load"));
        let before = store.get();
        let metrics = ReloadMetrics::default();
        let task = ConfigWatcher::new(
            path.clone(),
            store.clone(),
            time::Duration::from_millis(20),
            metrics.clone(),
        )
        .spawn()
        .expect("watch must start");

        std::fs::write(&path, "matchDomains: 42\n").expect("write");
        let failed = time::timeout(time::Duration::from_secs(10), async {
            while metrics.count("failed") == 0 {
                time::sleep(time::Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(failed.is_ok(), "reload must fail");
        assert!(Arc::ptr_eq(&before, &store.get()));

        std::fs::write(&path, "matchDomains: [example.org]\n").expect("write");
        let reloaded = time::timeout(time::Duration::from_secs(10), async {
            while store.get().match_domains != vec!["example.org"] {
                time::sleep(time::Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reloaded.is_ok(), "config must be reloaded after a failure");
        assert!(!task.is_finished());

        task.abort();
    }
}
