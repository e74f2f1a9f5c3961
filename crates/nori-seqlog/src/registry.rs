//! Registry of open backing files.
//!
//! A [`Registry`] holds at most one [`RegistryEntry`] per canonical path. The
//! entry owns the persisted view of the file, the modification time of the last
//! read, and the change watch; it lives exactly as long as some handle is bound
//! to it. Handles built on the same registry share entries and the event bus.

use crate::bus::{EventBus, LogEvent};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::file;
use crate::handle::HandleInner;
use crate::reconcile::reconcile;
use crate::scalar::Scalar;
use crate::watch;
use nori_observe::{obs_count, obs_gauge, LogEvt, LogKind, Meter, NoopMeter, VizEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};

/// Persisted view guarded as one unit so readers never see a half-applied reconcile.
struct EntryState {
    persisted: Vec<Scalar>,
    last_read_at: SystemTime,
}

/// Shared, reference-counted record of a backing file's known content.
pub struct RegistryEntry {
    path: PathBuf,
    state: Mutex<EntryState>,
    /// Serializes reconcile+append and clear against each other.
    io_lock: tokio::sync::Mutex<()>,
    ref_count: AtomicUsize,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    meter: Arc<dyn Meter>,
}

impl RegistryEntry {
    pub(crate) fn new(path: PathBuf, meter: Arc<dyn Meter>) -> Self {
        Self {
            path,
            state: Mutex::new(EntryState {
                persisted: Vec::new(),
                last_read_at: SystemTime::UNIX_EPOCH,
            }),
            io_lock: tokio::sync::Mutex::new(()),
            ref_count: AtomicUsize::new(0),
            watcher: Mutex::new(None),
            meter,
        }
    }

    /// Canonical path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of handles bound to this entry.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn persisted(&self) -> Vec<Scalar> {
        self.state.lock().persisted.clone()
    }

    pub fn persisted_len(&self) -> usize {
        self.state.lock().persisted.len()
    }

    /// Modification time observed at the last successful read (`UNIX_EPOCH` if none).
    pub fn last_read_at(&self) -> SystemTime {
        self.state.lock().last_read_at
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    pub(crate) fn meter(&self) -> &Arc<dyn Meter> {
        &self.meter
    }

    pub(crate) fn is_stale(&self, modified: SystemTime) -> bool {
        modified > self.state.lock().last_read_at
    }

    pub(crate) fn replace_persisted(&self, records: Vec<Scalar>, modified: SystemTime) {
        let mut state = self.state.lock();
        state.persisted = records;
        state.last_read_at = modified;
    }

    /// Runs `f` over the persisted records without copying them.
    pub(crate) fn with_persisted<R>(&self, f: impl FnOnce(&[Scalar]) -> R) -> R {
        f(&self.state.lock().persisted)
    }

    /// Reconciles with the file, durably appends `values`, then folds them into
    /// the persisted view.
    pub(crate) async fn append(&self, values: &[Scalar]) -> Result<()> {
        let _io = self.io_lock.lock().await;

        let mut reconciled = reconcile(&self.path, self).await?;

        let start = Instant::now();
        file::append_records(&self.path, values).await?;
        let elapsed_ms = start.elapsed().as_millis() as u32;

        reconciled.extend_from_slice(values);
        self.state.lock().persisted = reconciled;

        tracing::debug!(
            path = %self.path.display(),
            records = values.len(),
            ms = elapsed_ms,
            "flushed pending records"
        );
        obs_count!(self.meter, "seqlog_flush_total", &[], 1);
        obs_count!(self.meter, "seqlog_flushed_records_total", &[], values.len());
        self.meter
            .histo("seqlog_flush_latency_ms", &[])
            .observe(elapsed_ms as f64);
        self.meter.emit(VizEvent::Log(LogEvt {
            file: self.path.display().to_string(),
            kind: LogKind::Flushed {
                records: values.len(),
                ms: elapsed_ms,
            },
        }));

        Ok(())
    }

    /// Empties the persisted view, forgets the last read and deletes the file.
    pub(crate) async fn clear(&self) -> Result<()> {
        let _io = self.io_lock.lock().await;

        self.replace_persisted(Vec::new(), SystemTime::UNIX_EPOCH);
        file::remove_if_exists(&self.path).await?;

        tracing::debug!(path = %self.path.display(), "cleared backing file");
        self.meter.emit(VizEvent::Log(LogEvt {
            file: self.path.display().to_string(),
            kind: LogKind::Cleared,
        }));
        Ok(())
    }

    /// Reconciles after a filesystem notification and reports the outcome on `bus`.
    pub(crate) async fn refresh(&self, bus: &EventBus) {
        let _io = self.io_lock.lock().await;

        match reconcile(&self.path, self).await {
            Ok(_) => bus.publish(LogEvent::Change {
                path: self.path.clone(),
            }),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "reconcile after change failed");
                bus.publish(LogEvent::Error {
                    path: self.path.clone(),
                    error: Arc::new(e),
                });
            }
        }
    }

    fn stop_watching(&self) {
        // Dropping the watcher cancels the subscription.
        self.watcher.lock().take();
    }
}

/// Process-local table of open backing files.
///
/// Construct one per process (or per test) and share it as `Arc<Registry>`.
pub struct Registry {
    config: RegistryConfig,
    entries: tokio::sync::Mutex<HashMap<PathBuf, Arc<RegistryEntry>>>,
    /// Bound handles, for [`Registry::flush_all`].
    handles: Mutex<Vec<Weak<HandleInner>>>,
    bus: EventBus,
    meter: Arc<dyn Meter>,
}

impl Registry {
    /// Creates a registry with its own event bus and no telemetry.
    pub fn new(config: RegistryConfig) -> Result<Arc<Self>> {
        let bus = EventBus::new(config.event_channel_capacity.max(1));
        Self::with_parts(config, bus, Arc::new(NoopMeter))
    }

    /// Creates a registry publishing on an existing bus.
    pub fn with_bus(config: RegistryConfig, bus: EventBus) -> Result<Arc<Self>> {
        Self::with_parts(config, bus, Arc::new(NoopMeter))
    }

    /// Creates a registry with an explicit bus and observability meter.
    pub fn with_parts(
        config: RegistryConfig,
        bus: EventBus,
        meter: Arc<dyn Meter>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new(Self {
            config,
            entries: tokio::sync::Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            bus,
            meter,
        }))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogEvent> {
        self.bus.subscribe()
    }

    /// Looks up the entry for `path`, if some handle has it open.
    pub async fn entry(&self, path: impl AsRef<Path>) -> Option<Arc<RegistryEntry>> {
        let canonical = tokio::fs::canonicalize(path.as_ref()).await.ok()?;
        self.entries.lock().await.get(&canonical).cloned()
    }

    /// Canonical paths of all open entries.
    pub async fn open_paths(&self) -> Vec<PathBuf> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Flushes every bound handle of this registry.
    ///
    /// Intended for shutdown paths. All handles are attempted; the first error
    /// is returned. Returns the number of records written.
    pub async fn flush_all(&self) -> Result<usize> {
        let handles: Vec<Arc<HandleInner>> = {
            let mut handles = self.handles.lock();
            handles.retain(|h| h.strong_count() > 0);
            handles.iter().filter_map(Weak::upgrade).collect()
        };

        let mut written = 0;
        let mut first_err = None;
        for handle in handles {
            match handle.flush().await {
                Ok(n) => written += n,
                Err(e) => {
                    tracing::warn!(error = %e, "flush during shutdown failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Binds a new consumer to the entry for `path`, creating it on first use.
    pub(crate) async fn acquire(&self, path: &Path) -> Result<Arc<RegistryEntry>> {
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("path must not be empty".to_string()));
        }

        file::ensure_file(path).await?;
        let canonical = tokio::fs::canonicalize(path).await?;

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&canonical) {
            entry.ref_count.fetch_add(1, Ordering::AcqRel);
            return Ok(Arc::clone(entry));
        }

        let entry = Arc::new(RegistryEntry::new(canonical.clone(), Arc::clone(&self.meter)));
        let records = reconcile(&canonical, &entry).await?.len();

        let watcher = watch::watch_entry(&entry, self.bus.clone())?;
        *entry.watcher.lock() = Some(watcher);
        entry.ref_count.store(1, Ordering::Release);

        entries.insert(canonical.clone(), Arc::clone(&entry));

        tracing::info!(path = %canonical.display(), records, "opened backing file");
        obs_gauge!(self.meter, "seqlog_open_entries", &[], entries.len());
        self.meter.emit(VizEvent::Log(LogEvt {
            file: canonical.display().to_string(),
            kind: LogKind::Opened { records },
        }));

        Ok(entry)
    }

    /// Drops one consumer of `entry`; the last one tears the entry down.
    pub(crate) async fn release(&self, entry: &Arc<RegistryEntry>) {
        let mut entries = self.entries.lock().await;

        if entry.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        entry.stop_watching();
        if entries
            .get(&entry.path)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(&entry.path);
        }

        tracing::info!(path = %entry.path.display(), "closed backing file");
        obs_gauge!(self.meter, "seqlog_open_entries", &[], entries.len());
        self.meter.emit(VizEvent::Log(LogEvt {
            file: entry.path.display().to_string(),
            kind: LogKind::Closed,
        }));
    }

    pub(crate) fn track(&self, handle: &Arc<HandleInner>) {
        self.handles.lock().push(Arc::downgrade(handle));
    }

    pub(crate) fn untrack(&self, handle: &Arc<HandleInner>) {
        let target = Arc::downgrade(handle);
        self.handles
            .lock()
            .retain(|h| h.strong_count() > 0 && !h.ptr_eq(&target));
    }
}
