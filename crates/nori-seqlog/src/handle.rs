//! Caller-facing log handle.
//!
//! A [`SeqLog`] buffers pushes in memory and writes them to its backing file in
//! debounced batches. Reads see the registry's persisted records followed by
//! the handle's own pending records.

use crate::bus::LogEvent;
use crate::config::LogOptions;
use crate::error::{Error, Result};
use crate::file;
use crate::registry::{Registry, RegistryEntry};
use crate::scalar::Scalar;
use crate::scheduler::{FlushTimer, TimeoutResult};
use crate::view;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// State of a handle bound to a registry entry.
struct Binding {
    entry: Arc<RegistryEntry>,
    options: LogOptions,
    runtime: tokio::runtime::Handle,
}

/// Handle state shared with its flush timer task.
pub(crate) struct HandleInner {
    registry: Arc<Registry>,
    pending: Mutex<Vec<Scalar>>,
    binding: Mutex<Option<Binding>>,
    timer: Mutex<FlushTimer>,
    /// Held for the whole of a flush or clear so snapshots never overlap.
    flush_lock: tokio::sync::Mutex<()>,
}

impl HandleInner {
    fn entry(&self) -> Option<Arc<RegistryEntry>> {
        self.binding.lock().as_ref().map(|b| Arc::clone(&b.entry))
    }

    fn publish_error(&self, error: Error) {
        let path = self
            .entry()
            .map(|e| e.path().to_path_buf())
            .unwrap_or_default();
        self.registry.bus().publish(LogEvent::Error {
            path,
            error: Arc::new(error),
        });
    }

    /// Arms the debounce timer if idle. The timer task flushes when it fires.
    fn schedule_flush(self: &Arc<Self>, delay: Duration) {
        let runtime = match self.binding.lock().as_ref() {
            Some(binding) => binding.runtime.clone(),
            None => return,
        };
        let Some(token) = self.timer.lock().arm() else {
            return;
        };

        // The timer must not keep a dropped handle alive.
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            if token.wait(delay).await == TimeoutResult::Cancelled {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.timer.lock().fire(&token) {
                return;
            }
            if let Err(e) = inner.flush().await {
                tracing::warn!(error = %e, "scheduled flush failed");
                inner.publish_error(e);
            }
        });
    }

    fn schedule_push(self: &Arc<Self>) {
        let delay = match self.binding.lock().as_ref() {
            Some(binding) => binding.options.flush_delay,
            None => return,
        };
        self.schedule_flush(delay);
    }

    /// Persists a snapshot of the pending records and removes exactly that
    /// snapshot from the buffer. Records pushed meanwhile stay pending.
    ///
    /// Returns the number of records written; an unbound handle writes nothing.
    pub(crate) async fn flush(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock().await;

        let Some(entry) = self.entry() else {
            return Ok(0);
        };

        let snapshot: Vec<Scalar> = self.pending.lock().clone();
        if snapshot.is_empty() {
            return Ok(0);
        }

        entry.append(&snapshot).await?;

        // Only pushes can run concurrently (clear holds flush_lock), and they
        // append, so the snapshot is still the prefix of the buffer.
        self.pending.lock().drain(..snapshot.len());
        Ok(snapshot.len())
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.timer.get_mut().cancel();
        let Some(binding) = self.binding.get_mut().take() else {
            return;
        };

        // Best-effort exit flush: no runtime can be relied upon here.
        let pending = std::mem::take(self.pending.get_mut());
        if !pending.is_empty() {
            match file::append_records_blocking(binding.entry.path(), &pending) {
                Ok(()) => tracing::debug!(
                    path = %binding.entry.path().display(),
                    records = pending.len(),
                    "flushed pending records on drop"
                ),
                Err(e) => tracing::warn!(
                    path = %binding.entry.path().display(),
                    error = %e,
                    "dropping handle lost pending records"
                ),
            }
        }

        let registry = Arc::clone(&self.registry);
        let entry = binding.entry;
        binding.runtime.spawn(async move {
            registry.release(&entry).await;
        });
    }
}

/// A handle on an append-only scalar log.
///
/// # Example
///
/// ```no_run
/// use nori_seqlog::{LogOptions, Registry, RegistryConfig, Scalar, SeqLog};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = Registry::new(RegistryConfig::default())?;
///     let log = SeqLog::new(&registry);
///     log.open("datafile", LogOptions::default()).await?;
///
///     log.push(8)?;
///     log.push("nine")?;
///     assert_eq!(log.slice(-1, None), vec![Scalar::from("nine")]);
///
///     log.close().await?;
///     Ok(())
/// }
/// ```
pub struct SeqLog {
    inner: Arc<HandleInner>,
}

impl SeqLog {
    /// Creates an unbound handle. Pushes are kept in memory until it is opened.
    pub fn new(registry: &Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                registry: Arc::clone(registry),
                pending: Mutex::new(Vec::new()),
                binding: Mutex::new(None),
                timer: Mutex::new(FlushTimer::new()),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Binds the handle to the log stored at `path`, creating the file if needed.
    ///
    /// Records pushed before opening are flushed right away.
    pub async fn open(&self, path: impl AsRef<Path>, options: LogOptions) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }
        options.validate()?;

        let registry = &self.inner.registry;
        let entry = registry.acquire(path.as_ref()).await?;

        let raced = {
            let mut binding = self.inner.binding.lock();
            if binding.is_some() {
                true
            } else {
                *binding = Some(Binding {
                    entry: Arc::clone(&entry),
                    options,
                    runtime: tokio::runtime::Handle::current(),
                });
                false
            }
        };
        if raced {
            registry.release(&entry).await;
            return Err(Error::AlreadyOpen);
        }

        registry.track(&self.inner);

        if !self.inner.pending.lock().is_empty() {
            self.inner.schedule_flush(Duration::ZERO);
        }
        Ok(())
    }

    /// Flushes pending records and unbinds the handle.
    ///
    /// The last handle on a path tears down its registry entry. The handle is
    /// unbound even if the final flush fails; the error is still returned.
    pub async fn close(&self) -> Result<()> {
        let entry = self.inner.entry().ok_or(Error::NotOpen)?;

        self.inner.timer.lock().cancel();
        let flushed = self.inner.flush().await;

        let binding = self.inner.binding.lock().take();
        if binding.is_none() {
            // A concurrent close got here first
            return Err(Error::NotOpen);
        }
        // Pushes racing the final flush must not arm a timer on an unbound handle.
        self.inner.timer.lock().cancel();

        let registry = &self.inner.registry;
        registry.untrack(&self.inner);
        registry.release(&entry).await;

        flushed.map(|_| ())
    }

    pub fn is_open(&self) -> bool {
        self.inner.binding.lock().is_some()
    }

    /// Canonical path of the backing file, if open.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.entry().map(|e| e.path().to_path_buf())
    }

    /// Appends a value.
    ///
    /// Accepts anything convertible into a [`Scalar`]: integers, floats, strings,
    /// or a `serde_json::Value` (which fails with [`Error::InvalidType`] unless it
    /// is a number or string). Strings containing a newline fail with
    /// [`Error::InvalidValue`].
    pub fn push<V>(&self, value: V) -> Result<()>
    where
        V: TryInto<Scalar>,
        Error: From<V::Error>,
    {
        let value: Scalar = value.try_into()?;
        value.validate()?;

        self.inner.pending.lock().push(value.clone());
        self.inner.registry.bus().publish(LogEvent::Push(value));
        self.inner.schedule_push();
        Ok(())
    }

    /// Number of records: persisted (if open) plus pending.
    pub fn len(&self) -> usize {
        let persisted = self.inner.entry().map_or(0, |e| e.persisted_len());
        persisted + self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in `[start, end)` of the logical sequence.
    ///
    /// Negative indices count from the end; `end` of `None` or `Some(0)`
    /// selects through the last record. Never performs I/O.
    pub fn slice(&self, start: i64, end: Option<i64>) -> Vec<Scalar> {
        match self.inner.entry() {
            Some(entry) => entry.with_persisted(|persisted| {
                let pending = self.inner.pending.lock();
                view::compose(persisted, pending.as_slice(), start, end)
            }),
            None => {
                let pending = self.inner.pending.lock();
                view::compose(&[], pending.as_slice(), start, end)
            }
        }
    }

    /// Records that have not been durably written yet.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// True while a debounced flush is armed and has not fired.
    pub fn flush_scheduled(&self) -> bool {
        self.inner.timer.lock().is_scheduled()
    }

    /// Writes pending records now instead of waiting for the debounce timer.
    ///
    /// Returns the number of records written.
    pub async fn flush(&self) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        self.inner.flush().await
    }

    /// Drops all records of this handle and, if open, the persisted records and
    /// the backing file.
    ///
    /// Pending records of *other* handles on the same file are untouched and
    /// will be written by their next flush.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.inner.flush_lock.lock().await;

        self.inner.pending.lock().clear();

        let path = match self.inner.entry() {
            Some(entry) => {
                entry.clear().await?;
                Some(entry.path().to_path_buf())
            }
            None => None,
        };

        self.inner.registry.bus().publish(LogEvent::Clear { path });
        Ok(())
    }

    /// Subscribes to the registry-wide event bus.
    ///
    /// The receiver sees events from every handle of the registry, not just
    /// this one. Dropping it unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.registry.subscribe()
    }
}

impl std::fmt::Debug for SeqLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqLog")
            .field("path", &self.path())
            .field("len", &self.len())
            .field("pending", &self.pending_len())
            .finish()
    }
}
