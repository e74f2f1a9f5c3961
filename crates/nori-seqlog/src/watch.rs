//! Filesystem change subscription for registry entries.
//!
//! The parent directory is watched rather than the file itself so the
//! subscription survives the file being deleted by `clear` and recreated by
//! the next flush. Notifications arrive on the watcher's own thread and are
//! bounced onto the tokio runtime that opened the entry.

use crate::bus::{EventBus, LogEvent};
use crate::error::{Error, Result};
use crate::registry::RegistryEntry;
use nori_observe::{LogEvt, LogKind, VizEvent};
use notify::{EventKind, RecursiveMode, Watcher};
use std::sync::Arc;

/// Subscribes to modifications of `entry`'s backing file.
///
/// Each relevant notification triggers a reconcile followed by a `change`
/// event; watcher failures are published as `error` events. Must be called
/// from within a tokio runtime.
pub(crate) fn watch_entry(
    entry: &Arc<RegistryEntry>,
    bus: EventBus,
) -> Result<notify::RecommendedWatcher> {
    let runtime = tokio::runtime::Handle::current();
    let target = entry.path().to_path_buf();
    let dir = target
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| Error::InvalidArgument(format!("{} has no parent", target.display())))?;
    let weak = Arc::downgrade(entry);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event.paths.iter().any(|p| p == &target);
                if !relevant {
                    return;
                }

                let Some(entry) = weak.upgrade() else {
                    return;
                };
                let bus = bus.clone();
                runtime.spawn(async move {
                    entry.refresh(&bus).await;
                });
            }
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "file watch reported an error");
                if let Some(entry) = weak.upgrade() {
                    entry.meter().emit(VizEvent::Log(LogEvt {
                        file: target.display().to_string(),
                        kind: LogKind::WatchError,
                    }));
                }
                bus.publish(LogEvent::Error {
                    path: target.clone(),
                    error: Arc::new(Error::Watch(e)),
                });
            }
        }
    })?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
