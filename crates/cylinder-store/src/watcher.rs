use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::channel::{ChangeNotifier, StoreEvent};
use crate::error::StoreResult;
use crate::json_file::load;

/// Watches a JSON store file and rebroadcasts its contents on change.
///
/// Our own writes also trigger it; the resulting duplicate snapshot is
/// identical and harmless.
pub struct FileWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub(crate) fn start(path: PathBuf, notifier: ChangeNotifier) -> StoreResult<Self> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // Ensure the directory exists before watching
        std::fs::create_dir_all(&dir)?;

        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => Self::handle_event(&target, &notifier, &event),
            Err(e) => notifier.publish(StoreEvent::Degraded {
                reason: format!("file watcher error: {}", e),
            }),
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %path.display(), "watching session file");

        Ok(Self {
            path,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle_event(target: &Path, notifier: &ChangeNotifier, event: &Event) {
        let touches_target = event
            .paths
            .iter()
            .any(|p| p.file_name() == target.file_name());
        if !touches_target {
            return;
        }

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
            _ => return,
        }

        match load(target) {
            Ok(sessions) => notifier.publish_snapshot(sessions),
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "failed to reload session file");
                notifier.publish(StoreEvent::Degraded {
                    reason: e.to_string(),
                });
            }
        }
    }
}
