//! Background sweep reclaiming abandoned render artifacts.

use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use metrics::counter;
use tokio::fs;
use tracing::{info, warn};

pub const METRIC_JANITOR_RECLAIMED: &str = "attesta_janitor_reclaimed_total";

/// Filename prefixes marking ephemeral artifacts. Must stay in step with
/// [`crate::domain::certificate::CertificateKind::artifact_prefix`].
const EPHEMERAL_PREFIXES: [&str; 2] = ["preview_", "download_"];

/// Periodic sweeper for artifacts whose owning request never deleted them
/// (crashes, leaked cleanups).
///
/// The janitor shares no state with in-flight requests. Not deleting a
/// legitimate in-flight artifact rests entirely on `expiry_age` being far
/// larger than the worst-case admission wait plus render duration; the
/// config layer documents that constraint.
#[derive(Debug, Clone)]
pub struct Janitor {
    directory: PathBuf,
    expiry_age: Duration,
}

impl Janitor {
    pub fn new(directory: PathBuf, expiry_age: Duration) -> Self {
        Self {
            directory,
            expiry_age,
        }
    }

    /// Run sweeps forever on the given cadence. Spawned once at startup;
    /// nothing a sweep encounters can end the schedule.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One pass over the artifact directory. Returns the number of entries
    /// reclaimed; every per-entry failure is logged and skipped.
    pub async fn sweep(&self) -> usize {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(
                    target = "application::janitor",
                    directory = %self.directory.display(),
                    error = %err,
                    "failed to list artifact directory; skipping sweep"
                );
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut reclaimed = 0usize;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(
                        target = "application::janitor",
                        directory = %self.directory.display(),
                        error = %err,
                        "failed to advance directory listing; ending sweep early"
                    );
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !EPHEMERAL_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
            {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(
                        target = "application::janitor",
                        entry = %entry.path().display(),
                        error = %err,
                        "failed to stat artifact; skipping entry"
                    );
                    continue;
                }
            };

            let age = now
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age <= self.expiry_age {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => reclaimed += 1,
                // The owning request got there first; that is the good case.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        target = "application::janitor",
                        entry = %entry.path().display(),
                        error = %err,
                        "failed to reclaim artifact; continuing sweep"
                    );
                }
            }
        }

        counter!(METRIC_JANITOR_RECLAIMED).increment(reclaimed as u64);
        if reclaimed > 0 {
            info!(
                target = "application::janitor",
                directory = %self.directory.display(),
                reclaimed,
                "reclaimed abandoned artifacts"
            );
        }
        reclaimed
    }
}
