//! Ephemeral artifact storage: collision-free allocation, streamed delivery,
//! guaranteed deletion.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
};
use tracing::warn;

use crate::{application::admission::RenderPermit, domain::certificate::CertificateKind};

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open artifact for streaming: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to stream artifact to caller: {0}")]
    Copy(#[source] std::io::Error),
}

/// Filesystem-backed store for worker output files.
///
/// Paths are unique under concurrent allocation even for the same identity:
/// the name combines the identity with the allocation instant and a
/// process-wide sequence number. The name is not content-addressed and not
/// globally unique; it only has to be unmistakable within one node's
/// artifact directory.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl ArtifactStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve an output path for a render. The worker writes here; nothing
    /// exists at the path until it does.
    pub fn allocate(&self, kind: CertificateKind, identity: &str) -> PathBuf {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let identity = sanitize_identity(identity);
        self.root.join(format!(
            "{}{}_{}_{}.{}",
            kind.artifact_prefix(),
            identity,
            millis,
            seq,
            kind.extension()
        ))
    }
}

/// Owning handle to a rendered file. Exists only for successful renders.
///
/// Dropping the handle deletes the file; that is the sole deletion path for
/// an owned artifact, so completion, sink failure and cancellation all
/// converge on it. Deletion is idempotent: if the janitor got there first,
/// the missing file is success, not an error.
#[derive(Debug)]
pub struct EphemeralArtifact {
    path: PathBuf,
}

impl EphemeralArtifact {
    pub(crate) fn claim(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EphemeralArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target = "application::artifacts",
                    path = %self.path.display(),
                    error = %err,
                    "failed to delete ephemeral artifact"
                );
            }
        }
    }
}

/// Copy the artifact's bytes into `sink`, deleting the file afterwards.
///
/// The artifact is consumed: whether the copy completes, the sink rejects a
/// write, or the future is cancelled mid-flight, the guard's drop removes
/// the file.
pub async fn stream_and_delete<W>(
    artifact: EphemeralArtifact,
    sink: &mut W,
) -> Result<u64, StreamError>
where
    W: AsyncWrite + Unpin,
{
    let mut file = fs::File::open(artifact.path()).await.map_err(StreamError::Open)?;
    let copied = tokio::io::copy(&mut file, sink)
        .await
        .map_err(StreamError::Copy)?;
    sink.flush().await.map_err(StreamError::Copy)?;
    Ok(copied)
}

/// Chunked byte stream over the artifact that owns both the file guard and
/// the admission permit.
///
/// The HTTP layer hands this to the response body, so a caller that
/// disconnects mid-stream drops the body, which drops the stream, which
/// deletes the artifact and releases the permit. Cleanup is unconditional on
/// how far the copy got.
pub fn body_stream(
    artifact: EphemeralArtifact,
    permit: RenderPermit,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::try_stream! {
        let _permit = permit;
        let artifact = artifact;
        let mut file = fs::File::open(artifact.path())
            .await
            .inspect_err(|err| {
                warn!(
                    target = "application::artifacts",
                    path = %artifact.path().display(),
                    error = %err,
                    "failed to open artifact for streaming"
                );
            })?;
        let mut buffer = vec![0u8; STREAM_CHUNK_BYTES];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .inspect_err(|err| {
                    warn!(
                        target = "application::artifacts",
                        path = %artifact.path().display(),
                        error = %err,
                        "artifact stream failed mid-transfer"
                    );
                })?;
            if read == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buffer[..read]);
        }
    }
}

fn sanitize_identity(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}
