use std::{ffi::OsString, path::PathBuf};

use thiserror::Error;

/// One render invocation, fully described. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Roster id of the teacher the certificate is for.
    pub teacher_id: u64,
    pub name: String,
    pub category: String,
    pub certificate_no: String,
    pub level: String,
    pub session: Option<String>,
    /// Where the worker must write the artifact.
    pub output_path: PathBuf,
    /// Directory holding templates and fonts; the worker falls back to its
    /// own defaults when absent.
    pub resource_dir: Option<PathBuf>,
}

impl RenderRequest {
    /// The worker's argument vector, as discrete arguments.
    ///
    /// Never join these into a shell string: handing each value to the OS as
    /// its own argv entry is what keeps teacher-supplied names from being
    /// interpreted as anything but data.
    pub fn argv(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.name.clone().into(),
            self.category.clone().into(),
            self.certificate_no.clone().into(),
            self.level.clone().into(),
        ];
        if let Some(session) = &self.session {
            args.push(session.clone().into());
        }
        args.push(self.output_path.clone().into_os_string());
        if let Some(resource_dir) = &self.resource_dir {
            args.push(resource_dir.clone().into_os_string());
        }
        args
    }
}

/// Failure categories derived from the worker's diagnostic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFailureKind {
    MissingDependency,
    MissingTemplate,
    MissingFont,
    WorkerFailed,
}

impl RenderFailureKind {
    /// Stable, user-facing message for the category.
    pub fn public_message(self) -> &'static str {
        match self {
            RenderFailureKind::MissingDependency => {
                "The server is missing its image-processing library; contact the administrator"
            }
            RenderFailureKind::MissingTemplate => {
                "The certificate template image is missing; the certificate cannot be generated"
            }
            RenderFailureKind::MissingFont => {
                "The certificate font is missing; the certificate cannot be generated"
            }
            RenderFailureKind::WorkerFailed => "Certificate generation failed",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RenderFailureKind::MissingDependency => "missing_dependency",
            RenderFailureKind::MissingTemplate => "missing_template",
            RenderFailureKind::MissingFont => "missing_font",
            RenderFailureKind::WorkerFailed => "worker_failed",
        }
    }
}

/// Map the worker's free-text diagnostic onto a failure category.
///
/// Substring matching against the worker's literal messages is the contract
/// we inherited; the markers below are the strings the deployed worker
/// actually prints. Match order mirrors the worker's own error precedence.
/// Unmatched text falls into the generic category, which carries the raw
/// diagnostic for operators.
pub fn classify_diagnostic(diagnostic: &str) -> RenderFailureKind {
    if diagnostic.contains("Pillow") {
        RenderFailureKind::MissingDependency
    } else if diagnostic.contains("模板") {
        RenderFailureKind::MissingTemplate
    } else if diagnostic.contains("字体") {
        RenderFailureKind::MissingFont
    } else {
        RenderFailureKind::WorkerFailed
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to collect render worker output: {0}")]
    Io(#[from] std::io::Error),
    #[error("render worker failed ({kind:?}): {diagnostic}")]
    Worker {
        kind: RenderFailureKind,
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("render worker exited cleanly but produced no artifact at {path}")]
    ArtifactMissing { path: PathBuf },
}

impl RenderError {
    /// Stable message to surface to the request's caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            RenderError::Worker { kind, .. } => kind.public_message(),
            RenderError::ArtifactMissing { .. } => RenderFailureKind::WorkerFailed.public_message(),
            RenderError::Spawn(_) | RenderError::Io(_) => {
                "Certificate rendering is unavailable; contact the administrator"
            }
        }
    }
}
