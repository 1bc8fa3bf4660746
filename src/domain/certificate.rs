use serde::{Deserialize, Serialize};

/// The two certificate renditions the worker can produce.
///
/// The kind decides the artifact extension, and thereby the Content-Type
/// framing at the HTTP boundary: previews are inline PNG images, downloads
/// are PDF attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateKind {
    Preview,
    Download,
}

impl CertificateKind {
    pub fn extension(self) -> &'static str {
        match self {
            CertificateKind::Preview => "png",
            CertificateKind::Download => "pdf",
        }
    }

    /// Filename prefix for ephemeral artifacts. The janitor matches on these
    /// prefixes when reclaiming abandoned files, so the set here and the set
    /// in the sweep must stay in step.
    pub fn artifact_prefix(self) -> &'static str {
        match self {
            CertificateKind::Preview => "preview_",
            CertificateKind::Download => "download_",
        }
    }
}
