//! Per-request orchestration of the certificate rendering pipeline.

use std::{path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;
use tracing::info;

use crate::{
    application::{
        admission::{AdmissionError, AdmissionGate, RenderPermit},
        artifacts::{ArtifactStore, EphemeralArtifact},
        directory::{DirectoryError, TeacherDirectory},
        render::{RenderError, RenderInvoker, RenderRequest},
    },
    domain::{certificate::CertificateKind, teacher::Teacher},
};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("no teacher matches the supplied phone number")]
    UnknownTeacher,
    #[error("multiple roster rows share this phone number")]
    AmbiguousAccount,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Busy(#[from] AdmissionError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// A successfully rendered certificate, ready to stream.
///
/// Holds both the artifact guard and the admission permit: the caller (or
/// the response body built from this) keeps them alive for the duration of
/// the stream, and dropping the pair (however the stream ends) deletes the
/// file and returns the permit.
#[derive(Debug)]
pub struct IssuedCertificate {
    pub artifact: EphemeralArtifact,
    pub permit: RenderPermit,
    pub kind: CertificateKind,
    pub file_name: String,
}

/// Front door of the rendering pipeline.
///
/// One request runs: identity lookup → admission (timed) → worker invocation
/// → issued certificate. Failure anywhere propagates immediately; permits
/// and artifacts are scope-bound, so every early return releases whatever
/// had been acquired by then.
pub struct CertificateService {
    directory: Arc<dyn TeacherDirectory>,
    gate: AdmissionGate,
    invoker: Arc<RenderInvoker>,
    store: Arc<ArtifactStore>,
    resource_dir: Option<PathBuf>,
    preview_timeout: Duration,
    download_timeout: Duration,
}

impl CertificateService {
    pub fn new(
        directory: Arc<dyn TeacherDirectory>,
        gate: AdmissionGate,
        invoker: Arc<RenderInvoker>,
        store: Arc<ArtifactStore>,
        resource_dir: Option<PathBuf>,
        preview_timeout: Duration,
        download_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            gate,
            invoker,
            store,
            resource_dir,
            preview_timeout,
            download_timeout,
        }
    }

    /// Render a certificate for the teacher registered under `phone`.
    pub async fn issue(
        &self,
        phone: &str,
        kind: CertificateKind,
    ) -> Result<IssuedCertificate, CertificateError> {
        let teacher = self.lookup_unique_by_phone(phone).await?;

        let wait = match kind {
            CertificateKind::Preview => self.preview_timeout,
            CertificateKind::Download => self.download_timeout,
        };
        // Admission before anything else; a request turned away here must
        // leave no trace: no worker process, no allocated path.
        let permit = self.gate.acquire(wait).await?;

        let output_path = self.store.allocate(kind, &teacher.phone);
        let request = RenderRequest {
            teacher_id: teacher.id,
            name: teacher.name.clone(),
            category: teacher.category.clone(),
            certificate_no: teacher.certificate_no.clone(),
            level: teacher.level.clone(),
            session: teacher.session.clone(),
            output_path,
            resource_dir: self.resource_dir.clone(),
        };
        let artifact = self.invoker.render(&request).await?;

        info!(
            target = "application::certificates",
            teacher_id = teacher.id,
            kind = ?kind,
            artifact = %artifact.path().display(),
            "certificate issued"
        );

        let file_name = format!("{}_certificate.{}", teacher.name, kind.extension());
        Ok(IssuedCertificate {
            artifact,
            permit,
            kind,
            file_name,
        })
    }

    /// Resolve a phone number to exactly one roster row.
    pub async fn lookup_unique_by_phone(
        &self,
        phone: &str,
    ) -> Result<Teacher, CertificateError> {
        let mut matches = self.directory.find_all_by_phone(phone.trim()).await?;
        match matches.len() {
            0 => Err(CertificateError::UnknownTeacher),
            1 => Ok(matches.swap_remove(0)),
            _ => Err(CertificateError::AmbiguousAccount),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;

    struct FixedDirectory {
        rows: Vec<Teacher>,
    }

    #[async_trait]
    impl TeacherDirectory for FixedDirectory {
        async fn find_by_id(&self, id: u64) -> Result<Option<Teacher>, DirectoryError> {
            Ok(self.rows.iter().find(|t| t.id == id).cloned())
        }

        async fn find_all_by_phone(&self, phone: &str) -> Result<Vec<Teacher>, DirectoryError> {
            Ok(self
                .rows
                .iter()
                .filter(|t| t.phone == phone)
                .cloned()
                .collect())
        }

        async fn find_by_name_and_id_card(
            &self,
            name: &str,
            id_card: &str,
        ) -> Result<Vec<Teacher>, DirectoryError> {
            Ok(self
                .rows
                .iter()
                .filter(|t| t.name == name && t.id_card.as_deref() == Some(id_card))
                .cloned()
                .collect())
        }
    }

    fn teacher(id: u64, phone: &str) -> Teacher {
        Teacher {
            id,
            name: format!("teacher-{id}"),
            phone: phone.to_string(),
            id_card: None,
            category: "潍坊市参培教师".to_string(),
            score: None,
            certificate_no: format!("WF-2025-{id:04}"),
            level: "优秀".to_string(),
            session: None,
            password: None,
            cert_suffix: None,
        }
    }

    fn service(
        rows: Vec<Teacher>,
        capacity: u32,
        store_dir: &std::path::Path,
        script: PathBuf,
    ) -> (CertificateService, Arc<RenderInvoker>, AdmissionGate) {
        let invoker = Arc::new(RenderInvoker::new("/bin/sh".into(), script));
        let gate = AdmissionGate::new(NonZeroU32::new(capacity).expect("capacity"));
        let service = CertificateService::new(
            Arc::new(FixedDirectory { rows }),
            gate.clone(),
            Arc::clone(&invoker),
            Arc::new(ArtifactStore::new(store_dir.to_path_buf()).expect("store")),
            None,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        (service, invoker, gate)
    }

    #[tokio::test]
    async fn unknown_phone_is_rejected_before_admission() {
        let dir = TempDir::new().expect("temp dir");
        let (service, invoker, _gate) = service(
            vec![teacher(1, "13800000000")],
            1,
            dir.path(),
            PathBuf::from("/bin/true"),
        );

        let err = service
            .issue("13999999999", CertificateKind::Preview)
            .await
            .expect_err("unknown phone");
        assert!(matches!(err, CertificateError::UnknownTeacher));
        assert_eq!(invoker.invocations(), 0);
    }

    #[tokio::test]
    async fn duplicated_phone_is_ambiguous() {
        let dir = TempDir::new().expect("temp dir");
        let (service, _invoker, _gate) = service(
            vec![teacher(1, "13800000000"), teacher(2, "13800000000")],
            1,
            dir.path(),
            PathBuf::from("/bin/true"),
        );

        let err = service
            .issue("13800000000", CertificateKind::Preview)
            .await
            .expect_err("duplicate phone");
        assert!(matches!(err, CertificateError::AmbiguousAccount));
    }

    #[tokio::test]
    async fn saturated_gate_spawns_no_worker() {
        let dir = TempDir::new().expect("temp dir");
        let (service, invoker, gate) = service(
            vec![teacher(1, "13800000000")],
            1,
            dir.path(),
            PathBuf::from("/bin/true"),
        );

        let held = gate
            .acquire(Duration::from_millis(50))
            .await
            .expect("occupy the only permit");

        let err = service
            .issue("13800000000", CertificateKind::Preview)
            .await
            .expect_err("gate saturated");
        assert!(matches!(
            err,
            CertificateError::Busy(AdmissionError::TimedOut { .. })
        ));
        assert_eq!(invoker.invocations(), 0, "worker spawned despite rejection");

        drop(held);
    }

    #[cfg(unix)]
    mod with_fake_worker {
        use std::{fs, os::unix::fs::PermissionsExt};

        use super::*;

        fn write_worker(dir: &std::path::Path) -> PathBuf {
            let script = dir.join("fake-worker");
            fs::write(
                &script,
                r#"#!/bin/sh
set -eu
out="$5"
printf 'rendered' > "$out"
"#,
            )
            .expect("write script");
            let mut perms = fs::metadata(&script).expect("metadata").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script, perms).expect("set perms");
            script
        }

        #[tokio::test]
        async fn issue_renders_and_cleanup_is_bound_to_the_issued_handle() {
            let dir = TempDir::new().expect("temp dir");
            let script = write_worker(dir.path());
            let artifacts = dir.path().join("artifacts");
            let (service, invoker, gate) = service(
                vec![teacher(1, "13800000000")],
                1,
                &artifacts,
                script,
            );

            let issued = service
                .issue("13800000000", CertificateKind::Download)
                .await
                .expect("issued");
            assert_eq!(invoker.invocations(), 1);
            assert!(issued.artifact.path().exists());
            assert_eq!(issued.file_name, "teacher-1_certificate.pdf");
            assert_eq!(gate.available(), 0, "permit held while streaming");

            let path = issued.artifact.path().to_path_buf();
            // Caller disconnect before/while streaming: dropping the issued
            // handle must delete the artifact and return the permit.
            drop(issued);
            assert!(!path.exists(), "artifact survived the disconnect");
            assert_eq!(gate.available(), 1, "permit leaked");

            let _again = gate
                .acquire(Duration::from_millis(50))
                .await
                .expect("permit reacquirable after disconnect");
        }

        #[tokio::test]
        async fn render_failure_still_releases_the_permit() {
            let dir = TempDir::new().expect("temp dir");
            let script = dir.path().join("broken-worker");
            fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").expect("write script");
            let mut perms = fs::metadata(&script).expect("metadata").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script, perms).expect("set perms");

            let artifacts = dir.path().join("artifacts");
            let (service, _invoker, gate) = service(
                vec![teacher(1, "13800000000")],
                1,
                &artifacts,
                script,
            );

            let err = service
                .issue("13800000000", CertificateKind::Preview)
                .await
                .expect_err("render fails");
            assert!(matches!(err, CertificateError::Render(_)));
            assert_eq!(gate.available(), 1, "permit leaked on failure path");
        }
    }
}
