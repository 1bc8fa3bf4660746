//! End-to-end pipeline properties exercised through the router with a fake
//! rendering worker.

#![cfg(unix)]

use std::{
    fs,
    num::NonZeroU32,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use attesta::{
    application::{
        admission::AdmissionGate, archive::ArchiveLinks, artifacts::ArtifactStore,
        certificates::CertificateService, directory::TeacherDirectory,
        maintenance::MaintenanceGate, render::RenderInvoker,
    },
    domain::teacher::Teacher,
    infra::{
        http::{self, HttpState, MAINTENANCE_SECRET_HEADER},
        roster::RosterDirectory,
    },
};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

fn teacher(id: u64, phone: &str) -> Teacher {
    Teacher {
        id,
        name: format!("教师{id}"),
        phone: phone.to_string(),
        id_card: Some(format!("37070019900101{id:04}")),
        category: "潍坊市参培教师".to_string(),
        score: None,
        certificate_no: format!("WF-2025-{id:04}"),
        level: "优秀".to_string(),
        session: None,
        password: Some("123456".to_string()),
        cert_suffix: None,
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("set perms");
}

struct Harness {
    router: Router,
    invoker: Arc<RenderInvoker>,
    gate: AdmissionGate,
    artifacts_dir: PathBuf,
    _dir: TempDir,
}

fn harness_with(
    script_body: &str,
    capacity: u32,
    preview_timeout: Duration,
    maintenance: MaintenanceGate,
) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let script = dir.path().join("fake-worker");
    write_script(&script, script_body);
    let artifacts_dir = dir.path().join("artifacts");

    let roster = RosterDirectory::from_rows(vec![
        teacher(1, "13800000000"),
        teacher(2, "13900000000"),
    ])
    .expect("roster");
    let directory: Arc<dyn TeacherDirectory> = Arc::new(roster);

    let gate = AdmissionGate::new(NonZeroU32::new(capacity).expect("capacity"));
    let invoker = Arc::new(RenderInvoker::new("/bin/sh".into(), script));
    let store = Arc::new(ArtifactStore::new(artifacts_dir.clone()).expect("store"));
    let certificates = Arc::new(CertificateService::new(
        Arc::clone(&directory),
        gate.clone(),
        Arc::clone(&invoker),
        store,
        None,
        preview_timeout,
        Duration::from_secs(2),
    ));

    let router = http::build_router(HttpState {
        certificates,
        directory,
        maintenance: Arc::new(maintenance),
        archive: Arc::new(ArchiveLinks::new(Some(
            url::Url::parse("https://certs.example.org/archive/").expect("url"),
        ))),
    });

    Harness {
        router,
        invoker,
        gate,
        artifacts_dir,
        _dir: dir,
    }
}

fn harness(script_body: &str) -> Harness {
    harness_with(
        script_body,
        2,
        Duration::from_secs(2),
        MaintenanceGate::new(false, None),
    )
}

const WORKING_WORKER: &str = r#"#!/bin/sh
set -eu
out="$5"
printf 'rendered-bytes' > "$out"
"#;

fn remaining_artifacts(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn preview_streams_a_png_and_leaves_no_artifact_behind() {
    let harness = harness(WORKING_WORKER);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("image/png")
    );

    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(&body[..], b"rendered-bytes");

    assert!(
        remaining_artifacts(&harness.artifacts_dir).is_empty(),
        "artifact survived a fully-consumed stream"
    );
    assert_eq!(harness.gate.available(), 2, "permit not returned");
}

#[tokio::test]
async fn download_is_a_pdf_attachment() {
    let harness = harness(WORKING_WORKER);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/download?phone=13900000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/pdf")
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .expect("disposition");
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("filename*=UTF-8''"));

    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(&body[..], b"rendered-bytes");
}

#[tokio::test]
async fn saturated_gate_answers_busy_without_spawning_a_worker() {
    let harness = harness_with(
        WORKING_WORKER,
        1,
        Duration::from_millis(150),
        MaintenanceGate::new(false, None),
    );

    let held = harness
        .gate
        .acquire(Duration::from_millis(50))
        .await
        .expect("occupy the only permit");

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert!(
        String::from_utf8_lossy(&body).contains("busy"),
        "busy signal must be recognizable"
    );
    assert_eq!(
        harness.invoker.invocations(),
        0,
        "worker spawned for a rejected request"
    );

    drop(held);
}

#[tokio::test]
async fn unknown_phone_is_not_found_and_failed_render_is_distinct_from_busy() {
    let broken = r#"#!/bin/sh
echo "[Error] 缺少 Pillow 库" >&2
exit 99
"#;
    let harness = harness(broken);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13600000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert!(
        String::from_utf8_lossy(&body).contains("image-processing library"),
        "stable per-category message expected"
    );
    assert_eq!(harness.gate.available(), 2, "permit leaked on render failure");
}

#[tokio::test]
async fn disconnecting_before_the_stream_is_consumed_still_cleans_up() {
    let harness = harness(WORKING_WORKER);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // Client goes away without reading the body.
    drop(response);

    assert!(
        remaining_artifacts(&harness.artifacts_dir).is_empty(),
        "artifact survived a client disconnect"
    );
    assert_eq!(harness.gate.available(), 2, "permit leaked on disconnect");

    // The freed permit is immediately usable by the next caller.
    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn third_concurrent_render_waits_for_a_permit() {
    let slow_worker = r#"#!/bin/sh
set -eu
sleep 0.3
out="$5"
printf 'rendered-bytes' > "$out"
"#;
    let harness = harness_with(
        slow_worker,
        2,
        Duration::from_secs(5),
        MaintenanceGate::new(false, None),
    );

    let started = Instant::now();
    let request = || {
        harness.router.clone().oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
    };
    let (a, b, c) = tokio::join!(request(), request(), request());
    let elapsed = started.elapsed();

    for response in [a, b, c] {
        let response = response.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"rendered-bytes");
    }

    // Two renders start immediately; the third waits for a freed permit, so
    // the batch takes at least two render durations.
    assert!(
        elapsed >= Duration::from_millis(450),
        "third render did not wait: {elapsed:?}"
    );
    assert_eq!(harness.invoker.invocations(), 3);
    assert_eq!(harness.gate.available(), 2);
}

#[tokio::test]
async fn maintenance_mode_gates_rendering_until_the_secret_is_presented() {
    let harness = harness_with(
        WORKING_WORKER,
        2,
        Duration::from_secs(2),
        MaintenanceGate::new(true, Some("letmein".to_string())),
    );

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(harness.invoker.invocations(), 0);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/preview?phone=13800000000")
                .header(MAINTENANCE_SECRET_HEADER, "letmein")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_and_account_recovery_round_trip() {
    let harness = harness(WORKING_WORKER);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::post("/teacher/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"username": " 13800000000 ", "password": "123456"}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["phone"], "13800000000");
    assert!(json["password"].is_null(), "credential leaked in response");

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::post("/teacher/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"username": "13800000000", "password": "999999"}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::post("/teacher/find-account")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name": "教师2", "id_card": "370700199001010002"}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["phone"], "13900000000");
}

#[tokio::test]
async fn archive_link_is_keyed_on_the_certificate_number() {
    let harness = harness(WORKING_WORKER);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::get("/teacher/certificate/archive-link?phone=13800000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(
        json["url"],
        "https://certs.example.org/archive/WF-2025-0001.pdf"
    );
}

#[tokio::test]
async fn health_answers_no_content() {
    let harness = harness(WORKING_WORKER);

    let response = harness
        .router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
