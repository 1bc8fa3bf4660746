//! Teacher identity endpoints and the certificate rendering surface.

use std::fmt::Write as FmtWrite;

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    application::{
        artifacts,
        certificates::{CertificateError, IssuedCertificate},
        directory::DirectoryError,
        error::HttpError,
    },
    domain::certificate::CertificateKind,
};

use super::{HttpState, MAINTENANCE_SECRET_HEADER};

const DUPLICATE_ACCOUNT_MESSAGE: &str =
    "Multiple accounts share this phone number; contact the administrator to merge them";
const MAINTENANCE_MESSAGE: &str = "The service is down for maintenance; try again later";
const BUSY_MESSAGE: &str = "Certificate rendering is busy; try again shortly";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(State(state): State<HttpState>, Json(body): Json<LoginRequest>) -> Response {
    let phone = body.username.trim();
    let password = body.password.trim();

    let mut matches = match state.directory.find_all_by_phone(phone).await {
        Ok(matches) => matches,
        Err(err) => return directory_unavailable("infra::http::teachers::login", &err),
    };

    match matches.len() {
        0 => HttpError::new(
            "infra::http::teachers::login",
            StatusCode::NOT_FOUND,
            "This phone number is not registered",
            format!("no roster row for `{phone}`"),
        )
        .into_response(),
        1 => {
            let teacher = matches.swap_remove(0);
            if teacher.credential_matches(password) {
                Json(teacher.redacted()).into_response()
            } else {
                HttpError::new(
                    "infra::http::teachers::login",
                    StatusCode::UNAUTHORIZED,
                    "Incorrect password",
                    "credential mismatch",
                )
                .into_response()
            }
        }
        count => HttpError::new(
            "infra::http::teachers::login",
            StatusCode::CONFLICT,
            DUPLICATE_ACCOUNT_MESSAGE,
            format!("{count} roster rows share phone `{phone}`"),
        )
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct FindAccountRequest {
    pub name: String,
    pub id_card: String,
}

pub async fn find_account(
    State(state): State<HttpState>,
    Json(body): Json<FindAccountRequest>,
) -> Response {
    let matches = match state
        .directory
        .find_by_name_and_id_card(&body.name, &body.id_card)
        .await
    {
        Ok(matches) => matches,
        Err(err) => return directory_unavailable("infra::http::teachers::find_account", &err),
    };

    match matches.as_slice() {
        [] => HttpError::new(
            "infra::http::teachers::find_account",
            StatusCode::NOT_FOUND,
            "No teacher matches the supplied name and ID number",
            format!("no roster row for name `{}`", body.name.trim()),
        )
        .into_response(),
        [teacher] => Json(json!({ "phone": teacher.phone })).into_response(),
        _ => HttpError::new(
            "infra::http::teachers::find_account",
            StatusCode::CONFLICT,
            DUPLICATE_ACCOUNT_MESSAGE,
            format!("multiple roster rows for name `{}`", body.name.trim()),
        )
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CertificateQuery {
    pub phone: String,
}

pub async fn preview_certificate(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<CertificateQuery>,
) -> Response {
    issue_certificate(state, headers, query, CertificateKind::Preview).await
}

pub async fn download_certificate(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<CertificateQuery>,
) -> Response {
    issue_certificate(state, headers, query, CertificateKind::Download).await
}

async fn issue_certificate(
    state: HttpState,
    headers: HeaderMap,
    query: CertificateQuery,
    kind: CertificateKind,
) -> Response {
    // Maintenance is consulted before admission so a closed service never
    // consumes render capacity.
    if !state.maintenance.permits(maintenance_secret(&headers)) {
        return HttpError::new(
            "infra::http::teachers::issue_certificate",
            StatusCode::SERVICE_UNAVAILABLE,
            MAINTENANCE_MESSAGE,
            "maintenance mode refused the request",
        )
        .into_response();
    }

    match state.certificates.issue(&query.phone, kind).await {
        Ok(issued) => issued_response(issued),
        Err(err) => certificate_error_response("infra::http::teachers::issue_certificate", err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ArchiveLinkQuery {
    pub phone: String,
}

pub async fn archive_link(
    State(state): State<HttpState>,
    Query(query): Query<ArchiveLinkQuery>,
) -> Response {
    let teacher = match state.certificates.lookup_unique_by_phone(&query.phone).await {
        Ok(teacher) => teacher,
        Err(err) => {
            return certificate_error_response("infra::http::teachers::archive_link", err);
        }
    };

    match state.archive.prerendered_url(&teacher) {
        Some(url) => Json(json!({ "url": url })).into_response(),
        None => HttpError::new(
            "infra::http::teachers::archive_link",
            StatusCode::NOT_FOUND,
            "No pre-rendered certificate archive is configured",
            "archive.base_url is unset",
        )
        .into_response(),
    }
}

pub async fn health(State(state): State<HttpState>) -> Response {
    match state.directory.find_by_id(0).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::teachers::health",
            StatusCode::SERVICE_UNAVAILABLE,
            "Service temporarily unavailable",
            &err,
        )
        .into_response(),
    }
}

/// Build the streaming response for an issued certificate.
///
/// The body stream owns the artifact guard and the admission permit, so the
/// connection ending, cleanly or not, deletes the file and frees capacity.
fn issued_response(issued: IssuedCertificate) -> Response {
    let IssuedCertificate {
        artifact,
        permit,
        kind,
        file_name,
    } = issued;

    let mime = mime_guess::from_path(artifact.path()).first_or_octet_stream();
    let disposition = match kind {
        CertificateKind::Download => content_disposition_attachment(&file_name),
        CertificateKind::Preview => None,
    };

    let mut response = Response::new(Body::from_stream(artifacts::body_stream(artifact, permit)));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(value) = disposition {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}

fn certificate_error_response(source: &'static str, err: CertificateError) -> Response {
    match err {
        CertificateError::UnknownTeacher => HttpError::new(
            source,
            StatusCode::NOT_FOUND,
            "This phone number is not registered",
            "no roster row for the supplied phone",
        )
        .into_response(),
        CertificateError::AmbiguousAccount => HttpError::new(
            source,
            StatusCode::CONFLICT,
            DUPLICATE_ACCOUNT_MESSAGE,
            "multiple roster rows for the supplied phone",
        )
        .into_response(),
        CertificateError::Directory(err) => directory_unavailable(source, &err),
        // Busy is a retry signal, distinct from render failure.
        CertificateError::Busy(err) => {
            HttpError::from_error(source, StatusCode::SERVICE_UNAVAILABLE, BUSY_MESSAGE, &err)
                .into_response()
        }
        CertificateError::Render(err) => HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            err.public_message(),
            &err,
        )
        .into_response(),
    }
}

fn directory_unavailable(source: &'static str, err: &DirectoryError) -> Response {
    HttpError::from_error(
        source,
        StatusCode::SERVICE_UNAVAILABLE,
        "Service temporarily unavailable",
        err,
    )
    .into_response()
}

fn maintenance_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MAINTENANCE_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// `Content-Disposition` for downloads: an ASCII fallback filename plus the
/// RFC 5987 encoded UTF-8 one, since teacher names are rarely ASCII.
fn content_disposition_attachment(file_name: &str) -> Option<HeaderValue> {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = rfc5987_encode(file_name);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .ok()
}

fn rfc5987_encode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => {
                out.push(*byte as char);
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}
