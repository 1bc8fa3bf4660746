use std::{process, sync::Arc};

use attesta::{
    application::{
        admission::AdmissionGate, archive::ArchiveLinks, artifacts::ArtifactStore,
        certificates::CertificateService, directory::TeacherDirectory, error::AppError,
        janitor::Janitor, maintenance::MaintenanceGate, render::RenderInvoker,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        roster::RosterDirectory,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = build_http_state(&settings)?;

    let janitor = Janitor::new(
        settings.artifacts.directory.clone(),
        settings.janitor.expiry_age,
    );
    let janitor_handle = tokio::spawn(janitor.run(settings.janitor.interval));

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "attesta::serve",
        addr = %settings.server.addr,
        gate_capacity = settings.render.gate_capacity.get(),
        "listening"
    );

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    janitor_handle.abort();
    let _ = janitor_handle.await;

    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let janitor = Janitor::new(
        settings.artifacts.directory.clone(),
        settings.janitor.expiry_age,
    );
    let reclaimed = janitor.sweep().await;
    info!(
        target = "attesta::sweep",
        directory = %settings.artifacts.directory.display(),
        reclaimed,
        "sweep finished"
    );
    Ok(())
}

fn build_http_state(settings: &config::Settings) -> Result<HttpState, AppError> {
    let roster = RosterDirectory::load(&settings.roster.path)
        .map_err(|err| AppError::from(InfraError::roster(err.to_string())))?;
    if roster.is_empty() {
        return Err(AppError::validation(format!(
            "roster `{}` contains no teachers",
            settings.roster.path.display()
        )));
    }
    let directory: Arc<dyn TeacherDirectory> = Arc::new(roster);

    let store = Arc::new(
        ArtifactStore::new(settings.artifacts.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );
    let gate = AdmissionGate::new(settings.render.gate_capacity);
    let invoker = Arc::new(RenderInvoker::new(
        settings.render.worker_interpreter.clone(),
        settings.render.worker_script.clone(),
    ));
    let certificates = Arc::new(CertificateService::new(
        Arc::clone(&directory),
        gate,
        invoker,
        store,
        settings.render.resource_dir.clone(),
        settings.render.preview_timeout,
        settings.render.download_timeout,
    ));

    Ok(HttpState {
        certificates,
        directory,
        maintenance: Arc::new(MaintenanceGate::new(
            settings.maintenance.enabled,
            settings.maintenance.secret.clone(),
        )),
        archive: Arc::new(ArchiveLinks::new(settings.archive.base_url.clone())),
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!(target = "attesta::serve", "shutdown signal received");
}
