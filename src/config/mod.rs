//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "attesta";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GATE_CAPACITY: u32 = 4;
const DEFAULT_PREVIEW_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WORKER_INTERPRETER: &str = "python3";
const DEFAULT_WORKER_SCRIPT: &str = "workers/certificate_worker.py";
const DEFAULT_ARTIFACT_DIR: &str = "artifacts";
const DEFAULT_ROSTER_PATH: &str = "roster.toml";
const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 1800;
const DEFAULT_JANITOR_EXPIRY_SECS: u64 = 600;

/// Command-line arguments for the Attesta binary.
#[derive(Debug, Parser)]
#[command(name = "attesta", version, about = "Attesta certificate server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ATTESTA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Attesta HTTP service.
    Serve(Box<ServeArgs>),
    /// Run a single janitor sweep over the artifact directory and exit.
    #[command(name = "sweep")]
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    /// Override the artifact directory to sweep.
    #[arg(long = "artifacts-directory", value_name = "PATH")]
    pub artifacts_directory: Option<PathBuf>,

    /// Override the expiry age (seconds) beyond which artifacts are reclaimed.
    #[arg(long = "janitor-expiry-seconds", value_name = "SECONDS")]
    pub janitor_expiry_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the render worker interpreter executable.
    #[arg(long = "render-worker-interpreter", value_name = "PATH")]
    pub render_worker_interpreter: Option<PathBuf>,

    /// Override the render worker script path.
    #[arg(long = "render-worker-script", value_name = "PATH")]
    pub render_worker_script: Option<PathBuf>,

    /// Override the directory holding certificate templates and fonts.
    #[arg(long = "render-resource-dir", value_name = "PATH")]
    pub render_resource_dir: Option<PathBuf>,

    /// Override the number of renders admitted concurrently.
    #[arg(long = "render-gate-capacity", value_name = "COUNT")]
    pub render_gate_capacity: Option<u32>,

    /// Override the admission wait for preview renders.
    #[arg(long = "render-preview-timeout-seconds", value_name = "SECONDS")]
    pub render_preview_timeout_seconds: Option<u64>,

    /// Override the admission wait for download renders.
    #[arg(long = "render-download-timeout-seconds", value_name = "SECONDS")]
    pub render_download_timeout_seconds: Option<u64>,

    /// Override the ephemeral artifact directory.
    #[arg(long = "artifacts-directory", value_name = "PATH")]
    pub artifacts_directory: Option<PathBuf>,

    /// Override the janitor sweep cadence.
    #[arg(long = "janitor-interval-seconds", value_name = "SECONDS")]
    pub janitor_interval_seconds: Option<u64>,

    /// Override the expiry age beyond which artifacts are reclaimed.
    #[arg(long = "janitor-expiry-seconds", value_name = "SECONDS")]
    pub janitor_expiry_seconds: Option<u64>,

    /// Override the teacher roster file.
    #[arg(long = "roster-path", value_name = "PATH")]
    pub roster_path: Option<PathBuf>,

    /// Toggle maintenance mode.
    #[arg(
        long = "maintenance-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub maintenance_enabled: Option<bool>,

    /// Override the base URL of the pre-rendered certificate archive.
    #[arg(long = "archive-base-url", value_name = "URL")]
    pub archive_base_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub artifacts: ArtifactSettings,
    pub janitor: JanitorSettings,
    pub roster: RosterSettings,
    pub maintenance: MaintenanceSettings,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub worker_interpreter: PathBuf,
    pub worker_script: PathBuf,
    pub resource_dir: Option<PathBuf>,
    pub gate_capacity: NonZeroU32,
    pub preview_timeout: Duration,
    pub download_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub directory: PathBuf,
}

/// Sweep schedule for the artifact janitor.
///
/// `expiry_age` must stay comfortably above the worst-case admission wait
/// plus render duration, or the sweep can race a legitimate in-flight
/// artifact. The defaults (10 min expiry against admission waits measured in
/// seconds) leave a wide margin; operators lowering the expiry own that
/// margin.
#[derive(Debug, Clone)]
pub struct JanitorSettings {
    pub interval: Duration,
    pub expiry_age: Duration,
}

#[derive(Debug, Clone)]
pub struct RosterSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub enabled: bool,
    pub secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub base_url: Option<Url>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("ATTESTA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_sweep_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    artifacts: RawArtifactSettings,
    janitor: RawJanitorSettings,
    roster: RawRosterSettings,
    maintenance: RawMaintenanceSettings,
    archive: RawArchiveSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.render_worker_interpreter.as_ref() {
            self.render.worker_interpreter = Some(path.clone());
        }
        if let Some(path) = overrides.render_worker_script.as_ref() {
            self.render.worker_script = Some(path.clone());
        }
        if let Some(dir) = overrides.render_resource_dir.as_ref() {
            self.render.resource_dir = Some(dir.clone());
        }
        if let Some(capacity) = overrides.render_gate_capacity {
            self.render.gate_capacity = Some(capacity);
        }
        if let Some(seconds) = overrides.render_preview_timeout_seconds {
            self.render.preview_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.render_download_timeout_seconds {
            self.render.download_timeout_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
        if let Some(seconds) = overrides.janitor_interval_seconds {
            self.janitor.interval_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.janitor_expiry_seconds {
            self.janitor.expiry_seconds = Some(seconds);
        }
        if let Some(path) = overrides.roster_path.as_ref() {
            self.roster.path = Some(path.clone());
        }
        if let Some(enabled) = overrides.maintenance_enabled {
            self.maintenance.enabled = Some(enabled);
        }
        if let Some(url) = overrides.archive_base_url.as_ref() {
            self.archive.base_url = Some(url.clone());
        }
    }

    fn apply_sweep_overrides(&mut self, overrides: &SweepArgs) {
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
        if let Some(seconds) = overrides.janitor_expiry_seconds {
            self.janitor.expiry_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            artifacts,
            janitor,
            roster,
            maintenance,
            archive,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let artifacts = build_artifact_settings(artifacts)?;
        let janitor = build_janitor_settings(janitor)?;
        let roster = build_roster_settings(roster)?;
        let maintenance = build_maintenance_settings(maintenance)?;
        let archive = build_archive_settings(archive)?;

        Ok(Self {
            server,
            logging,
            render,
            artifacts,
            janitor,
            roster,
            maintenance,
            archive,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let worker_interpreter = render
        .worker_interpreter
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKER_INTERPRETER));
    if worker_interpreter.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.worker_interpreter",
            "path must not be empty",
        ));
    }

    let worker_script = render
        .worker_script
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKER_SCRIPT));
    if worker_script.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.worker_script",
            "path must not be empty",
        ));
    }

    let resource_dir = render
        .resource_dir
        .filter(|dir| !dir.as_os_str().is_empty());

    let gate_capacity = non_zero_u32(
        render
            .gate_capacity
            .unwrap_or(DEFAULT_GATE_CAPACITY)
            .into(),
        "render.gate_capacity",
    )?;

    let preview_secs = render
        .preview_timeout_seconds
        .unwrap_or(DEFAULT_PREVIEW_TIMEOUT_SECS);
    if preview_secs == 0 {
        return Err(LoadError::invalid(
            "render.preview_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let download_secs = render
        .download_timeout_seconds
        .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    if download_secs == 0 {
        return Err(LoadError::invalid(
            "render.download_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        worker_interpreter,
        worker_script,
        resource_dir,
        gate_capacity,
        preview_timeout: Duration::from_secs(preview_secs),
        download_timeout: Duration::from_secs(download_secs),
    })
}

fn build_artifact_settings(artifacts: RawArtifactSettings) -> Result<ArtifactSettings, LoadError> {
    let directory = artifacts
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "artifacts.directory",
            "path must not be empty",
        ));
    }

    Ok(ArtifactSettings { directory })
}

fn build_janitor_settings(janitor: RawJanitorSettings) -> Result<JanitorSettings, LoadError> {
    let interval_seconds = janitor
        .interval_seconds
        .unwrap_or(DEFAULT_JANITOR_INTERVAL_SECS);
    if interval_seconds == 0 {
        return Err(LoadError::invalid(
            "janitor.interval_seconds",
            "must be greater than zero",
        ));
    }

    let expiry_seconds = janitor
        .expiry_seconds
        .unwrap_or(DEFAULT_JANITOR_EXPIRY_SECS);
    if expiry_seconds == 0 {
        return Err(LoadError::invalid(
            "janitor.expiry_seconds",
            "must be greater than zero",
        ));
    }

    Ok(JanitorSettings {
        interval: Duration::from_secs(interval_seconds),
        expiry_age: Duration::from_secs(expiry_seconds),
    })
}

fn build_roster_settings(roster: RawRosterSettings) -> Result<RosterSettings, LoadError> {
    let path = roster
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROSTER_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("roster.path", "path must not be empty"));
    }

    Ok(RosterSettings { path })
}

fn build_maintenance_settings(
    maintenance: RawMaintenanceSettings,
) -> Result<MaintenanceSettings, LoadError> {
    let enabled = maintenance.enabled.unwrap_or(false);
    let secret = maintenance.secret.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if enabled && secret.is_none() {
        return Err(LoadError::invalid(
            "maintenance.secret",
            "maintenance mode requires a bypass secret",
        ));
    }

    Ok(MaintenanceSettings { enabled, secret })
}

fn build_archive_settings(archive: RawArchiveSettings) -> Result<ArchiveSettings, LoadError> {
    let base_url = match archive.base_url {
        Some(value) if !value.trim().is_empty() => Some(
            Url::parse(value.trim())
                .map_err(|err| LoadError::invalid("archive.base_url", err.to_string()))?,
        ),
        _ => None,
    };

    Ok(ArchiveSettings { base_url })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    worker_interpreter: Option<PathBuf>,
    worker_script: Option<PathBuf>,
    resource_dir: Option<PathBuf>,
    gate_capacity: Option<u32>,
    preview_timeout_seconds: Option<u64>,
    download_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJanitorSettings {
    interval_seconds: Option<u64>,
    expiry_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRosterSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMaintenanceSettings {
    enabled: Option<bool>,
    secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArchiveSettings {
    base_url: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
