use std::path::{Path, PathBuf};
use std::time::Duration;

use actix_files::Files;
use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use gales::{Pipeline, PipelineConfig, Toolchain};
use tracing::info;

pub mod range;

/// Where the annotation directory is mounted.
pub const DATA_MOUNT: &str = "/data";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8081;

const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Config {
    pub input_dir: PathBuf,
    pub fasta_file: PathBuf,
    pub slim_map: PathBuf,
    pub ui_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Option<Config> {
        let input_dir = absolute(std::env::var("GALES_INPUT_DIR").ok()?);
        let fasta_file = absolute(std::env::var("GALES_FASTA_FILE").ok()?);
        let slim_map = std::env::var("GALES_SLIM_MAP").ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_slim_map);
        let ui_dir = std::env::var("GALES_UI_DIR").ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_ui_dir);
        let host = std::env::var("GALES_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = match std::env::var("GALES_PORT") {
            Ok(port) => port.parse().ok()?,
            Err(_) => DEFAULT_PORT,
        };
        Some(Config { input_dir, fasta_file, slim_map, ui_dir, host, port })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            input_dir: self.input_dir.clone(),
            fasta_file: self.fasta_file.clone(),
            slim_map_file: self.slim_map.clone(),
            toolchain: Toolchain::from_env(),
        }
    }

    /// The page a browser should open to view this annotation directory.
    pub fn viewer_url(&self) -> String {
        format!(
            "http://{}:{}/index.html?annotation_dir={}&fasta_file={}",
            self.host,
            self.port,
            urlencoding::encode(&self.input_dir.to_string_lossy()),
            urlencoding::encode(&self.fasta_file.to_string_lossy()),
        )
    }
}

/// `<exe>/../<name>`, falling back to a path relative to the working
/// directory when the executable location is unknown.
fn install_dir(name: &str) -> PathBuf {
    std::env::current_exe().ok()
        .and_then(|exe| exe.parent()?.parent().map(|prefix| prefix.join(name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

pub fn default_slim_map() -> PathBuf {
    install_dir("data").join("go_slim.map.tsv")
}

/// The viewer pages shipped next to the binary.
pub fn default_ui_dir() -> PathBuf {
    install_dir("ui")
}

/// Resolves `path` against the working directory. The viewer URL carries
/// these paths, so they must not depend on where the server was started.
pub fn absolute<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub struct AppData {
    pub root: PathBuf,
    pub mount: String,
    pub ui_dir: Option<PathBuf>,
}

impl AppData {
    pub fn new(config: &Config) -> AppData {
        AppData {
            root: config.input_dir.clone(),
            mount: DATA_MOUNT.to_string(),
            ui_dir: Some(config.ui_dir.clone()),
        }
    }

    /// The UI is registered last so it cannot shadow the data mount.
    pub fn routes(&self, app: &mut web::ServiceConfig) {
        app.service(Files::new(&self.mount, &self.root).use_last_modified(true));
        if let Some(ui_dir) = &self.ui_dir {
            app.service(Files::new("/", ui_dir).index_file("index.html"));
        }
    }
}

pub async fn server(config: Config) -> std::io::Result<()> {
    let data = web::Data::new(AppData::new(&config));
    info!(url = %config.viewer_url(), "serving annotation directory");

    HttpServer::new(move || {
        let routes = data.clone();
        App::new()
            .app_data(data.clone())
            .wrap(from_fn(range::range_gate))
            .wrap(Logger::default())
            .configure(move |app| routes.routes(app))
    })
    .client_request_timeout(CLIENT_REQUEST_TIMEOUT)
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

/// Brings the annotation directory up to date, then serves it until the
/// server stops.
pub fn launch(config: Config) -> anyhow::Result<()> {
    let report = Pipeline::new(config.pipeline_config())
        .run()
        .with_context(|| format!("failed to prepare {}", config.input_dir.display()))?;
    info!(
        computed = report.computed(),
        reused = report.steps.len() - report.computed(),
        external = report.external_invocations,
        "annotation directory ready",
    );

    actix_web::rt::System::new()
        .block_on(server(config))
        .context("server failed")?;
    Ok(())
}
