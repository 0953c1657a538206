use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Logging settings, read from `LOG_*` environment variables.
///
/// stdout is reserved for the MCP stdio transport, so unless `use_stdout`
/// is explicitly requested logs go to `file_dir/file_name` or to stderr.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct LoggingConfig {
    /// filter directive (`info`, `reflectrpc_infra=debug`, ...). `RUST_LOG` wins if set.
    pub level: Option<String>,
    pub file_name: Option<String>,
    pub file_dir: Option<String>,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default)]
    pub use_stdout: bool,
}

impl LoggingConfig {
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.file_name.as_ref().map(|name| match &self.file_dir {
            Some(dir) => PathBuf::from(dir).join(name),
            None => PathBuf::from(name),
        })
    }
}

pub fn load_tracing_config_from_env() -> Result<LoggingConfig> {
    envy::prefixed("LOG_")
        .from_env::<LoggingConfig>()
        .map_err(|e| anyhow!("cannot read logging config from env: {:?}", e))
}

/// `<app_name>.<ext>` with the process id appended, so that several stdio
/// servers launched by one MCP host do not interleave in the same file.
pub fn create_filename_with_pid_postfix(app_name: &str, ext: &str) -> String {
    format!("{}.{}.{}", app_name, std::process::id(), ext)
}

pub async fn tracing_init(conf: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(conf.level.as_deref().unwrap_or("info")))?;

    let writer = match conf.log_file_path() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?
                .into_std()
                .await;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None if conf.use_stdout => BoxMakeWriter::new(std::io::stdout),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false);

    let result = if conf.use_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("failed to initialize tracing: {}", e))
}

// for test
pub fn tracing_init_test(level: ::tracing::Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_test_writer()
        .try_init();
}
