pub mod api;
pub mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::ApiService;
use crate::config::{AppConfig, LogFormat};

/// Install the global subscriber. `log` records from the library crates are
/// bridged into the same output.
pub fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_LEVEL));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = installed {
        eprintln!("Logging already initialised: {e}");
    }
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(&config);
    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_data = config.use_mock_data,
        "Starting vmimport-ui"
    );
    if config.use_mock_data {
        tracing::info!("USE_MOCK_DATA is set; vCenter will not be contacted");
    }

    let service = Arc::new(ApiService::from_config(&config));
    service.start_server(config.listen_addr).await
}
