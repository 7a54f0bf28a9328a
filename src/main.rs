use vmimport_ui_lib::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    vmimport_ui_lib::run(AppConfig::from_env()).await
}
