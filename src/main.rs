use log::info;
use people_upload::settings::Settings;
use people_upload::views;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::default();
    info!("Using database {}", settings.database.display());
    views::urls().run(settings).await
}
