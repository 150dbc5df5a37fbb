use anyhow::Result;
use edgecam_server::state::{Config, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "edgecam_server=debug,edgecam_media=info,tower_http=debug,webrtc=warn".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    if config.list_devices {
        let devices = edgecam_media::capture::list_devices()?;
        if devices.is_empty() {
            println!("No cameras found");
        }
        for device in devices {
            println!("{}: {}", device.index, device.name);
        }
        return Ok(());
    }

    config.validate()?;

    tracing::info!("Starting Edgecam server...");

    edgecam_server::run(config, edgecam_server::shutdown_signal()).await
}
