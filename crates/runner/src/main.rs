//! Command-line runner: submit one prompt to ComfyUI and save its images.

mod output;
mod settings;

use anyhow::Context;
use comfyui_client::{ClientConfig, ComfyUIClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settings::RunnerSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyui_runner=info,comfyui_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let settings = RunnerSettings::from_env()?;
    let config = ClientConfig::from_env()?;
    tracing::info!(
        server = %config.server_address,
        client_id = %config.client_id,
        prompt_file = %settings.prompt_file.display(),
        output_dir = %settings.output_dir.display(),
        "Loaded runner configuration",
    );

    let raw = tokio::fs::read_to_string(&settings.prompt_file)
        .await
        .with_context(|| format!("failed to read {}", settings.prompt_file.display()))?;
    let prompt: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", settings.prompt_file.display()))?;

    // --- Job ---
    let client = ComfyUIClient::new(config);
    client.connect().await?;

    let result = client.run_job(&prompt).await;
    client.disconnect().await;
    let images = result?;

    let written = output::save_images(&settings.output_dir, &images).await?;
    tracing::info!(count = written.len(), "Runner finished");
    Ok(())
}
