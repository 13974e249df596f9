//! Writes fetched images to disk.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use comfyui_client::ImagesResponse;

/// Write every image blob into `dir`, creating it if needed.
///
/// Files are named after the image's server-side filename (directory
/// components stripped); images from later nodes overwrite earlier ones
/// with the same name. Returns the written paths in fetch order.
pub async fn save_images(dir: &Path, images: &ImagesResponse) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut written = Vec::new();
    for (node_id, containers) in images {
        for container in containers {
            let Some(name) = Path::new(&container.image.filename).file_name() else {
                bail!(
                    "node {node_id} returned an image without a usable filename: {:?}",
                    container.image.filename
                );
            };
            let path = dir.join(name);
            tokio::fs::write(&path, &container.blob)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;

            tracing::info!(
                node_id = %node_id,
                path = %path.display(),
                bytes = container.blob.len(),
                "Saved image",
            );
            written.push(path);
        }
    }
    Ok(written)
}
