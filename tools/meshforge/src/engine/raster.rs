//! Texture re-encode capability
//!
//! Resizes each texture to the resolution chosen by the strategy resolver and
//! retargets its encoding. Runs last in the canonical pipeline so it only
//! sees the final material set.

use image::imageops::FilterType;

use scene_doc::{ImageEncoding, SceneDocument};

use crate::error::StageError;
use crate::stages::TextureTarget;
use crate::texture::TextureConfig;

pub fn compress_textures(
    doc: &mut SceneDocument,
    target: TextureTarget,
    quality: u8,
    config: &TextureConfig,
) -> Result<(), StageError> {
    let mut resized = 0usize;

    for texture in &mut doc.textures {
        let strategy = config.resolve(&texture.name);
        let (width, height) = texture.dimensions();
        let (new_width, new_height) = config.target_size(width, height, strategy);

        if (new_width, new_height) != (width, height) {
            texture.image =
                image::imageops::resize(&texture.image, new_width, new_height, FilterType::Lanczos3);
            let reduction = 100.0
                - (new_width as u64 * new_height as u64) as f64
                    / (width as u64 * height as u64) as f64
                    * 100.0;
            tracing::info!(
                "texture \"{}\" [{}] {}x{} -> {}x{} ({:.1}% fewer pixels)",
                texture.name,
                strategy.name,
                width,
                height,
                new_width,
                new_height,
                reduction
            );
            resized += 1;
        } else {
            tracing::debug!(
                "texture \"{}\" already optimal at {}x{}",
                texture.name,
                width,
                height
            );
        }

        texture.encoding = match target {
            TextureTarget::Png => ImageEncoding::Png,
            TextureTarget::Jpeg => ImageEncoding::Jpeg { quality },
        };
    }

    tracing::info!("re-encoded {} textures, resized {}", doc.textures.len(), resized);
    Ok(())
}
