use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::{bug_reports, Database};
use crate::queue::{Job, JobHandler, WorkerError};
use crate::storage::{ObjectStorage, StorageError};

pub const THUMBNAIL_MAX_DIMENSION: u32 = 200;
const THUMBNAIL_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Serialize, Deserialize)]
pub struct ScreenshotJobPayload {
    pub bug_report_id: Uuid,
    pub project_id: Uuid,
    pub storage_key: String,
}

/// Consumes the `screenshots` queue: fetch the original, render a 200x200
/// aspect-fit thumbnail, store it, point the report row at it. Re-encoding
/// pixel data to JPEG drops EXIF/GPS blocks wholesale.
pub struct ScreenshotWorker {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
}

impl ScreenshotWorker {
    pub fn new(db: Database, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { db, storage }
    }
}

/// Decode, fit, re-encode. Pure function so tests can drive it without
/// storage.
pub fn render_thumbnail(original: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(original)?;
    let (width, height) = decoded.dimensions();
    // Fit within 200x200; images already inside the box are not upscaled.
    let thumb = if width <= THUMBNAIL_MAX_DIMENSION && height <= THUMBNAIL_MAX_DIMENSION {
        decoded
    } else {
        decoded.thumbnail(THUMBNAIL_MAX_DIMENSION, THUMBNAIL_MAX_DIMENSION)
    };
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, THUMBNAIL_JPEG_QUALITY);
    thumb.to_rgb8().write_with_encoder(encoder)?;
    Ok(out)
}

#[async_trait]
impl JobHandler for ScreenshotWorker {
    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        let payload: ScreenshotJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(WorkerError::permanent)?;

        let original = match self.storage.get_object(&payload.storage_key).await {
            Ok(bytes) => bytes,
            // A missing original will not appear on retry.
            Err(StorageError::NotFound(key)) => {
                return Err(WorkerError::permanent(anyhow::anyhow!(
                    "screenshot object '{key}' missing"
                )))
            }
            Err(err) => return Err(WorkerError::transient(err)),
        };

        // Malformed images never decode on retry either.
        let thumbnail = render_thumbnail(&original).map_err(WorkerError::permanent)?;

        let uploaded = self
            .storage
            .upload_thumbnail(payload.project_id, payload.bug_report_id, Bytes::from(thumbnail))
            .await
            .map_err(WorkerError::transient)?;

        bug_reports::set_thumbnail(&self.db, payload.bug_report_id, &uploaded.key)
            .await
            .map_err(WorkerError::transient)?;

        info!(
            bug_report_id = %payload.bug_report_id,
            thumbnail_key = %uploaded.key,
            size = uploaded.size,
            "thumbnail generated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn thumbnail_fits_200_square_preserving_aspect() {
        let thumb = render_thumbnail(&png_fixture(1024, 512)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        let (w, h) = decoded.dimensions();
        assert!(w <= 200 && h <= 200);
        // 2:1 source stays 2:1.
        assert_eq!(w, 200);
        assert_eq!(h, 100);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let thumb = render_thumbnail(&png_fixture(64, 48)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn garbage_bytes_fail_decode() {
        assert!(render_thumbnail(b"definitely not an image").is_err());
    }
}
