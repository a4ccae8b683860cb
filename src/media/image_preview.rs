//! Image preview generation and pure-Rust JPEG conversion fallback.

use image::codecs::jpeg::JpegEncoder;
use log::debug;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::ServiceError;
use crate::media::transcoder::Transcoder;
use crate::media::{IMAGE_PREVIEW_SIZE, PREVIEW_JPEG_QUALITY};

/// Writes a thumbnail of `source` to `dest`. Uses the transcoder when
/// present; otherwise the `image` crate decodes and scales in-process.
pub fn create_image_preview(
    transcoder: &Transcoder,
    source: &Path,
    dest: &Path,
) -> Result<(), ServiceError> {
    if transcoder.has_ffmpeg() {
        let scale = format!(
            "scale={s}:{s}:force_original_aspect_ratio=decrease",
            s = IMAGE_PREVIEW_SIZE
        );
        let args = vec![
            "-vf".to_string(),
            scale,
            "-q:v".to_string(),
            "4".to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
        ];
        return transcoder.convert_file(source, &args, "mjpeg", dest);
    }

    let img = image::open(source).map_err(ServiceError::internal)?;
    // thumbnail() preserves aspect ratio and never upscales.
    let thumb = img.thumbnail(IMAGE_PREVIEW_SIZE, IMAGE_PREVIEW_SIZE);
    let file = File::create(dest)?;
    let mut writer = BufWriter::new(file);
    thumb
        .write_with_encoder(JpegEncoder::new_with_quality(
            &mut writer,
            PREVIEW_JPEG_QUALITY,
        ))
        .map_err(ServiceError::internal)?;
    debug!("Wrote image preview {}", dest.display());
    Ok(())
}

/// In-process image-to-JPEG conversion for when the transcoder is missing.
pub fn convert_to_jpeg(data: &[u8]) -> Result<Vec<u8>, ServiceError> {
    let img = image::load_from_memory(data).map_err(ServiceError::internal)?;
    let mut out = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 85))
        .map_err(ServiceError::internal)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_fallback_preview_fits_bounding_box() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.png");
        std::fs::write(&source, png_bytes(800, 400)).unwrap();
        let dest = dir.path().join("preview.jpg");

        create_image_preview(&Transcoder::disabled(), &source, &dest).unwrap();

        let (w, h) = image::image_dimensions(&dest).unwrap();
        assert_eq!(w, 200);
        assert_eq!(h, 100);
    }

    #[test]
    fn test_small_images_are_not_upscaled() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("small.png");
        std::fs::write(&source, png_bytes(40, 30)).unwrap();
        let dest = dir.path().join("preview.jpg");

        create_image_preview(&Transcoder::disabled(), &source, &dest).unwrap();

        let (w, h) = image::image_dimensions(&dest).unwrap();
        assert_eq!((w, h), (40, 30));
    }

    #[test]
    fn test_convert_to_jpeg_produces_decodable_jpeg() {
        let jpeg = convert_to_jpeg(&png_bytes(10, 10)).unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(img.width(), 10);
        assert_eq!(
            image::guess_format(&jpeg).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_convert_to_jpeg_rejects_garbage() {
        assert!(convert_to_jpeg(b"not an image").is_err());
    }
}
