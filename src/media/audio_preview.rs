//! Audio waveform previews.
//!
//! With ffmpeg present any supported audio format gets a `showwavespic`
//! rendering. The fallback decodes WAV with `hound` and draws the min/max
//! envelope per pixel column itself; other formats need the transcoder.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::ServiceError;
use crate::media::transcoder::Transcoder;
use crate::media::{AUDIO_PREVIEW_HEIGHT, AUDIO_PREVIEW_WIDTH, PREVIEW_JPEG_QUALITY};

const WAVEFORM_COLOR: Rgb<u8> = Rgb([0x46, 0x46, 0x46]);
const BACKGROUND: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);

pub fn create_audio_preview(
    transcoder: &Transcoder,
    source: &Path,
    dest: &Path,
    mime_type: &str,
) -> Result<(), ServiceError> {
    if transcoder.has_ffmpeg() {
        let filter = format!(
            "showwavespic=s={}x{}:colors=#464646",
            AUDIO_PREVIEW_WIDTH, AUDIO_PREVIEW_HEIGHT
        );
        let args = vec![
            "-filter_complex".to_string(),
            filter,
            "-frames:v".to_string(),
            "1".to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
        ];
        return transcoder.convert_file(source, &args, "image2", dest);
    }

    if !mime_type.contains("wav") {
        return Err(ServiceError::DependencyUnavailable(format!(
            "waveform preview for {} requires ffmpeg",
            mime_type
        )));
    }
    render_wav_waveform(source, dest)
}

fn render_wav_waveform(source: &Path, dest: &Path) -> Result<(), ServiceError> {
    let samples = read_samples(source)?;
    if samples.is_empty() {
        return Err(ServiceError::Validation("audio file has no samples".to_string()));
    }

    let width = AUDIO_PREVIEW_WIDTH;
    let height = AUDIO_PREVIEW_HEIGHT;
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    let mid = height as f32 / 2.0;
    let bucket = (samples.len() as f32 / width as f32).max(1.0);

    for x in 0..width {
        let start = (x as f32 * bucket) as usize;
        let end = (((x + 1) as f32 * bucket) as usize).min(samples.len());
        if start >= end {
            continue;
        }
        let (mut lo, mut hi) = (f32::MAX, f32::MIN);
        for &s in &samples[start..end] {
            lo = lo.min(s);
            hi = hi.max(s);
        }
        let y_top = (mid - hi * (mid - 1.0)).clamp(0.0, height as f32 - 1.0) as u32;
        let y_bot = (mid - lo * (mid - 1.0)).clamp(0.0, height as f32 - 1.0) as u32;
        for y in y_top..=y_bot {
            img.put_pixel(x, y, WAVEFORM_COLOR);
        }
    }

    let file = File::create(dest)?;
    let mut writer = BufWriter::new(file);
    img.write_with_encoder(JpegEncoder::new_with_quality(
        &mut writer,
        PREVIEW_JPEG_QUALITY,
    ))
    .map_err(ServiceError::internal)
}

/// Decodes all samples into normalized [-1, 1] floats, channels interleaved.
fn read_samples(source: &Path) -> Result<Vec<f32>, ServiceError> {
    let mut reader = hound::WavReader::open(source).map_err(ServiceError::internal)?;
    let spec = reader.spec();
    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(ServiceError::internal))
            .collect(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale).map_err(ServiceError::internal))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sine_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..8000 {
            let t = i as f32 / 8000.0;
            let v = (t * 440.0 * std::f32::consts::TAU).sin();
            writer.write_sample((v * i16::MAX as f32 * 0.8) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_wav_waveform_has_expected_dimensions() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tone.wav");
        write_sine_wav(&source);
        let dest = dir.path().join("waveform.jpg");

        create_audio_preview(&Transcoder::disabled(), &source, &dest, "audio/wav").unwrap();

        let (w, h) = image::image_dimensions(&dest).unwrap();
        assert_eq!((w, h), (AUDIO_PREVIEW_WIDTH, AUDIO_PREVIEW_HEIGHT));
    }

    #[test]
    fn test_waveform_actually_draws_something() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tone.wav");
        write_sine_wav(&source);
        let dest = dir.path().join("waveform.jpg");
        create_audio_preview(&Transcoder::disabled(), &source, &dest, "audio/wav").unwrap();

        let img = image::open(&dest).unwrap().to_rgb8();
        let dark_pixels = img.pixels().filter(|p| p.0[0] < 0x80).count();
        assert!(dark_pixels > 100, "waveform is blank ({} dark)", dark_pixels);
    }

    #[test]
    fn test_non_wav_without_ffmpeg_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = create_audio_preview(
            &Transcoder::disabled(),
            &dir.path().join("song.mp3"),
            &dir.path().join("out.jpg"),
            "audio/mpeg",
        );
        assert!(matches!(err, Err(ServiceError::DependencyUnavailable(_))));
    }
}
