//! Technical metadata extraction.
//!
//! Images are measured with the `image` crate, WAV audio with `hound`;
//! everything else goes through ffprobe when it is available.

use log::debug;
use serde::Deserialize;
use std::path::Path;

use crate::error::ServiceError;
use crate::media::transcoder::Transcoder;
use crate::models::{ContentType, TechMetadata};

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    channels: Option<i64>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Derives the technical metadata for a stored file. `file` collections
/// carry none and always return the zero value.
pub fn extract_tech_metadata(
    transcoder: &Transcoder,
    path: &Path,
    mime_type: &str,
    content_type: ContentType,
) -> Result<TechMetadata, ServiceError> {
    match content_type {
        ContentType::Image => probe_image(path),
        ContentType::Audio => {
            if mime_type.contains("wav") {
                probe_wav(path)
            } else {
                probe_with_ffprobe(transcoder, path)
            }
        }
        ContentType::File => Ok(TechMetadata::default()),
    }
}

fn probe_image(path: &Path) -> Result<TechMetadata, ServiceError> {
    let (width, height) = image::image_dimensions(path).map_err(ServiceError::internal)?;
    Ok(TechMetadata {
        width: width as i64,
        height: height as i64,
        ..Default::default()
    })
}

fn probe_wav(path: &Path) -> Result<TechMetadata, ServiceError> {
    let reader = hound::WavReader::open(path).map_err(ServiceError::internal)?;
    let spec = reader.spec();
    let frames = reader.duration() as f64;
    Ok(TechMetadata {
        duration_sec: frames / spec.sample_rate as f64,
        channels: spec.channels as i64,
        ..Default::default()
    })
}

fn probe_with_ffprobe(transcoder: &Transcoder, path: &Path) -> Result<TechMetadata, ServiceError> {
    let raw = transcoder.probe_json(path)?;
    let report: ProbeReport = serde_json::from_slice(&raw).map_err(ServiceError::internal)?;

    let mut tech = TechMetadata::default();
    for stream in &report.streams {
        match stream.codec_type.as_deref() {
            Some("audio") => {
                tech.channels = stream.channels.unwrap_or(0);
                if let Some(d) = parse_seconds(stream.duration.as_deref()) {
                    tech.duration_sec = d;
                }
            }
            Some("video") => {
                tech.width = stream.width.unwrap_or(0);
                tech.height = stream.height.unwrap_or(0);
            }
            _ => {}
        }
    }
    // Container duration is the fallback when the stream does not carry one.
    if tech.duration_sec == 0.0 {
        if let Some(d) = report.format.and_then(|f| parse_seconds(f.duration.as_deref())) {
            tech.duration_sec = d;
        }
    }
    debug!("Probed {}: {:?}", path.display(), tech);
    Ok(tech)
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value.and_then(|s| s.parse::<f64>().ok()).filter(|d| *d > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(dir: &TempDir, seconds: u32) -> std::path::PathBuf {
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(8000 * seconds * 2) {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_probe_wav_duration_and_channels() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, 2);
        let tech = extract_tech_metadata(
            &Transcoder::disabled(),
            &path,
            "audio/wav",
            ContentType::Audio,
        )
        .unwrap();
        assert_eq!(tech.channels, 2);
        assert!((tech.duration_sec - 2.0).abs() < 0.01);
        assert_eq!(tech.width, 0);
    }

    #[test]
    fn test_probe_image_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dot.png");
        let img = image::RgbImage::from_pixel(3, 5, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();

        let tech = extract_tech_metadata(
            &Transcoder::disabled(),
            &path,
            "image/png",
            ContentType::Image,
        )
        .unwrap();
        assert_eq!(tech.width, 3);
        assert_eq!(tech.height, 5);
    }

    #[test]
    fn test_file_collections_have_no_tech_metadata() {
        let tech = extract_tech_metadata(
            &Transcoder::disabled(),
            Path::new("/nonexistent"),
            "application/pdf",
            ContentType::File,
        )
        .unwrap();
        assert_eq!(tech.width, 0);
        assert_eq!(tech.channels, 0);
    }

    #[test]
    fn test_non_wav_audio_without_ffprobe_is_unavailable() {
        let err = extract_tech_metadata(
            &Transcoder::disabled(),
            Path::new("/nonexistent"),
            "audio/mpeg",
            ContentType::Audio,
        );
        assert!(matches!(err, Err(ServiceError::DependencyUnavailable(_))));
    }

    #[test]
    fn test_probe_report_parsing_prefers_stream_duration() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "channels": 2, "duration": "12.5"}
            ],
            "format": {"duration": "13.0"}
        }"#;
        let report: ProbeReport = serde_json::from_slice(raw).unwrap();
        assert_eq!(report.streams[0].channels, Some(2));
        assert_eq!(parse_seconds(report.streams[0].duration.as_deref()), Some(12.5));
    }
}
