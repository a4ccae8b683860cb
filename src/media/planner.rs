//! Conversion planning.
//!
//! Pure decision logic: given a collection's configuration and an upload's
//! MIME type, decide whether a conversion is needed and with which
//! transcoder arguments. No I/O happens here, which keeps the rules
//! exhaustively testable.

use crate::models::{CollectionConfig, ContentType};

/// A resolved conversion: target type, transcoder invocation and the
/// filename the entry will carry afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub target_mime: String,
    /// ffmpeg output container (`-f` argument).
    pub transcoder_format: &'static str,
    pub transcoder_args: Vec<String>,
    pub target_filename: String,
}

/// Returns the conversion required by the collection config, or `None` when
/// the upload is stored as-is.
pub fn plan_conversion(
    content_type: ContentType,
    config: &CollectionConfig,
    source_mime: &str,
    filename: &str,
) -> Option<ConversionPlan> {
    match content_type {
        ContentType::Image => {
            if !config.convert_to_jpeg || source_mime == "image/jpeg" {
                return None;
            }
            Some(ConversionPlan {
                target_mime: "image/jpeg".to_string(),
                transcoder_format: "mjpeg",
                transcoder_args: str_args(&["-q:v", "3"]),
                target_filename: with_extension(filename, "jpg"),
            })
        }
        ContentType::Audio => match config.auto_conversion.as_str() {
            // Substring match keeps variant types such as audio/x-flac
            // from being re-encoded to themselves.
            "flac" if !source_mime.contains("flac") => Some(ConversionPlan {
                target_mime: "audio/flac".to_string(),
                transcoder_format: "flac",
                transcoder_args: str_args(&["-c:a", "flac"]),
                target_filename: with_extension(filename, "flac"),
            }),
            "opus" if !source_mime.contains("opus") => Some(ConversionPlan {
                target_mime: "audio/opus".to_string(),
                transcoder_format: "ogg",
                transcoder_args: str_args(&["-c:a", "libopus", "-b:a", "96k"]),
                target_filename: with_extension(filename, "opus"),
            }),
            _ => None,
        },
        ContentType::File => None,
    }
}

/// Canonical file extension for a MIME type, used when naming claimed
/// uploads that arrive without a filename.
pub fn extension_for_mime(mime: &str) -> String {
    match mime {
        "image/jpeg" => "jpg".to_string(),
        "audio/mpeg" => "mp3".to_string(),
        "audio/x-flac" => "flac".to_string(),
        "application/ogg" => "ogg".to_string(),
        "application/octet-stream" => "bin".to_string(),
        other => other.rsplit('/').next().unwrap_or("bin").to_string(),
    }
}

fn with_extension(filename: &str, ext: &str) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{}", &filename[..dot], ext),
        _ => format!("{}.{}", filename, ext),
    }
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_config(convert_to_jpeg: bool) -> CollectionConfig {
        CollectionConfig {
            convert_to_jpeg,
            ..Default::default()
        }
    }

    fn audio_config(auto_conversion: &str) -> CollectionConfig {
        CollectionConfig {
            auto_conversion: auto_conversion.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_without_flag_is_stored_as_is() {
        let plan = plan_conversion(
            ContentType::Image,
            &image_config(false),
            "image/png",
            "a.png",
        );
        assert!(plan.is_none());
    }

    #[test]
    fn test_png_converts_to_jpeg_when_enabled() {
        let plan = plan_conversion(
            ContentType::Image,
            &image_config(true),
            "image/png",
            "photo.png",
        )
        .unwrap();
        assert_eq!(plan.target_mime, "image/jpeg");
        assert_eq!(plan.transcoder_format, "mjpeg");
        assert_eq!(plan.transcoder_args, vec!["-q:v", "3"]);
        assert_eq!(plan.target_filename, "photo.jpg");
    }

    #[test]
    fn test_jpeg_never_reconverts() {
        let plan = plan_conversion(
            ContentType::Image,
            &image_config(true),
            "image/jpeg",
            "photo.jpg",
        );
        assert!(plan.is_none());
    }

    #[test]
    fn test_audio_flac_target() {
        let plan = plan_conversion(
            ContentType::Audio,
            &audio_config("flac"),
            "audio/wav",
            "take1.wav",
        )
        .unwrap();
        assert_eq!(plan.target_mime, "audio/flac");
        assert_eq!(plan.transcoder_args, vec!["-c:a", "flac"]);
        assert_eq!(plan.target_filename, "take1.flac");
    }

    #[test]
    fn test_flac_variants_are_not_reencoded() {
        for mime in ["audio/flac", "audio/x-flac"] {
            let plan = plan_conversion(
                ContentType::Audio,
                &audio_config("flac"),
                mime,
                "take1.flac",
            );
            assert!(plan.is_none(), "{} should not be converted", mime);
        }
    }

    #[test]
    fn test_audio_opus_target() {
        let plan = plan_conversion(
            ContentType::Audio,
            &audio_config("opus"),
            "audio/mpeg",
            "song.mp3",
        )
        .unwrap();
        assert_eq!(plan.target_mime, "audio/opus");
        assert_eq!(plan.transcoder_args, vec!["-c:a", "libopus", "-b:a", "96k"]);
        assert_eq!(plan.target_filename, "song.opus");
    }

    #[test]
    fn test_auto_conversion_none_stores_as_is() {
        let plan = plan_conversion(
            ContentType::Audio,
            &audio_config("none"),
            "audio/wav",
            "take1.wav",
        );
        assert!(plan.is_none());
    }

    #[test]
    fn test_file_collections_never_convert() {
        let plan = plan_conversion(
            ContentType::File,
            &CollectionConfig::default(),
            "application/pdf",
            "doc.pdf",
        );
        assert!(plan.is_none());
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("audio/mpeg"), "mp3");
        assert_eq!(extension_for_mime("audio/x-flac"), "flac");
        assert_eq!(extension_for_mime("application/octet-stream"), "bin");
        assert_eq!(extension_for_mime("image/png"), "png");
    }

    #[test]
    fn test_filename_without_extension_gets_one() {
        let plan = plan_conversion(
            ContentType::Image,
            &image_config(true),
            "image/png",
            "snapshot",
        )
        .unwrap();
        assert_eq!(plan.target_filename, "snapshot.jpg");
    }
}
