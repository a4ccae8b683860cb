//! External transcoder wrapper.
//!
//! Thin process wrapper around ffmpeg/ffprobe. Binaries are located once at
//! startup; absence is not fatal, callers decide per operation whether a
//! missing transcoder is an error or just skips an optional step.

use log::{info, warn};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::MediaConfig;
use crate::error::ServiceError;

pub struct Transcoder {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl Transcoder {
    /// Locates ffmpeg and ffprobe from the configured paths, falling back
    /// to a PATH search. Missing binaries are logged, not fatal.
    pub fn detect(config: &MediaConfig) -> Self {
        let ffmpeg = locate("ffmpeg", &config.ffmpeg_path);
        let ffprobe = locate("ffprobe", &config.ffprobe_path);
        match &ffmpeg {
            Some(path) => info!("Using ffmpeg at {}", path.display()),
            None => warn!("ffmpeg not found; conversions and rich previews are disabled"),
        }
        match &ffprobe {
            Some(path) => info!("Using ffprobe at {}", path.display()),
            None => warn!("ffprobe not found; deep metadata probing is disabled"),
        }
        Self { ffmpeg, ffprobe }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            ffmpeg: None,
            ffprobe: None,
        }
    }

    pub fn has_ffmpeg(&self) -> bool {
        self.ffmpeg.is_some()
    }

    pub fn has_ffprobe(&self) -> bool {
        self.ffprobe.is_some()
    }

    /// Converts an in-memory buffer, streaming it through the transcoder's
    /// stdin. On failure any partial output file is removed.
    pub fn convert_bytes(
        &self,
        input: &[u8],
        args: &[String],
        format: &str,
        output: &Path,
    ) -> Result<(), ServiceError> {
        let ffmpeg = self.require_ffmpeg()?;
        let mut child = Command::new(ffmpeg)
            .arg("-i")
            .arg("pipe:0")
            .args(args)
            .arg("-f")
            .arg(format)
            .arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ServiceError::internal)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServiceError::Internal("transcoder stdin unavailable".to_string()))?;

        let result = std::thread::scope(|scope| {
            scope.spawn(move || {
                // The transcoder may stop reading early; a broken pipe here
                // is reported through the exit status instead.
                let _ = stdin.write_all(input);
            });
            child.wait_with_output()
        })
        .map_err(ServiceError::internal)?;

        check_exit("ffmpeg", &result.status, &result.stderr, Some(output))
    }

    /// Converts a file on disk.
    pub fn convert_file(
        &self,
        input: &Path,
        args: &[String],
        format: &str,
        output: &Path,
    ) -> Result<(), ServiceError> {
        let ffmpeg = self.require_ffmpeg()?;
        let result = Command::new(ffmpeg)
            .arg("-i")
            .arg(input)
            .args(args)
            .arg("-f")
            .arg(format)
            .arg("-y")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(ServiceError::internal)?;

        check_exit("ffmpeg", &result.status, &result.stderr, Some(output))
    }

    /// Runs ffprobe and returns its JSON report.
    pub fn probe_json(&self, input: &Path) -> Result<Vec<u8>, ServiceError> {
        let ffprobe = self.ffprobe.as_ref().ok_or_else(|| {
            ServiceError::DependencyUnavailable("ffprobe is not available".to_string())
        })?;
        let result = Command::new(ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(ServiceError::internal)?;

        check_exit("ffprobe", &result.status, &result.stderr, None)?;
        Ok(result.stdout)
    }

    fn require_ffmpeg(&self) -> Result<&Path, ServiceError> {
        self.ffmpeg.as_deref().ok_or_else(|| {
            ServiceError::DependencyUnavailable("ffmpeg is not available".to_string())
        })
    }
}

fn check_exit(
    tool: &str,
    status: &std::process::ExitStatus,
    stderr: &[u8],
    partial_output: Option<&Path>,
) -> Result<(), ServiceError> {
    if status.success() {
        return Ok(());
    }
    if let Some(path) = partial_output {
        let _ = fs::remove_file(path);
    }
    let detail = String::from_utf8_lossy(stderr);
    let tail = detail.lines().rev().take(3).collect::<Vec<_>>();
    Err(ServiceError::Internal(format!(
        "{} failed ({}): {}",
        tool,
        status,
        tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
    )))
}

fn locate(binary: &str, configured: &str) -> Option<PathBuf> {
    if !configured.is_empty() {
        let path = PathBuf::from(configured);
        if path.is_file() {
            return Some(path);
        }
        warn!("Configured {} path {} does not exist", binary, configured);
        return None;
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_transcoder_reports_dependency_unavailable() {
        let t = Transcoder::disabled();
        assert!(!t.has_ffmpeg());
        assert!(!t.has_ffprobe());

        let err = t.convert_bytes(b"data", &[], "flac", Path::new("/tmp/out"));
        assert!(matches!(err, Err(ServiceError::DependencyUnavailable(_))));
        let err = t.probe_json(Path::new("/tmp/in"));
        assert!(matches!(err, Err(ServiceError::DependencyUnavailable(_))));
    }

    #[test]
    fn test_locate_rejects_missing_configured_path() {
        assert!(locate("ffmpeg", "/nonexistent/ffmpeg").is_none());
    }
}
