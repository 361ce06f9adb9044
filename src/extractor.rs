use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::clip::{CameraId, Clip, UploadState};
use crate::config::{DeliveryProfile, MediaTools, StorageLayout};
use crate::error::ReplayError;
use crate::timeline::Segment;
use crate::utilities::{format_timestamp, probe_duration, run_ffmpeg};

/// One camera's share of a segment.
#[derive(Debug, Clone)]
pub struct ClipRequest {
    pub segment: Segment,
    pub camera: CameraId,
    pub session_label: String,
    pub ball_label: String,
}

/// Materializes a clip for one camera from its continuous capture.
#[async_trait]
pub trait ClipExtractor: Send + Sync {
    async fn extract(&self, request: &ClipRequest) -> Result<Clip, ReplayError>;
}

/// Cuts clips out of the capture buffer with ffmpeg and re-encodes them to
/// the delivery profile.
pub struct FfmpegExtractor {
    layout: StorageLayout,
    profile: DeliveryProfile,
    tools: MediaTools,
    buffer_slack_secs: f64,
}

/// An encode in progress. Removed on drop unless published, so a failed or
/// cancelled extraction leaves nothing behind.
struct PartialFile {
    path: PathBuf,
    published: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        PartialFile {
            path,
            published: false,
        }
    }

    async fn publish(mut self, output: &Path) -> Result<()> {
        tokio::fs::rename(&self.path, output)
            .await
            .with_context(|| format!("failed to publish {}", output.display()))?;
        self.published = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial clip {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Could not remove {}: {}", self.path.display(), err),
        }
    }
}

impl FfmpegExtractor {
    pub fn new(
        layout: StorageLayout,
        profile: DeliveryProfile,
        tools: MediaTools,
        buffer_slack_secs: f64,
    ) -> Self {
        FfmpegExtractor {
            layout,
            profile,
            tools,
            buffer_slack_secs,
        }
    }

    async fn try_extract(&self, request: &ClipRequest) -> Result<Clip> {
        let segment = request.segment;
        segment.validate().map_err(anyhow::Error::msg)?;

        let source = self.layout.source_path(&request.session_label, &request.camera);
        tokio::fs::metadata(&source)
            .await
            .with_context(|| format!("capture buffer {} is not readable", source.display()))?;

        let available = probe_duration(&self.tools.ffprobe, &source).await?;
        ensure!(
            segment.end <= available + self.buffer_slack_secs,
            "requested window {} exceeds the {:.3}s buffered",
            segment,
            available
        );

        let clips_dir = self.layout.session_clips_dir(&request.session_label);
        tokio::fs::create_dir_all(&clips_dir).await?;

        let id = Uuid::new_v4().to_string();
        let filename = format!("{}_{}_{}.mp4", request.ball_label, request.camera, id);
        let output = clips_dir.join(&filename);
        let partial = PartialFile::new(clips_dir.join(format!(".{}.part", filename)));

        let args = encode_args(&self.profile, &source, segment, &partial.path);
        run_ffmpeg(&self.tools.ffmpeg, &args).await?;
        partial.publish(&output).await?;

        let size = tokio::fs::metadata(&output).await?.len();
        info!(
            "Created {} clip {} for ball {} ({} bytes)",
            request.camera, filename, request.ball_label, size
        );

        Ok(Clip {
            id,
            filename,
            local_path: output,
            ball_number: request.ball_label.clone(),
            camera: request.camera.clone(),
            segment,
            duration: segment.duration(),
            size,
            timestamp: Utc::now(),
            upload_state: UploadState::NotUploaded,
            s3_url: None,
        })
    }
}

#[async_trait]
impl ClipExtractor for FfmpegExtractor {
    async fn extract(&self, request: &ClipRequest) -> Result<Clip, ReplayError> {
        debug!(
            "Extracting {} for {} in {}",
            request.segment, request.camera, request.session_label
        );
        self.try_extract(request)
            .await
            .map_err(|err| ReplayError::extraction(&request.camera, format!("{:#}", err)))
    }
}

/// ffmpeg arguments that cut `segment` out of `source` into `output`.
fn encode_args(profile: &DeliveryProfile, source: &Path, segment: Segment, output: &Path) -> Vec<String> {
    let crf = profile.crf.to_string();
    let fps = profile.fps.to_string();
    let audio_rate = profile.audio_rate.to_string();
    let encoding: [&str; 30] = [
        "-c:v", &profile.video_codec,
        "-preset", &profile.preset,
        "-crf", &crf,
        "-profile:v", "main",
        "-level", "3.1",
        "-b:v", &profile.video_bitrate,
        "-s", &profile.resolution,
        "-r", &fps,
        "-c:a", &profile.audio_codec,
        "-b:a", &profile.audio_bitrate,
        "-ar", &audio_rate,
        "-movflags", "+faststart",
        "-f", "mp4",
        "-loglevel", "error",
        "-nostdin", "-hide_banner",
    ];

    let mut args = vec![
        "-y".to_string(),
        "-ss".to_string(),
        format_timestamp(segment.start),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-t".to_string(),
        format_timestamp(segment.duration()),
    ];
    args.extend(encoding.iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().into_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::utilities::write_stub_tool;
    use tempfile::TempDir;

    fn extractor(dir: &TempDir, tools: MediaTools) -> FfmpegExtractor {
        FfmpegExtractor::new(
            StorageLayout::new(dir.path().join("buffer"), dir.path().join("clips")),
            DeliveryProfile::default(),
            tools,
            5.0,
        )
    }

    fn request(segment: Segment) -> ClipRequest {
        ClipRequest {
            segment,
            camera: CameraId::new("cam1"),
            session_label: "final".to_string(),
            ball_label: "0.2".to_string(),
        }
    }

    #[test]
    fn encode_args_seek_and_bound_the_window() {
        let args = encode_args(
            &DeliveryProfile::default(),
            Path::new("/buf/final/cam1.ts"),
            Segment::new(20.0, 35.0),
            Path::new("/clips/final/.x.mp4.part"),
        );

        let value_after = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(value_after("-ss"), "00:00:20.000");
        assert_eq!(value_after("-t"), "00:00:15.000");
        assert_eq!(value_after("-i"), "/buf/final/cam1.ts");
        assert_eq!(value_after("-s"), "1280x720");
        assert_eq!(value_after("-f"), "mp4");
        assert_eq!(args.last().unwrap(), "/clips/final/.x.mp4.part");
        // Input seeking must come before -i.
        assert!(args.iter().position(|a| a == "-ss") < args.iter().position(|a| a == "-i"));
    }

    #[tokio::test]
    async fn missing_capture_buffer_fails_extraction() {
        let dir = TempDir::new().unwrap();
        let extractor = extractor(&dir, MediaTools::default());

        let err = extractor
            .extract(&request(Segment::new(10.0, 20.0)))
            .await
            .unwrap_err();
        match err {
            ReplayError::ExtractionFailed { camera, reason } => {
                assert_eq!(camera.as_str(), "cam1");
                assert!(reason.contains("not readable"), "{}", reason);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!dir.path().join("clips").exists());
    }

    #[tokio::test]
    async fn empty_window_is_rejected_before_touching_storage() {
        let dir = TempDir::new().unwrap();
        let extractor = extractor(&dir, MediaTools::default());

        let err = extractor
            .extract(&request(Segment::new(20.0, 20.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::ExtractionFailed { .. }));
        assert!(err.to_string().contains("no duration"));
    }

    /// A capture buffer holding 12.5s of footage, as reported by ffprobe.
    #[cfg(unix)]
    fn buffered_session(dir: &TempDir, ffmpeg_body: &str) -> FfmpegExtractor {
        let buffer = dir.path().join("buffer").join("final");
        std::fs::create_dir_all(&buffer).unwrap();
        std::fs::write(buffer.join("cam1.ts"), vec![0x47u8; 188]).unwrap();

        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let tools = MediaTools {
            ffmpeg: write_stub_tool(&bin, "ffmpeg", ffmpeg_body),
            ffprobe: write_stub_tool(&bin, "ffprobe", "echo 12.5"),
        };
        extractor(dir, tools)
    }

    #[cfg(unix)]
    fn clip_dir_entries(dir: &TempDir) -> Vec<String> {
        match std::fs::read_dir(dir.path().join("clips").join("final")) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn window_past_buffered_footage_fails() {
        let dir = TempDir::new().unwrap();
        let extractor = buffered_session(&dir, "exit 0");

        // 12.5s buffered plus 5s slack covers up to 17.5s.
        let err = extractor
            .extract(&request(Segment::new(10.0, 30.0)))
            .await
            .unwrap_err();
        match err {
            ReplayError::ExtractionFailed { reason, .. } => {
                assert!(reason.contains("exceeds"), "{}", reason);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(clip_dir_entries(&dir).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clip_appears_under_its_name_only_once_complete() {
        let dir = TempDir::new().unwrap();
        let seen = dir.path().join("seen.txt");
        // Records the output path and what the clips dir held mid-encode.
        let body = format!(
            r#"for arg in "$@"; do out="$arg"; done
echo "$out" > {seen}
ls -A "$(dirname "$out")" >> {seen}
printf 'moov' > "$out""#,
            seen = seen.display()
        );
        let extractor = buffered_session(&dir, &body);

        let clip = extractor
            .extract(&request(Segment::new(5.0, 15.0)))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&clip.local_path).unwrap(), b"moov");
        assert_eq!(clip.size, 4);
        assert_eq!(clip.duration, 10.0);
        assert!(clip.filename.starts_with("0.2_cam1_"));

        let seen = std::fs::read_to_string(&seen).unwrap();
        let mut lines = seen.lines();
        assert!(lines.next().unwrap().ends_with(".part"));
        assert!(lines.all(|name| name != clip.filename));
        assert_eq!(clip_dir_entries(&dir), vec![clip.filename.clone()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_encode_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let extractor = buffered_session(
            &dir,
            r#"for arg in "$@"; do out="$arg"; done
printf 'half' > "$out"
echo 'Conversion failed!' >&2
exit 1"#,
        );

        let err = extractor
            .extract(&request(Segment::new(5.0, 15.0)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Conversion failed"), "{}", err);
        assert!(clip_dir_entries(&dir).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_extraction_removes_its_partial_file() {
        let dir = TempDir::new().unwrap();
        let extractor = buffered_session(
            &dir,
            r#"for arg in "$@"; do out="$arg"; done
printf 'half' > "$out"
exec sleep 30"#,
        );

        let request = request(Segment::new(5.0, 15.0));
        let limit = std::time::Duration::from_millis(1500);
        let attempt = tokio::time::timeout(limit, extractor.extract(&request)).await;
        assert!(attempt.is_err());
        assert!(clip_dir_entries(&dir).is_empty());
    }
}
