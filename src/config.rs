use clap::{Args, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clip::{Camera, CameraId};

/// Dual-camera instant replay server
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address to bind the HTTP API to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP API to
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory holding the continuous per-camera capture files
    #[arg(long, env = "BUFFER_DIR", default_value = "./buffer")]
    pub buffer_dir: PathBuf,

    /// Directory extracted clips are written to
    #[arg(long, env = "CLIPS_DIR", default_value = "./clips")]
    pub clips_dir: PathBuf,

    /// Camera feeds as <id>=<url>
    #[arg(
        long = "camera",
        env = "CAMERAS",
        value_delimiter = ',',
        default_values = [
            "cam1=http://172.16.125.249:8080/video",
            "cam2=http://172.16.124.237:8080/video",
        ]
    )]
    pub cameras: Vec<Camera>,

    /// Balls kept per camera in the rolling buffer
    #[arg(long, env = "MAX_BUFFER_BALLS", default_value_t = 5)]
    pub max_buffer_balls: usize,

    /// Overrides the rolling buffer capacity (clips across all cameras)
    #[arg(long, env = "BUFFER_CAPACITY")]
    pub buffer_capacity: Option<usize>,

    /// Highest ball count that still gets an over.ball label
    #[arg(long, env = "MAX_BALL_INDEX", default_value_t = 120)]
    pub max_ball_index: u32,

    /// Seconds to wait for each camera to start writing at session start
    #[arg(long, env = "CAPTURE_GRACE_SECS", default_value_t = 5)]
    pub capture_grace_secs: u64,

    /// Fixed part of the per-clip extraction timeout
    #[arg(long, env = "EXTRACT_TIMEOUT_BASE_SECS", default_value_t = 30)]
    pub extract_timeout_base_secs: u64,

    /// Extra seconds of timeout per second of requested clip
    #[arg(long, env = "EXTRACT_TIMEOUT_FACTOR", default_value_t = 4.0)]
    pub extract_timeout_factor: f64,

    /// How far a clip may run past what the capture file holds
    #[arg(long, env = "BUFFER_SLACK_SECS", default_value_t = 5.0)]
    pub buffer_slack_secs: f64,

    #[command(flatten)]
    pub profile: DeliveryProfile,

    #[command(flatten)]
    pub tools: MediaTools,

    #[arg(long, env = "S3_BUCKET_NAME", default_value = "cricket-umpire-permanent")]
    pub s3_bucket: String,

    /// Falls back to the AWS default provider chain, then eu-north-1
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Endpoint override for S3-compatible stores (e.g. http://127.0.0.1:9000)
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,
}

impl Config {
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.buffer_dir, &self.clips_dir)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        let capacity = self
            .buffer_capacity
            .unwrap_or(self.max_buffer_balls * self.cameras.len());
        ControllerSettings {
            cameras: self.cameras.clone(),
            buffer_capacity: capacity,
            max_ball_index: self.max_ball_index,
            extraction_timeout_base: Duration::from_secs(self.extract_timeout_base_secs),
            extraction_timeout_factor: self.extract_timeout_factor,
            layout: self.layout(),
        }
    }
}

/// Encoding applied to every extracted clip.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct DeliveryProfile {
    #[arg(long, env = "CLIP_RESOLUTION", default_value = "1280x720")]
    pub resolution: String,

    #[arg(long, env = "CLIP_FPS", default_value_t = 30)]
    pub fps: u32,

    #[arg(long, env = "CLIP_VIDEO_CODEC", default_value = "libx264")]
    pub video_codec: String,

    #[arg(long, env = "CLIP_VIDEO_BITRATE", default_value = "1500k")]
    pub video_bitrate: String,

    #[arg(long, env = "CLIP_PRESET", default_value = "medium")]
    pub preset: String,

    #[arg(long, env = "CLIP_CRF", default_value_t = 20)]
    pub crf: u8,

    #[arg(long, env = "CLIP_AUDIO_CODEC", default_value = "aac")]
    pub audio_codec: String,

    #[arg(long, env = "CLIP_AUDIO_BITRATE", default_value = "128k")]
    pub audio_bitrate: String,

    #[arg(long, env = "CLIP_AUDIO_RATE", default_value_t = 44100)]
    pub audio_rate: u32,
}

impl Default for DeliveryProfile {
    fn default() -> Self {
        DeliveryProfile {
            resolution: "1280x720".to_string(),
            fps: 30,
            video_codec: "libx264".to_string(),
            video_bitrate: "1500k".to_string(),
            preset: "medium".to_string(),
            crf: 20,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_rate: 44100,
        }
    }
}

/// External binaries the capture and extraction pipelines shell out to.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct MediaTools {
    #[arg(long = "ffmpeg", env = "FFMPEG_BIN", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[arg(long = "ffprobe", env = "FFPROBE_BIN", default_value = "ffprobe")]
    pub ffprobe: PathBuf,
}

impl Default for MediaTools {
    fn default() -> Self {
        MediaTools {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Where capture files and clips live on disk, namespaced per session.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    buffer_dir: PathBuf,
    clips_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(buffer_dir: impl AsRef<Path>, clips_dir: impl AsRef<Path>) -> Self {
        StorageLayout {
            buffer_dir: buffer_dir.as_ref().to_path_buf(),
            clips_dir: clips_dir.as_ref().to_path_buf(),
        }
    }

    pub fn session_buffer_dir(&self, session_label: &str) -> PathBuf {
        self.buffer_dir.join(session_label)
    }

    pub fn session_clips_dir(&self, session_label: &str) -> PathBuf {
        self.clips_dir.join(session_label)
    }

    /// Continuous capture file for one camera
    pub fn source_path(&self, session_label: &str, camera: &CameraId) -> PathBuf {
        self.session_buffer_dir(session_label)
            .join(format!("{}.ts", camera))
    }

    /// Bytes currently held by a session's capture files.
    pub async fn capture_bytes(&self, session_label: &str) -> u64 {
        let Ok(mut entries) = tokio::fs::read_dir(self.session_buffer_dir(session_label)).await else {
            return 0;
        };
        let mut total = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "ts") {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }
        total
    }
}

/// Knobs the session controller needs, independent of how they were loaded.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub cameras: Vec<Camera>,
    pub buffer_capacity: usize,
    pub max_ball_index: u32,
    pub extraction_timeout_base: Duration,
    pub extraction_timeout_factor: f64,
    /// Used to report how much capture footage the session holds on disk.
    pub layout: StorageLayout,
}

impl ControllerSettings {
    pub fn extraction_timeout(&self, clip_secs: f64) -> Duration {
        let scaled = Duration::from_secs_f64((clip_secs * self.extraction_timeout_factor).max(0.0));
        self.extraction_timeout_base + scaled
    }
}
