use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::clip::{Camera, CameraId};
use crate::config::{MediaTools, StorageLayout};
use crate::error::ReplayError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Which cameras answered a start or stop request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureAck {
    pub confirmed: Vec<CameraId>,
    pub missing: Vec<CameraId>,
}

/// Continuous recording of every camera into a buffer the extractor can
/// read time windows from.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn start_capture(
        &self,
        cameras: &[Camera],
        session_label: &str,
    ) -> Result<CaptureAck, ReplayError>;

    async fn stop_capture(&self) -> Result<CaptureAck, ReplayError>;
}

struct RunningCapture {
    camera: CameraId,
    output: PathBuf,
    child: Child,
}

/// One ffmpeg process per camera, transcoding its MJPEG feed to MPEG-TS.
pub struct FfmpegCapture {
    layout: StorageLayout,
    tools: MediaTools,
    grace: Duration,
    running: Mutex<Vec<RunningCapture>>,
}

impl FfmpegCapture {
    pub fn new(layout: StorageLayout, tools: MediaTools, grace: Duration) -> Self {
        FfmpegCapture {
            layout,
            tools,
            grace,
            running: Mutex::new(Vec::new()),
        }
    }

    fn spawn(&self, camera: &Camera, output: &Path) -> std::io::Result<Child> {
        let mut child = Command::new(&self.tools.ffmpeg)
            .args(capture_args(&camera.url, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let camera = camera.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg {}: {}", camera, line);
                }
            });
        }
        Ok(child)
    }
}

#[async_trait]
impl CaptureSource for FfmpegCapture {
    async fn start_capture(
        &self,
        cameras: &[Camera],
        session_label: &str,
    ) -> Result<CaptureAck, ReplayError> {
        tokio::fs::create_dir_all(self.layout.session_buffer_dir(session_label)).await?;

        let mut ack = CaptureAck::default();
        let mut spawned = Vec::new();
        for camera in cameras {
            let output = self.layout.source_path(session_label, &camera.id);
            // Leftover footage from an earlier session under the same label
            // must not count as this process writing.
            if let Err(err) = discard_stale(&output).await {
                error!("Cannot clear {}: {}", output.display(), err);
                ack.missing.push(camera.id.clone());
                continue;
            }
            match self.spawn(camera, &output) {
                Ok(child) => {
                    info!("Capture for {} started -> {}", camera.id, output.display());
                    spawned.push(RunningCapture {
                        camera: camera.id.clone(),
                        output,
                        child,
                    });
                }
                Err(err) => {
                    error!("Failed to spawn capture for {}: {}", camera.id, err);
                    ack.missing.push(camera.id.clone());
                }
            }
        }

        let deadline = Instant::now() + self.grace;
        let mut writing = Vec::with_capacity(spawned.len());
        for mut capture in spawned {
            if wait_until_writing(&mut capture, deadline).await {
                ack.confirmed.push(capture.camera.clone());
                writing.push(capture);
            } else {
                warn!(
                    "{} did not start writing within {:?}, proceeding without it",
                    capture.camera, self.grace
                );
                let _ = capture.child.kill().await;
                ack.missing.push(capture.camera);
            }
        }

        if writing.is_empty() {
            return Err(ReplayError::CaptureUnavailable(
                "no camera started writing".to_string(),
            ));
        }

        self.running.lock().extend(writing);
        Ok(ack)
    }

    async fn stop_capture(&self) -> Result<CaptureAck, ReplayError> {
        let captures = std::mem::take(&mut *self.running.lock());
        let mut ack = CaptureAck::default();

        for mut capture in captures {
            match capture.child.try_wait() {
                Ok(Some(status)) => {
                    info!("Capture for {} had already exited ({})", capture.camera, status);
                    ack.missing.push(capture.camera);
                }
                _ => match capture.child.kill().await {
                    Ok(()) => {
                        info!("Capture for {} stopped", capture.camera);
                        ack.confirmed.push(capture.camera);
                    }
                    Err(err) => {
                        warn!("Failed to stop capture for {}: {}", capture.camera, err);
                        ack.missing.push(capture.camera);
                    }
                },
            }
        }
        Ok(ack)
    }
}

async fn discard_stale(output: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(output).await {
        Ok(()) => {
            info!("Discarded stale capture {}", output.display());
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Polls until the process has written bytes, exited, or the deadline passed.
///
/// The output was removed before spawning, so any bytes in it came from this
/// child. A child that wrote and then died is not confirmed.
async fn wait_until_writing(capture: &mut RunningCapture, deadline: Instant) -> bool {
    loop {
        let written = tokio::fs::metadata(&capture.output)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        match capture.child.try_wait() {
            Ok(Some(status)) => {
                warn!("Capture for {} exited early ({})", capture.camera, status);
                return false;
            }
            Ok(None) if written => return true,
            Ok(None) => {}
            Err(err) => {
                warn!("Cannot poll capture for {}: {}", capture.camera, err);
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn capture_args(url: &str, output: &Path) -> Vec<String> {
    let args = [
        "-hide_banner", "-nostdin", "-y",
        "-f", "mjpeg",
        "-i", url,
        "-c:v", "libx264",
        "-profile:v", "baseline",
        "-level", "3.0",
        "-preset", "ultrafast",
        "-tune", "zerolatency",
        "-pix_fmt", "yuv420p",
        "-an",
        "-f", "mpegts",
    ];
    let mut args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    args.push(output.to_string_lossy().into_owned());
    args
}
