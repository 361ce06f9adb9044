//! Session controller
//!
//! Owns the single active recording session, its timeline and its rolling
//! buffer. Operations that change the session queue on one async gate, so
//! timeline events are applied in the order operators issue them. The state
//! itself sits behind a short-lived lock that is never held across an await,
//! so status reads and playback stay responsive while clips are cut or
//! uploaded.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::buffer::RollingBuffer;
use crate::capture::CaptureSource;
use crate::clip::{ball_label, CameraId, Clip};
use crate::config::ControllerSettings;
use crate::error::ReplayError;
use crate::extractor::{ClipExtractor, ClipRequest};
use crate::s3_uploader::UploadSink;
use crate::timeline::{EventKind, Segment, TimelineTracker, TransitionRecord};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Recording,
}

/// One recording context, from `start` until the next `start`.
#[derive(Debug, Clone)]
pub struct Session {
    pub label: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub ball_count: u32,
    pub last_mark_offset: f64,
    pub cameras: Vec<CameraId>,
}

impl Session {
    fn new(label: String, cameras: Vec<CameraId>) -> Self {
        Session {
            label,
            started_at: Utc::now(),
            started: Instant::now(),
            ball_count: 0,
            last_mark_offset: 0.0,
            cameras,
        }
    }

    /// Seconds since the session started.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Snapshot returned by every mutating call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: RecordingState,
    pub is_recording: bool,
    pub is_paused: bool,
    pub match_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_ball: u32,
    pub current_ball_label: Option<String>,
    pub last_mark_offset: f64,
    pub active_cameras: Vec<CameraId>,
    pub buffer_capacity: usize,
    pub buffered_clips: usize,
    pub percentage_used: u32,
    pub archived_clips: usize,
    /// Capture footage on disk for the current session.
    pub capture_buffer_bytes: u64,
    /// Same, rounded to whole megabytes.
    pub used_buffer_size: u64,
    pub pause_resume_log: Vec<TransitionRecord>,
}

/// Why one camera contributed no clip to a segment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFailure {
    pub camera: CameraId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub ball: u32,
    pub ball_label: String,
    pub segment: Option<Segment>,
    pub clips: Vec<Clip>,
    pub failures: Vec<CameraFailure>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectOutcome {
    pub clip: Clip,
    pub status: SessionStatus,
}

/// What a mark decided before any extraction starts.
struct MarkPlan {
    ball: u32,
    label: String,
    at: f64,
    segment: Option<Segment>,
    session_label: String,
}

struct Inner {
    state: RecordingState,
    session: Option<Session>,
    timeline: TimelineTracker,
    buffer: RollingBuffer,
}

pub struct SessionController {
    settings: ControllerSettings,
    capture: Arc<dyn CaptureSource>,
    extractor: Arc<dyn ClipExtractor>,
    uploader: Arc<dyn UploadSink>,
    gate: tokio::sync::Mutex<()>,
    state: Mutex<Inner>,
}

impl SessionController {
    pub fn new(
        settings: ControllerSettings,
        capture: Arc<dyn CaptureSource>,
        extractor: Arc<dyn ClipExtractor>,
        uploader: Arc<dyn UploadSink>,
    ) -> Self {
        let buffer = RollingBuffer::new(settings.buffer_capacity);
        SessionController {
            settings,
            capture,
            extractor,
            uploader,
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(Inner {
                state: RecordingState::Idle,
                session: None,
                timeline: TimelineTracker::new(),
                buffer,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub async fn start(&self, session_label: &str) -> Result<SessionStatus, ReplayError> {
        let _gate = self.gate.lock().await;
        if self.with_state(|inner| inner.state == RecordingState::Recording) {
            return Err(ReplayError::AlreadyRecording);
        }
        let label = validate_label(session_label)?;

        let ack = self
            .capture
            .start_capture(&self.settings.cameras, &label)
            .await?;
        for camera in &ack.missing {
            warn!(
                "{}",
                ReplayError::CaptureUnavailable(format!("{} is not recording", camera))
            );
        }

        let capacity = self.settings.buffer_capacity;
        self.with_state(|inner| {
            inner.timeline.reset();
            inner.buffer.reset(capacity);
            inner.session = Some(Session::new(label.clone(), ack.confirmed));
            inner.state = RecordingState::Recording;
        });

        info!("Recording started for {}", label);
        Ok(self.snapshot().await)
    }

    pub async fn stop(&self) -> Result<SessionStatus, ReplayError> {
        let _gate = self.gate.lock().await;
        if self.with_state(|inner| inner.state != RecordingState::Recording) {
            return Err(ReplayError::NotRecording);
        }

        let ack = self.capture.stop_capture().await?;
        if !ack.missing.is_empty() {
            info!("Captures already gone at stop: {:?}", ack.missing);
        }
        self.with_state(|inner| inner.state = RecordingState::Idle);

        info!("Recording stopped");
        Ok(self.snapshot().await)
    }

    pub async fn pause(&self) -> Result<SessionStatus, ReplayError> {
        self.apply_manual(EventKind::Pause).await
    }

    pub async fn resume(&self) -> Result<SessionStatus, ReplayError> {
        self.apply_manual(EventKind::Resume).await
    }

    async fn apply_manual(&self, kind: EventKind) -> Result<SessionStatus, ReplayError> {
        let _gate = self.gate.lock().await;
        self.with_state(|inner| {
            let at = active_session(inner.state, &inner.session)?.elapsed();
            let applied = inner.timeline.apply(at, kind);
            info!("{:?} at {:.3}s, recording={}", kind, at, applied.recording);
            Ok::<_, ReplayError>(())
        })?;
        Ok(self.snapshot().await)
    }

    /// Marks the end of a ball. Every mark after the first closes a segment
    /// and extracts it from every camera concurrently; a camera that fails
    /// simply contributes no clip.
    pub async fn mark_ball(&self) -> Result<MarkOutcome, ReplayError> {
        let _gate = self.gate.lock().await;
        let plan = self.with_state(|inner| self.plan_mark(inner))?;

        let mut clips = Vec::new();
        let mut failures = Vec::new();
        if let Some(segment) = plan.segment {
            info!("Ball {} ({}) closes segment {}", plan.ball, plan.label, segment);
            for (camera, result) in self.extract_all(segment, &plan.session_label, &plan.label).await {
                match result {
                    Ok(clip) => clips.push(clip),
                    Err(err) => {
                        warn!("Failed to create {} clip: {}", camera, err);
                        failures.push(CameraFailure {
                            camera,
                            reason: err.to_string(),
                        });
                    }
                }
            }
            self.with_state(|inner| {
                for clip in &clips {
                    inner.buffer.admit(clip.clone());
                }
            });
        } else {
            info!(
                "Ball {} ({}) sets the first checkpoint at {:.3}s",
                plan.ball, plan.label, plan.at
            );
        }

        Ok(MarkOutcome {
            ball: plan.ball,
            ball_label: plan.label,
            segment: plan.segment,
            clips,
            failures,
            status: self.snapshot().await,
        })
    }

    fn plan_mark(&self, inner: &mut Inner) -> Result<MarkPlan, ReplayError> {
        let Inner {
            state,
            session,
            timeline,
            ..
        } = inner;
        let session = match (*state, session.as_mut()) {
            (RecordingState::Recording, Some(session)) => session,
            _ => return Err(ReplayError::NotRecording),
        };

        session.ball_count += 1;
        let at = session.elapsed();
        let applied = timeline.apply(at, EventKind::Mark);
        session.last_mark_offset = at;
        Ok(MarkPlan {
            ball: session.ball_count,
            label: ball_label(session.ball_count, self.settings.max_ball_index),
            at,
            segment: applied.segment,
            session_label: session.label.clone(),
        })
    }

    /// Fans one extraction per camera out onto the runtime and joins them
    /// all, in completion order, each bounded by a duration-scaled timeout.
    async fn extract_all(
        &self,
        segment: Segment,
        session_label: &str,
        ball_label: &str,
    ) -> Vec<(CameraId, Result<Clip, ReplayError>)> {
        let limit = self.settings.extraction_timeout(segment.duration());
        let mut tasks = JoinSet::new();

        for camera in &self.settings.cameras {
            let extractor = Arc::clone(&self.extractor);
            let request = ClipRequest {
                segment,
                camera: camera.id.clone(),
                session_label: session_label.to_string(),
                ball_label: ball_label.to_string(),
            };
            tasks.spawn(async move {
                let result = match tokio::time::timeout(limit, extractor.extract(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ReplayError::extraction(
                        &request.camera,
                        format!("timed out after {:?}", limit),
                    )),
                };
                (request.camera, result)
            });
        }

        let mut outcomes = Vec::with_capacity(self.settings.cameras.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!("Extraction task aborted: {}", err),
            }
        }
        outcomes
    }

    /// Uploads a buffered clip and moves it into the archive. Selecting an
    /// archived clip again returns it without re-uploading.
    ///
    /// Marks queue behind an upload in flight, so the clip cannot be evicted
    /// before it is promoted.
    pub async fn select_clip(&self, clip_id: &str) -> Result<SelectOutcome, ReplayError> {
        let _gate = self.gate.lock().await;
        if let Some(archived) = self.with_state(|inner| inner.buffer.find_archived(clip_id).cloned()) {
            return Ok(SelectOutcome {
                clip: archived,
                status: self.snapshot().await,
            });
        }
        let clip = self
            .with_state(|inner| inner.buffer.find_buffered(clip_id).cloned())
            .ok_or_else(|| ReplayError::ClipNotFound(clip_id.to_string()))?;

        let url = self.uploader.upload(&clip).await?;
        let archived = self.with_state(|inner| inner.buffer.promote(clip_id, url))?;
        info!("Archived clip {} for ball {}", archived.id, archived.ball_number);
        Ok(SelectOutcome {
            clip: archived,
            status: self.snapshot().await,
        })
    }

    /// Resolves a clip for playback, buffer first, then archive.
    pub async fn resolve_clip(&self, clip_id: &str) -> Result<Clip, ReplayError> {
        self.with_state(|inner| inner.buffer.find_by_id(clip_id).cloned())
    }

    pub async fn buffered_clips(&self) -> Vec<Clip> {
        self.with_state(|inner| inner.buffer.list_buffered())
    }

    pub async fn archived_clips(&self) -> Vec<Clip> {
        self.with_state(|inner| inner.buffer.list_archived())
    }

    pub async fn status(&self) -> SessionStatus {
        self.snapshot().await
    }

    async fn snapshot(&self) -> SessionStatus {
        let mut status = self.with_state(|inner| self.status_of(inner));
        if let Some(label) = status.match_name.as_deref() {
            let bytes = self.settings.layout.capture_bytes(label).await;
            status.capture_buffer_bytes = bytes;
            status.used_buffer_size = (bytes as f64 / BYTES_PER_MB).round() as u64;
        }
        status
    }

    fn status_of(&self, inner: &Inner) -> SessionStatus {
        let session = inner.session.as_ref();
        let recording = inner.state == RecordingState::Recording;
        let current_ball = session.map(|s| s.ball_count).unwrap_or(0);
        SessionStatus {
            state: inner.state,
            is_recording: recording,
            is_paused: recording && !inner.timeline.is_recording(),
            match_name: session.map(|s| s.label.clone()),
            started_at: session.map(|s| s.started_at),
            current_ball,
            current_ball_label: (current_ball > 0)
                .then(|| ball_label(current_ball, self.settings.max_ball_index)),
            last_mark_offset: session.map(|s| s.last_mark_offset).unwrap_or(0.0),
            active_cameras: session.map(|s| s.cameras.clone()).unwrap_or_default(),
            buffer_capacity: inner.buffer.capacity(),
            buffered_clips: inner.buffer.len(),
            percentage_used: inner.buffer.percentage_used(),
            archived_clips: inner.buffer.archived_len(),
            capture_buffer_bytes: 0,
            used_buffer_size: 0,
            pause_resume_log: inner.timeline.transitions().to_vec(),
        }
    }
}

fn active_session(state: RecordingState, session: &Option<Session>) -> Result<&Session, ReplayError> {
    match (state, session) {
        (RecordingState::Recording, Some(session)) => Ok(session),
        _ => Err(ReplayError::NotRecording),
    }
}

/// Labels name a directory under the buffer and clip roots.
fn validate_label(label: &str) -> Result<String, ReplayError> {
    let label = label.trim();
    if label.is_empty()
        || label == "."
        || label == ".."
        || label.contains(['/', '\\', '\0'])
    {
        return Err(ReplayError::InvalidLabel);
    }
    Ok(label.to_string())
}
