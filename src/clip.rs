use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::timeline::Segment;

pub const BALLS_PER_OVER: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        CameraId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configured camera feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub id: CameraId,
    pub url: String,
}

impl FromStr for Camera {
    type Err = String;

    /// Parses `id=url`, e.g. `cam1=http://10.0.0.5:8080/video`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, url) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <id>=<url>, got '{}'", s))?;
        let id = id.trim();
        let url = url.trim();
        if id.is_empty() || url.is_empty() {
            return Err(format!("camera id and url must be non-empty in '{}'", s));
        }
        if id.contains(['/', '\\', '.']) {
            return Err(format!("camera id '{}' must be a plain name", id));
        }
        Ok(Camera {
            id: CameraId::new(id),
            url: url.to_string(),
        })
    }
}

/// Over.ball label for a 1-based ball count, e.g. ball 7 is "1.1".
///
/// Counts past `max_ball_index` collapse to the final over number.
pub fn ball_label(ball: u32, max_ball_index: u32) -> String {
    if ball == 0 {
        return "0.0".to_string();
    }
    if ball <= max_ball_index {
        let over = (ball - 1) / BALLS_PER_OVER;
        let ball_in_over = (ball - 1) % BALLS_PER_OVER + 1;
        format!("{}.{}", over, ball_in_over)
    } else {
        (max_ball_index / BALLS_PER_OVER).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadState {
    NotUploaded,
    Uploaded,
}

/// One extracted clip for one camera covering one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub filename: String,
    pub local_path: PathBuf,
    pub ball_number: String,
    pub camera: CameraId,
    pub segment: Segment,
    pub duration: f64,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    pub upload_state: UploadState,
    pub s3_url: Option<String>,
}

impl Clip {
    pub fn is_uploaded(&self) -> bool {
        self.upload_state == UploadState::Uploaded
    }

    pub fn mark_uploaded(&mut self, url: String) {
        self.upload_state = UploadState::Uploaded;
        self.s3_url = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ball_labels_follow_overs() {
        assert_eq!(ball_label(1, 120), "0.1");
        assert_eq!(ball_label(6, 120), "0.6");
        assert_eq!(ball_label(7, 120), "1.1");
        assert_eq!(ball_label(120, 120), "19.6");
    }

    #[test]
    fn ball_label_caps_at_max_index() {
        assert_eq!(ball_label(121, 120), "20");
        assert_eq!(ball_label(500, 120), "20");
        assert_eq!(ball_label(31, 30), "5");
    }

    #[test]
    fn parses_camera_pairs() {
        let camera: Camera = "cam1=http://172.16.0.4:8080/video".parse().unwrap();
        assert_eq!(camera.id.as_str(), "cam1");
        assert_eq!(camera.url, "http://172.16.0.4:8080/video");

        assert!("cam1".parse::<Camera>().is_err());
        assert!("=http://x".parse::<Camera>().is_err());
        assert!("../cam=http://x".parse::<Camera>().is_err());
    }
}
