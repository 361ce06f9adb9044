use log::{info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::clip::Clip;
use crate::error::ReplayError;

/// Bounded, oldest-first working set of recent clips across all cameras,
/// plus the unbounded archive of clips selected for retention.
///
/// Evicted clips have their files removed in the background; a failed
/// removal is logged and the clip is forgotten regardless.
#[derive(Debug)]
pub struct RollingBuffer {
    capacity: usize,
    clips: VecDeque<Clip>,
    archive: Vec<Clip>,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        RollingBuffer {
            capacity,
            clips: VecDeque::with_capacity(capacity + 1),
            archive: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn archived_len(&self) -> usize {
        self.archive.len()
    }

    /// Percentage of capacity in use, rounded.
    pub fn percentage_used(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        ((self.clips.len() as f64 / self.capacity as f64) * 100.0).round() as u32
    }

    /// Appends `clip` and evicts from the front until back within capacity.
    /// Returns whatever was evicted.
    pub fn admit(&mut self, clip: Clip) -> Vec<Clip> {
        self.clips.push_back(clip);
        self.evict_if_over_capacity()
    }

    pub fn evict_if_over_capacity(&mut self) -> Vec<Clip> {
        let mut evicted = Vec::new();
        while self.clips.len() > self.capacity {
            if let Some(oldest) = self.clips.pop_front() {
                info!(
                    "Evicting {} clip for ball {} ({})",
                    oldest.camera, oldest.ball_number, oldest.id
                );
                reclaim(oldest.local_path.clone());
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Drops a clip from the rolling sequence without touching its file.
    pub fn remove(&mut self, clip_id: &str) -> Option<Clip> {
        let index = self.clips.iter().position(|c| c.id == clip_id)?;
        self.clips.remove(index)
    }

    /// Moves a buffered clip into the archive, out of reach of eviction.
    /// Promoting an already archived clip returns it unchanged.
    pub fn promote(&mut self, clip_id: &str, s3_url: String) -> Result<Clip, ReplayError> {
        if let Some(archived) = self.find_archived(clip_id) {
            return Ok(archived.clone());
        }
        let mut clip = self
            .remove(clip_id)
            .ok_or_else(|| ReplayError::ClipNotFound(clip_id.to_string()))?;
        clip.mark_uploaded(s3_url);
        self.archive.push(clip.clone());
        Ok(clip)
    }

    pub fn list_buffered(&self) -> Vec<Clip> {
        self.clips.iter().cloned().collect()
    }

    pub fn list_archived(&self) -> Vec<Clip> {
        self.archive.clone()
    }

    pub fn find_buffered(&self, clip_id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == clip_id)
    }

    pub fn find_archived(&self, clip_id: &str) -> Option<&Clip> {
        self.archive.iter().find(|c| c.id == clip_id)
    }

    /// Resolves a clip, looking in the rolling buffer before the archive.
    pub fn find_by_id(&self, clip_id: &str) -> Result<&Clip, ReplayError> {
        self.find_buffered(clip_id)
            .or_else(|| self.find_archived(clip_id))
            .ok_or_else(|| ReplayError::ClipNotFound(clip_id.to_string()))
    }

    /// Forgets everything, for a new session. Files are left on disk.
    pub fn reset(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.clips.clear();
        self.archive.clear();
    }
}

/// Removes an evicted clip's file without holding up the caller.
fn reclaim(path: PathBuf) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to delete evicted clip {}: {}", path.display(), err);
                }
            });
        }
        Err(_) => {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!("Failed to delete evicted clip {}: {}", path.display(), err);
            }
        }
    }
}
