use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator events applied to the timeline, in the order they were issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mark,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Pause,
    Resume,
}

/// A pause or resume recorded at an offset (seconds since session start).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub time: f64,
    pub action: Transition,
}

/// Half-open interval `[start, end)` in seconds since session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(start: f64, end: f64) -> Self {
        Segment { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Rejects negative offsets and empty or inverted windows.
    pub fn validate(&self) -> Result<(), String> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(format!("segment {} has non-finite bounds", self));
        }
        if self.start < 0.0 {
            return Err(format!("segment {} starts before the recording", self));
        }
        if self.end <= self.start {
            return Err(format!("segment {} has no duration", self));
        }
        Ok(())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3})", self.start, self.end)
    }
}

/// Result of applying a single event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    pub segment: Option<Segment>,
    pub recording: bool,
}

/// Pause/resume state machine for one recording session.
///
/// Every `Mark` after the first closes a segment from the previous
/// checkpoint. While recording, the segment boundary is bracketed by an
/// implicit pause/resume pair; while paused, nothing is synthesized.
#[derive(Debug, Clone)]
pub struct TimelineTracker {
    recording: bool,
    checkpoint: Option<f64>,
    transitions: Vec<TransitionRecord>,
}

impl TimelineTracker {
    pub fn new() -> Self {
        TimelineTracker {
            recording: true,
            checkpoint: None,
            transitions: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = TimelineTracker::new();
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn checkpoint(&self) -> Option<f64> {
        self.checkpoint
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn apply(&mut self, time: f64, kind: EventKind) -> Applied {
        let segment = match kind {
            EventKind::Pause => {
                if self.recording {
                    self.push(time, Transition::Pause);
                    self.recording = false;
                }
                None
            }
            EventKind::Resume => {
                if !self.recording {
                    self.push(time, Transition::Resume);
                    self.recording = true;
                }
                None
            }
            EventKind::Mark => self.mark(time),
        };

        Applied {
            segment,
            recording: self.recording,
        }
    }

    fn mark(&mut self, time: f64) -> Option<Segment> {
        let segment = self.checkpoint.map(|start| Segment::new(start, time));
        if segment.is_some() && self.recording {
            self.push(time, Transition::Pause);
            self.push(time, Transition::Resume);
        }
        self.checkpoint = Some(time);
        segment
    }

    fn push(&mut self, time: f64, action: Transition) {
        self.transitions.push(TransitionRecord { time, action });
    }
}

impl Default for TimelineTracker {
    fn default() -> Self {
        Self::new()
    }
}
