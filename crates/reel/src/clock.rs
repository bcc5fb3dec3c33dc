//! Wall-clock presentation timeline.
//!
//! `cur_time` is the stream position playback has reached; `video_time` is
//! the timestamp of the frame currently on screen. The clock runs on host
//! tick deltas and is corrected from the outside: audio timestamps clamp it
//! back when it outruns the decoded audio, and in audio-less sessions it is
//! rolled back whenever it drifts too far past the oldest queued frame.

use std::time::{Duration, Instant};

/// Frames of drift tolerated before an audio-less session rolls the clock
/// back to the presented frame.
const NO_AUDIO_DRIFT_FRAMES: u32 = 6;

#[derive(Debug)]
pub struct PlaybackClock {
    cur_time: Duration,
    video_time: Duration,
    prev_ticks: Instant,
}

impl PlaybackClock {
    pub fn new(now: Instant) -> Self {
        Self {
            cur_time: Duration::ZERO,
            video_time: Duration::ZERO,
            prev_ticks: now,
        }
    }

    /// Advances `cur_time` by the wall time since the previous tick and
    /// returns that delta.
    pub fn advance(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.prev_ticks);
        self.prev_ticks = now;
        self.cur_time += delta;
        delta
    }

    /// Clamps `cur_time` back to an audio packet's timestamp if it has run
    /// ahead of it. Audio is the sync reference whenever it exists.
    pub fn resync_to_audio(&mut self, pts: Duration) {
        if self.cur_time > pts {
            self.cur_time = pts;
        }
    }

    /// Rolls `cur_time` back to just before the presented frame when it has
    /// drifted more than [`NO_AUDIO_DRIFT_FRAMES`] frame durations past the
    /// oldest queued frame. Returns true if a rollback happened. Only called
    /// for sessions without audio.
    pub fn rollback_no_audio(&mut self, head_pts: Duration, frame_duration: Duration) -> bool {
        let limit = head_pts + frame_duration * NO_AUDIO_DRIFT_FRAMES;
        if self.cur_time > limit {
            self.cur_time = self.video_time.saturating_sub(frame_duration);
            true
        } else {
            false
        }
    }

    /// True when the frame at `pts` is due for display.
    pub fn should_present(&self, pts: Duration) -> bool {
        pts <= self.cur_time
    }

    /// Records the timestamp of the frame now on screen.
    pub fn mark_presented(&mut self, pts: Duration) {
        self.video_time = pts;
    }

    /// Rewinds both timeline positions to zero and rebases the tick origin.
    pub fn reset(&mut self, now: Instant) {
        self.cur_time = Duration::ZERO;
        self.video_time = Duration::ZERO;
        self.prev_ticks = now;
    }

    /// Rebases the tick origin without touching the timeline. Called on
    /// unpause so the paused interval does not land in the next delta.
    pub fn rearm(&mut self, now: Instant) {
        self.prev_ticks = now;
    }

    pub fn current_time(&self) -> Duration {
        self.cur_time
    }

    pub fn video_time(&self) -> Duration {
        self.video_time
    }
}
