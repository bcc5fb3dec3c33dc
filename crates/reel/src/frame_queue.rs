//! Pending-frame queue between the demuxer and the video decoder.
//!
//! Holds compressed video packets in demux order. The pump appends at the
//! tail as it reads ahead of the clock and the presenter consumes from the
//! head, so the head is always the next frame due for display and the tail
//! timestamp tells the pump how far ahead it has buffered.

use std::collections::VecDeque;
use std::time::Duration;

use crate::media::VideoPacket;

#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<VideoPacket>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    /// Appends a packet at the tail. Timestamps must arrive in
    /// non-decreasing order.
    pub fn push(&mut self, packet: VideoPacket) {
        debug_assert!(
            self.frames.back().map_or(true, |tail| tail.pts <= packet.pts),
            "out-of-order video pts"
        );
        self.frames.push_back(packet);
    }

    /// The oldest queued packet, next due for display.
    pub fn head(&self) -> Option<&VideoPacket> {
        self.frames.front()
    }

    /// Timestamp of the oldest queued packet.
    pub fn head_pts(&self) -> Option<Duration> {
        self.frames.front().map(|p| p.pts)
    }

    /// Timestamp of the newest queued packet.
    pub fn tail_pts(&self) -> Option<Duration> {
        self.frames.back().map(|p| p.pts)
    }

    /// Removes and returns the head packet.
    pub fn pop(&mut self) -> Option<VideoPacket> {
        self.frames.pop_front()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
