//! The playback engine: frame pump, presentation drain, and lifecycle.
//!
//! A [`Player`] owns the demuxer, both decoders, the texture sink and the
//! audio output, and is driven entirely from the host's tick via
//! [`Player::update_at`]. Each tick advances the clock, keeps the audio ring
//! fed, pulls frames from the demuxer as the clock approaches the buffered
//! tail, and presents every queued frame whose timestamp the clock has
//! reached.

use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::audio_output::{AudioOutput, AudioSink};
use crate::audio_ring::AudioFormat;
use crate::clock::PlaybackClock;
use crate::frame_queue::FrameQueue;
use crate::media::{
    AudioDecoderBackend, DecodedImage, Demuxer, ImageStatus, MediaError, PlaneChannel, StreamInfo,
    TextureSink, VideoDecoderBackend,
};

/// Demuxer reads attempted while looking for the preview frame at load.
const PREVIEW_READ_LIMIT: usize = 64;

pub struct Player {
    demuxer: Box<dyn Demuxer>,
    video: Box<dyn VideoDecoderBackend>,
    audio: Box<dyn AudioDecoderBackend>,
    texture: Box<dyn TextureSink>,
    output: Option<AudioOutput>,
    queue: FrameQueue,
    clock: PlaybackClock,
    info: StreamInfo,
    pcm: Vec<i16>,
    current_frame: u64,
    volume: f32,
    ready: bool,
    started: bool,
    playing: bool,
    stopped: bool,
    looping: bool,
    ended: bool,
}

impl Player {
    /// Opens a playback session over the given collaborators.
    ///
    /// Demuxer and video-decoder failures are fatal. A missing audio track
    /// degrades silently to video-only; an audio device failure is logged
    /// and degrades the same way. On success a preview frame has been
    /// decoded and uploaded and the demuxer rewound, so the session shows
    /// its first frame before playback starts.
    pub fn load(
        mut demuxer: Box<dyn Demuxer>,
        mut video: Box<dyn VideoDecoderBackend>,
        mut audio: Box<dyn AudioDecoderBackend>,
        mut texture: Box<dyn TextureSink>,
        sink: Option<AudioSink>,
    ) -> Result<Self, MediaError> {
        let info = demuxer.open()?;
        debug!(
            width = info.width,
            height = info.height,
            frame_rate = info.frame_rate,
            channels = info.channels,
            sample_rate = info.sample_rate,
            "stream opened"
        );

        video.open(&info, decode_threads())?;

        if let Err(err) = audio.open(&info) {
            warn!(%err, "audio decoder unavailable, continuing without audio");
        }

        let mut output = None;
        let mut pcm = Vec::new();
        if audio.is_open() {
            pcm = vec![0i16; audio.max_frame_samples() * info.channels as usize];
            if let Some(sink) = sink {
                let format = AudioFormat {
                    sample_rate: info.sample_rate,
                    channels: info.channels,
                    bits_per_sample: 16,
                };
                match AudioOutput::open(format, sink) {
                    Ok(out) => output = Some(out),
                    Err(err) => {
                        error!(%err, "audio device failed, continuing without audio");
                    }
                }
            }
        }

        // Show the first frame before playback starts.
        let mut previewed = false;
        for _ in 0..PREVIEW_READ_LIMIT {
            let Some(pair) = demuxer.read_frame() else {
                break;
            };
            if let Some(packet) = pair.video {
                if video.decode(&packet) {
                    if let ImageStatus::Ready(image) = video.image() {
                        upload_if_supported(texture.as_mut(), &image);
                        previewed = true;
                    }
                }
            }
            if previewed {
                break;
            }
        }
        demuxer.reset_to_start();

        Ok(Self {
            demuxer,
            video,
            audio,
            texture,
            output,
            queue: FrameQueue::new(),
            clock: PlaybackClock::new(Instant::now()),
            info,
            pcm,
            current_frame: 0,
            volume: 1.0,
            ready: true,
            started: false,
            playing: false,
            stopped: false,
            looping: false,
            ended: false,
        })
    }

    /// True when the pump should read more data: nothing is queued, the
    /// buffered tail no longer covers the clock, or the audio ring has
    /// fallen below its refill threshold.
    pub fn needs_frame(&self) -> bool {
        if self.queue.is_empty() {
            return true;
        }
        if self
            .queue
            .tail_pts()
            .is_some_and(|tail| tail <= self.clock.current_time())
        {
            return true;
        }
        self.output.as_ref().is_some_and(|o| o.needs_refill())
    }

    /// Reads demuxer frames until the queue and the audio ring cover the
    /// clock again, or the stream ends.
    ///
    /// Audio packets are decoded and written through to the ring as they
    /// arrive; each audio timestamp re-clamps the clock. A ring write that
    /// wraps the capacity boundary forces one extra read so the region about
    /// to be played is not left half-filled.
    fn pump(&mut self) {
        let mut force_read = false;
        while force_read || self.needs_frame() {
            force_read = false;
            let Some(pair) = self.demuxer.read_frame() else {
                trace!("demuxer exhausted");
                break;
            };
            if let Some(packet) = pair.video {
                self.queue.push(packet);
            }
            let Some(packet) = pair.audio else {
                continue;
            };
            if !self.audio.is_open() || self.output.is_none() {
                continue;
            }
            let frames = self.audio.decode_pcm16(&packet, &mut self.pcm);
            if frames == 0 {
                trace!(pts = ?packet.pts, "audio packet produced no samples, skipping");
                continue;
            }
            if let Some(output) = &mut self.output {
                let samples = frames * self.info.channels as usize;
                let outcome = output.write(&self.pcm[..samples]);
                if outcome.wrapped {
                    force_read = true;
                }
            }
            self.clock.resync_to_audio(packet.pts);
        }
    }

    /// Convenience wrapper over [`Player::update_at`] using the current time.
    pub fn update(&mut self) -> bool {
        self.update_at(Instant::now())
    }

    /// Advances playback to `now`. Returns false once the session is over
    /// (stopped, or ended without looping); true while it remains active,
    /// including while paused.
    pub fn update_at(&mut self, now: Instant) -> bool {
        if !self.ready || self.stopped {
            return false;
        }
        if !self.started {
            self.start_at(now);
        }
        if !self.playing {
            // Paused: clock frozen, nothing moves.
            return true;
        }

        let delta = self.clock.advance(now);
        if let Some(output) = &mut self.output {
            output.reconcile(delta);
        }

        if self.demuxer.is_end_of_stream() && self.queue.is_empty() {
            if self.looping {
                debug!("end of stream, looping");
                self.restart_at(now);
                return true;
            }
            debug!("end of stream, finishing");
            self.ended = true;
            self.stop();
            return false;
        }

        // The shown frame is still current and nothing risks underrun.
        if self.clock.current_time() < self.clock.video_time()
            && !self.output.as_ref().is_some_and(|o| o.needs_refill())
        {
            return true;
        }

        if self.demuxer.is_end_of_stream() {
            // No more audio will be written; pause the device before it
            // loops over stale ring contents.
            if let Some(output) = &mut self.output {
                if output.needs_refill() {
                    output.halt();
                }
            }
        } else {
            if let Some(output) = &mut self.output {
                output.ensure_playing();
            }
            self.pump();
        }

        if !self.has_audio() {
            if let Some(head) = self.queue.head_pts() {
                if self
                    .clock
                    .rollback_no_audio(head, self.info.frame_duration())
                {
                    trace!("clock rolled back to cover frame gap");
                }
            }
        }

        while self
            .queue
            .head_pts()
            .is_some_and(|pts| self.clock.should_present(pts))
        {
            let Some(packet) = self.queue.pop() else {
                break;
            };
            if self.video.decode(&packet) {
                match self.video.image() {
                    ImageStatus::Ready(image) => {
                        upload_if_supported(self.texture.as_mut(), &image);
                    }
                    ImageStatus::NotReady | ImageStatus::NoFrame => {
                        trace!(pts = ?packet.pts, "no image for decoded frame");
                    }
                }
            } else {
                warn!(pts = ?packet.pts, "video decode failed, skipping frame");
            }
            self.clock.mark_presented(packet.pts);
            self.current_frame += 1;
        }

        true
    }

    fn start_at(&mut self, now: Instant) {
        self.started = true;
        self.playing = true;
        self.ended = false;
        self.current_frame = 0;
        self.clock.reset(now);
        debug!("playback started");
    }

    /// Starts playback explicitly. The first `update` call starts playback
    /// implicitly, so calling this is optional.
    pub fn start(&mut self) {
        if !self.started && self.ready && !self.stopped {
            self.start_at(Instant::now());
        }
    }

    /// Pauses or resumes playback at `now`. The tick origin is rebased on
    /// resume so the paused interval never advances the clock.
    pub fn set_paused_at(&mut self, paused: bool, now: Instant) {
        if !self.ready || self.stopped || !self.started {
            return;
        }
        if paused == !self.playing {
            return;
        }
        if paused {
            self.playing = false;
            if let Some(output) = &mut self.output {
                output.halt();
            }
            debug!("playback paused");
        } else {
            self.playing = true;
            self.clock.rearm(now);
            if let Some(output) = &mut self.output {
                output.ensure_playing();
            }
            debug!("playback resumed");
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.set_paused_at(paused, Instant::now());
    }

    /// Ends the session and tears down the audio output. Idempotent; a
    /// stopped player cannot be restarted.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.playing = false;
        if let Some(mut output) = self.output.take() {
            output.shutdown();
        }
        debug!("playback stopped");
    }

    /// Rewinds the session to the first frame: demux position, queue,
    /// clock, frame counter, ring and device position all return to zero.
    pub fn restart_at(&mut self, now: Instant) {
        self.demuxer.reset_to_start();
        self.queue.clear();
        self.clock.reset(now);
        self.current_frame = 0;
        self.ended = false;
        if let Some(output) = &mut self.output {
            output.rewind();
        }
        debug!("playback restarted");
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Sets playback volume in 0..=1. The device side applies its own
    /// loudness curve on top of this linear value.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(output) = &mut self.output {
            output.set_volume(self.volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_open() && self.output.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_playing(&self) -> bool {
        self.playing && !self.stopped
    }

    pub fn is_paused(&self) -> bool {
        self.started && !self.playing && !self.stopped
    }

    pub fn is_finished(&self) -> bool {
        self.ended
    }

    /// Frames presented since the last start or restart.
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Stream position the clock has reached.
    pub fn current_time(&self) -> std::time::Duration {
        self.clock.current_time()
    }

    /// Timestamp of the frame currently on screen.
    pub fn video_time(&self) -> std::time::Duration {
        self.clock.video_time()
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        self.info.duration
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bounded video decoder thread count: leave two cores for the host, use at
/// most eight.
fn decode_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.saturating_sub(2).clamp(1, 8)
}

/// Uploads a 4:2:0 image plane by plane; any other layout is skipped.
fn upload_if_supported(texture: &mut dyn TextureSink, image: &DecodedImage<'_>) {
    if !image.is_yuv420() {
        warn!(
            chroma_shift = ?image.chroma_shift,
            "skipping frame with unsupported chroma layout"
        );
        return;
    }
    for (i, channel) in [PlaneChannel::Y, PlaneChannel::Cb, PlaneChannel::Cr]
        .into_iter()
        .enumerate()
    {
        let (width, height) = image.plane_dimensions(channel);
        texture.upload_plane(channel, image.planes[i], image.strides[i], width, height);
    }
}
