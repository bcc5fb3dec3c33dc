//! Core media types and collaborator traits.
//!
//! This module defines the narrow seams through which the playback engine
//! talks to its external collaborators: the container demuxer, the video and
//! audio decoders, and the texture layer that receives decoded planes. The
//! engine never looks inside a compressed payload or a container; it only
//! moves packets, timestamps and decoded planes between these interfaces.

use std::time::Duration;

use bytes::Bytes;

/// A compressed video frame with its presentation timestamp.
///
/// Timestamps are monotonically non-decreasing within a stream; the demuxer
/// is responsible for that ordering.
#[derive(Debug, Clone)]
pub struct VideoPacket {
    /// Presentation timestamp (when this frame should be displayed)
    pub pts: Duration,
    /// Compressed payload, owned by the packet
    pub data: Bytes,
}

/// A compressed audio frame.
///
/// The timestamp doubles as the sync reference: whenever audio exists, the
/// playback clock is clamped back to the latest audio packet's timestamp if
/// it has drifted ahead of it.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// Presentation timestamp of the first sample in this packet
    pub pts: Duration,
    /// Compressed payload, owned by the packet
    pub data: Bytes,
}

/// One demuxer read: a video frame, an audio frame, both, or neither.
///
/// A `None` field is the container's invalid/sentinel frame and must be
/// discarded without decoding.
#[derive(Debug, Clone, Default)]
pub struct FramePair {
    pub video: Option<VideoPacket>,
    pub audio: Option<AudioPacket>,
}

/// One plane channel of a planar YUV image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneChannel {
    Y,
    Cb,
    Cr,
}

/// A decoded planar image borrowed from the video decoder.
///
/// The borrow ties the image's validity to the decoder: it is only usable
/// between a successful decode call and the next decode or reset, which is
/// exactly the lifetime the underlying codecs guarantee.
#[derive(Debug)]
pub struct DecodedImage<'a> {
    /// Plane data in Y, Cb, Cr order
    pub planes: [&'a [u8]; 3],
    /// Bytes per row for each plane (may include padding)
    pub strides: [usize; 3],
    /// Luma width in pixels
    pub width: u32,
    /// Luma height in pixels
    pub height: u32,
    /// Chroma subsampling shift in (horizontal, vertical) axes.
    /// (1, 1) is 4:2:0 — the only layout the engine presents.
    pub chroma_shift: (u8, u8),
}

impl DecodedImage<'_> {
    /// Returns true if the image is 4:2:0 subsampled.
    pub fn is_yuv420(&self) -> bool {
        self.chroma_shift == (1, 1)
    }

    /// Returns the dimensions of the given plane.
    pub fn plane_dimensions(&self, channel: PlaneChannel) -> (u32, u32) {
        match channel {
            PlaneChannel::Y => (self.width, self.height),
            PlaneChannel::Cb | PlaneChannel::Cr => (
                self.width >> self.chroma_shift.0,
                self.height >> self.chroma_shift.1,
            ),
        }
    }
}

/// Result of asking the video decoder for its current image.
#[derive(Debug)]
pub enum ImageStatus<'a> {
    /// A decoded image is available until the next decode call.
    Ready(DecodedImage<'a>),
    /// The decoder accepted data but has not produced an image yet.
    NotReady,
    /// No frame has been submitted since the last reset.
    NoFrame,
}

/// Stream properties reported by the demuxer at open time.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Declared or estimated frame rate (frames per second)
    pub frame_rate: f32,
    /// Stream duration, if the container declares one
    pub duration: Option<Duration>,
    /// Audio channel count (0 = no audio track)
    pub channels: u16,
    /// Audio sample rate in Hz (0 = no audio track)
    pub sample_rate: u32,
}

impl StreamInfo {
    /// Returns the nominal duration of one video frame.
    pub fn frame_duration(&self) -> Duration {
        if self.frame_rate <= 0.0 || !self.frame_rate.is_finite() {
            return Duration::from_millis(33); // Default to ~30fps
        }
        Duration::from_secs_f64(1.0 / self.frame_rate as f64)
    }

    /// Returns true if the container declared an audio track.
    pub fn has_audio_track(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0
    }
}

/// Errors surfaced by the playback engine.
///
/// Only open-time failures are fatal. Per-frame decode problems are recovered
/// by skipping the frame, and audio device problems degrade the session to
/// video-only playback; neither ever reaches the caller as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaError {
    /// The container could not be opened or parsed
    OpenFailed(String),
    /// The container has no decodable video track
    NoVideoTrack,
    /// Audio device creation or control failed
    DeviceFailed(String),
    /// The stream uses a layout the engine does not handle
    Unsupported(String),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::OpenFailed(msg) => write!(f, "Failed to open media: {msg}"),
            MediaError::NoVideoTrack => write!(f, "No decodable video track"),
            MediaError::DeviceFailed(msg) => write!(f, "Audio device failure: {msg}"),
            MediaError::Unsupported(msg) => write!(f, "Unsupported stream layout: {msg}"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Container demuxer collaborator.
///
/// Extracts interleaved compressed video/audio frames from a multiplexed
/// source. The engine reads strictly forward and rewinds only through
/// [`Demuxer::reset_to_start`].
pub trait Demuxer: Send {
    /// Opens the container and reports stream properties.
    fn open(&mut self) -> Result<StreamInfo, MediaError>;

    /// Reads the next frame pair in demux order.
    ///
    /// Returns `None` once the stream is exhausted. Individual `None` fields
    /// inside the pair are invalid frames to discard without decoding.
    fn read_frame(&mut self) -> Option<FramePair>;

    /// Returns true once the last frame has been read.
    fn is_end_of_stream(&self) -> bool;

    /// Rewinds the demux position to the first frame.
    fn reset_to_start(&mut self);
}

/// Video decoder collaborator.
pub trait VideoDecoderBackend: Send {
    /// Prepares the decoder for the given stream with a bounded thread count.
    fn open(&mut self, info: &StreamInfo, threads: usize) -> Result<(), MediaError>;

    /// Submits one compressed frame. Returns false if the frame was rejected;
    /// rejected frames are skipped, never fatal.
    fn decode(&mut self, packet: &VideoPacket) -> bool;

    /// Returns the most recently decoded image, if any.
    fn image(&mut self) -> ImageStatus<'_>;
}

/// Audio decoder collaborator.
pub trait AudioDecoderBackend: Send {
    /// Prepares the decoder for the stream's audio track, if it has one.
    fn open(&mut self, info: &StreamInfo) -> Result<(), MediaError>;

    /// Returns true if an audio track was opened. When false the session
    /// plays video-only and no PCM is ever requested.
    fn is_open(&self) -> bool;

    /// Upper bound of sample frames a single packet can decode to, used to
    /// size the engine's PCM scratch buffer once at load.
    fn max_frame_samples(&self) -> usize;

    /// Decodes one packet to interleaved signed 16-bit PCM.
    ///
    /// Returns the number of sample *frames* written (one frame = one sample
    /// per channel). Zero means the packet produced no output and should be
    /// skipped.
    fn decode_pcm16(&mut self, packet: &AudioPacket, out: &mut [i16]) -> usize;
}

/// Texture upload collaborator.
///
/// Receives one plane per call, three calls per presented frame. The sink
/// owns the destination surface and performs the per-row copy; `stride` is
/// the source pitch, `width`/`height` are the plane's pixel dimensions
/// (chroma planes arrive at half resolution in each axis).
pub trait TextureSink {
    fn upload_plane(
        &mut self,
        channel: PlaneChannel,
        data: &[u8],
        stride: usize,
        width: u32,
        height: u32,
    );
}
