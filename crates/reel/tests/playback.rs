//! End-to-end playback tests over synthetic collaborators.
//!
//! No media files, codecs or devices: the demuxer feeds generated packets,
//! the decoders produce fixed-size output, the texture sink and audio device
//! record what they receive, and time is simulated by passing explicit
//! `Instant`s into `update_at`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use reel::{
    AudioBackend, AudioDecoderBackend, AudioPacket, AudioSink, Demuxer, FramePair, ImageStatus,
    DecodedImage, MediaError, PlaneChannel, Player, StreamInfo, TextureSink, VideoDecoderBackend,
    VideoPacket,
};

fn init_logs() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

struct SyntheticDemuxer {
    info: StreamInfo,
    frames: Vec<FramePair>,
    pos: usize,
}

impl SyntheticDemuxer {
    /// A stream of `count` frames at `fps`; audio packets ride along with
    /// every video frame when the info declares an audio track.
    fn new(info: StreamInfo, count: usize) -> Self {
        let frame = Duration::from_secs_f64(1.0 / info.frame_rate as f64);
        let with_audio = info.channels > 0;
        let frames = (0..count)
            .map(|i| {
                let pts = frame * i as u32;
                FramePair {
                    video: Some(VideoPacket {
                        pts,
                        data: Bytes::from_static(&[0u8; 8]),
                    }),
                    audio: with_audio.then(|| AudioPacket {
                        pts,
                        data: Bytes::from_static(&[0u8; 8]),
                    }),
                }
            })
            .collect();
        Self {
            info,
            frames,
            pos: 0,
        }
    }
}

impl Demuxer for SyntheticDemuxer {
    fn open(&mut self) -> Result<StreamInfo, MediaError> {
        Ok(self.info.clone())
    }

    fn read_frame(&mut self) -> Option<FramePair> {
        let pair = self.frames.get(self.pos).cloned()?;
        self.pos += 1;
        Some(pair)
    }

    fn is_end_of_stream(&self) -> bool {
        self.pos >= self.frames.len()
    }

    fn reset_to_start(&mut self) {
        self.pos = 0;
    }
}

struct StubVideoDecoder {
    width: u32,
    height: u32,
    y: Vec<u8>,
    cb: Vec<u8>,
    cr: Vec<u8>,
    has_frame: bool,
}

impl StubVideoDecoder {
    fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            y: Vec::new(),
            cb: Vec::new(),
            cr: Vec::new(),
            has_frame: false,
        }
    }
}

impl VideoDecoderBackend for StubVideoDecoder {
    fn open(&mut self, info: &StreamInfo, _threads: usize) -> Result<(), MediaError> {
        self.width = info.width;
        self.height = info.height;
        self.y = vec![0; (info.width * info.height) as usize];
        let chroma = ((info.width / 2) * (info.height / 2)) as usize;
        self.cb = vec![0; chroma];
        self.cr = vec![0; chroma];
        Ok(())
    }

    fn decode(&mut self, _packet: &VideoPacket) -> bool {
        self.has_frame = true;
        true
    }

    fn image(&mut self) -> ImageStatus<'_> {
        if !self.has_frame {
            return ImageStatus::NoFrame;
        }
        ImageStatus::Ready(DecodedImage {
            planes: [&self.y, &self.cb, &self.cr],
            strides: [
                self.width as usize,
                (self.width / 2) as usize,
                (self.width / 2) as usize,
            ],
            width: self.width,
            height: self.height,
            chroma_shift: (1, 1),
        })
    }
}

struct StubAudioDecoder {
    channels: usize,
    frames_per_packet: usize,
    open: bool,
}

impl StubAudioDecoder {
    fn new(frames_per_packet: usize) -> Self {
        Self {
            channels: 0,
            frames_per_packet,
            open: false,
        }
    }
}

impl AudioDecoderBackend for StubAudioDecoder {
    fn open(&mut self, info: &StreamInfo) -> Result<(), MediaError> {
        if info.channels > 0 && info.sample_rate > 0 {
            self.channels = info.channels as usize;
            self.open = true;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn max_frame_samples(&self) -> usize {
        self.frames_per_packet
    }

    fn decode_pcm16(&mut self, _packet: &AudioPacket, out: &mut [i16]) -> usize {
        let samples = self.frames_per_packet * self.channels;
        out[..samples].fill(0);
        self.frames_per_packet
    }
}

#[derive(Clone, Default)]
struct RecordingTextureSink {
    uploads: Arc<Mutex<Vec<(PlaneChannel, u32, u32)>>>,
}

impl TextureSink for RecordingTextureSink {
    fn upload_plane(
        &mut self,
        channel: PlaneChannel,
        _data: &[u8],
        _stride: usize,
        width: u32,
        height: u32,
    ) {
        self.uploads.lock().push((channel, width, height));
    }
}

struct MockAudioBackend {
    playing: AtomicBool,
    writes: Mutex<Vec<(usize, usize)>>,
    position: AtomicU32,
    repositions: Mutex<Vec<usize>>,
}

impl MockAudioBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            playing: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            position: AtomicU32::new(0),
            repositions: Mutex::new(Vec::new()),
        })
    }
}

impl AudioBackend for MockAudioBackend {
    fn write_at(&self, offset: usize, data: &[u8]) {
        self.writes.lock().push((offset, data.len()));
    }
    fn play(&self) {
        self.playing.store(true, Ordering::Relaxed);
    }
    fn pause(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }
    fn set_position(&self, offset: usize) {
        self.position.store(offset as u32, Ordering::Relaxed);
        self.repositions.lock().push(offset);
    }
    fn set_volume(&self, _volume: f32) {}
    fn play_cursor(&self) -> Option<usize> {
        Some(self.position.load(Ordering::Relaxed) as usize)
    }
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
}

fn video_only_info(fps: f32) -> StreamInfo {
    StreamInfo {
        width: 64,
        height: 48,
        frame_rate: fps,
        duration: None,
        channels: 0,
        sample_rate: 0,
    }
}

fn load_video_only(frames: usize, fps: f32) -> (Player, RecordingTextureSink) {
    let sink = RecordingTextureSink::default();
    let player = Player::load(
        Box::new(SyntheticDemuxer::new(video_only_info(fps), frames)),
        Box::new(StubVideoDecoder::new()),
        Box::new(StubAudioDecoder::new(0)),
        Box::new(sink.clone()),
        None,
    )
    .unwrap();
    (player, sink)
}

#[test]
fn load_uploads_a_preview_frame() {
    init_logs();
    let (player, sink) = load_video_only(10, 10.0);
    let uploads = sink.uploads.lock();
    assert_eq!(
        uploads.as_slice(),
        &[
            (PlaneChannel::Y, 64, 48),
            (PlaneChannel::Cb, 32, 24),
            (PlaneChannel::Cr, 32, 24),
        ]
    );
    assert!(player.is_ready());
    assert!(!player.is_playing());
}

#[test]
fn needs_frame_is_true_with_nothing_queued() {
    init_logs();
    let (player, _sink) = load_video_only(10, 10.0);
    assert!(player.needs_frame());
}

#[test]
fn frames_present_as_the_clock_reaches_them() {
    init_logs();
    let (mut player, sink) = load_video_only(10, 10.0);
    let base = Instant::now();

    assert!(player.update_at(base));
    // First tick presents the frame at pts 0 only.
    assert_eq!(player.current_frame(), 1);
    assert_eq!(player.video_time(), Duration::ZERO);

    assert!(player.update_at(base + Duration::from_millis(250)));
    assert_eq!(player.current_frame(), 3);
    assert_eq!(player.video_time(), Duration::from_millis(200));

    // Preview plus three presented frames, three planes each.
    assert_eq!(sink.uploads.lock().len(), 12);
}

#[test]
fn looping_restarts_at_end_of_stream() {
    init_logs();
    // Ten frames at 10 fps is a one second stream; 2.5 seconds of ticks
    // must wrap around at least once.
    let (mut player, _sink) = load_video_only(10, 10.0);
    player.set_looping(true);
    let base = Instant::now();

    let mut max_frame = 0;
    let mut wrapped = false;
    for i in 0..50 {
        assert!(player.update_at(base + Duration::from_millis(50 * i)));
        if player.current_frame() < max_frame {
            wrapped = true;
        }
        max_frame = max_frame.max(player.current_frame());
    }

    assert!(wrapped, "frame counter never reset");
    assert!(player.video_time() < Duration::from_secs(1));
    assert!(player.is_playing());
    assert!(!player.is_finished());
}

#[test]
fn non_looping_playback_finishes_once() {
    init_logs();
    let (mut player, _sink) = load_video_only(5, 10.0);
    let base = Instant::now();

    let mut active = true;
    for i in 0..30 {
        active = player.update_at(base + Duration::from_millis(50 * i));
        if !active {
            break;
        }
    }
    assert!(!active);
    assert!(player.is_finished());
    assert_eq!(player.current_frame(), 5);
    // Further updates stay inert.
    assert!(!player.update_at(base + Duration::from_secs(10)));
}

#[test]
fn stopped_player_ignores_updates() {
    init_logs();
    let (mut player, sink) = load_video_only(10, 10.0);
    let base = Instant::now();
    player.update_at(base);
    player.update_at(base + Duration::from_millis(150));

    player.stop();
    let frame = player.current_frame();
    let video_time = player.video_time();
    let uploads = sink.uploads.lock().len();

    assert!(!player.update_at(base + Duration::from_secs(3)));
    assert_eq!(player.current_frame(), frame);
    assert_eq!(player.video_time(), video_time);
    assert_eq!(sink.uploads.lock().len(), uploads);
    assert!(!player.is_playing());

    // stop is idempotent
    player.stop();
    assert!(!player.update_at(base + Duration::from_secs(4)));
}

#[test]
fn pause_freezes_position_and_resume_rearms_the_clock() {
    init_logs();
    let (mut player, _sink) = load_video_only(10, 10.0);
    let base = Instant::now();
    player.update_at(base);
    player.update_at(base + Duration::from_millis(200));
    assert_eq!(player.current_frame(), 3);

    let pause_at = base + Duration::from_millis(200);
    player.set_paused_at(true, pause_at);
    assert!(player.is_paused());

    // A long paused gap changes nothing.
    assert!(player.update_at(pause_at + Duration::from_secs(5)));
    assert_eq!(player.current_frame(), 3);
    assert_eq!(player.video_time(), Duration::from_millis(200));

    // Resume rebases the tick origin: only post-resume time advances the
    // clock, so no frame is due 50ms after the resume point.
    let resume_at = pause_at + Duration::from_secs(5);
    player.set_paused_at(false, resume_at);
    assert!(player.update_at(resume_at + Duration::from_millis(50)));
    assert_eq!(player.current_frame(), 3);
    assert_eq!(player.video_time(), Duration::from_millis(200));

    // The next frame arrives on schedule.
    assert!(player.update_at(resume_at + Duration::from_millis(100)));
    assert_eq!(player.current_frame(), 4);
}

#[test]
fn audio_writes_stay_frame_aligned_across_wraparound() {
    init_logs();
    // 48kHz stereo S16: block align 4, ring capacity 192000 bytes. Each
    // packet decodes to 441 sample frames (1764 bytes), so filling past one
    // second of ticks forces the ring to wrap.
    let info = StreamInfo {
        width: 64,
        height: 48,
        frame_rate: 30.0,
        duration: None,
        channels: 2,
        sample_rate: 48_000,
    };
    let device = MockAudioBackend::new();
    let mut player = Player::load(
        Box::new(SyntheticDemuxer::new(info, 150)),
        Box::new(StubVideoDecoder::new()),
        Box::new(StubAudioDecoder::new(441)),
        Box::new(RecordingTextureSink::default()),
        Some(AudioSink::Push(device.clone())),
    )
    .unwrap();
    assert!(player.has_audio());

    let base = Instant::now();
    for i in 0..150 {
        if !player.update_at(base + Duration::from_millis(33 * i)) {
            break;
        }
    }

    let writes = device.writes.lock();
    assert!(!writes.is_empty());
    let block_align = 4usize;
    for &(offset, len) in writes.iter() {
        assert_eq!(offset % block_align, 0, "write offset {offset} misaligned");
        assert_eq!(len % block_align, 0, "write length {len} misaligned");
    }

    // Total PCM exceeds the ring, so at least one non-initial chunk landed
    // back at offset zero.
    let total: usize = writes.iter().map(|&(_, len)| len).sum();
    assert!(total > 192_000, "stream too short to wrap: {total}");
    assert!(writes[1..].iter().any(|&(offset, _)| offset == 0));
}

#[test]
fn looping_with_audio_rewinds_the_device() {
    init_logs();
    // 8kHz mono S16: ring capacity 16000 bytes, 320 bytes per packet, so a
    // one second stream never fills the ring and every pass writes from
    // offset zero upward.
    let info = StreamInfo {
        width: 64,
        height: 48,
        frame_rate: 10.0,
        duration: None,
        channels: 1,
        sample_rate: 8_000,
    };
    let device = MockAudioBackend::new();
    let mut player = Player::load(
        Box::new(SyntheticDemuxer::new(info, 10)),
        Box::new(StubVideoDecoder::new()),
        Box::new(StubAudioDecoder::new(160)),
        Box::new(RecordingTextureSink::default()),
        Some(AudioSink::Push(device.clone())),
    )
    .unwrap();
    player.set_looping(true);

    let base = Instant::now();
    let mut max_frame = 0;
    let mut wrapped = false;
    for i in 0..50 {
        assert!(player.update_at(base + Duration::from_millis(50 * i)));
        if player.current_frame() < max_frame {
            wrapped = true;
        }
        max_frame = max_frame.max(player.current_frame());
    }
    assert!(wrapped, "frame counter never reset");

    // Every restart moves the device back to offset zero and the next pass
    // of ring writes begins there again.
    let repositions = device.repositions.lock();
    assert!(repositions.len() >= 2);
    assert!(repositions.iter().all(|&offset| offset == 0));
    let writes = device.writes.lock();
    let restarts = writes.iter().filter(|&&(offset, _)| offset == 0).count();
    assert!(restarts >= 2, "writes never returned to offset zero");
}

#[test]
fn no_audio_clock_rolls_back_instead_of_skipping_ahead() {
    init_logs();
    // One giant tick gap: the clock lands far past the queue head, and the
    // rollback keeps playback near the last shown frame instead of burning
    // through the whole stream.
    let (mut player, _sink) = load_video_only(100, 10.0);
    let base = Instant::now();
    player.update_at(base);
    player.update_at(base + Duration::from_millis(200));
    assert_eq!(player.current_frame(), 3);

    assert!(player.update_at(base + Duration::from_secs(8)));
    assert!(
        player.current_frame() < 10,
        "clock jumped the gap: {} frames presented",
        player.current_frame()
    );
}
