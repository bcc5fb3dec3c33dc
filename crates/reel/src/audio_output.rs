//! Audio device layer: backend traits, the callback mixer, the ring-buffer
//! writer, and the stall watchdog.
//!
//! Two device shapes are supported. A push backend exposes a device-side
//! ring the engine copies PCM into at explicit offsets and reports a play
//! cursor back. A pull backend runs its own callback and drains the engine's
//! ring through an [`AudioMixer`]. Either way the engine remains the single
//! writer; the device side only ever reads.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, warn};

use crate::audio_ring::{AudioFormat, AudioRing, WriteOutcome};
use crate::media::MediaError;

/// How long the device may keep playing without a fresh ring write before
/// the watchdog pauses it.
const FREEZE_WINDOW: Duration = Duration::from_millis(125);

/// Watchdog poll interval; also bounds cancellation latency.
const WATCHDOG_POLL: Duration = Duration::from_millis(50);

/// Push-style device: the engine copies PCM into the device's buffer at ring
/// offsets and the device reports playback progress through a cursor.
pub trait AudioBackend: Send + Sync {
    /// Copies one physical chunk into the device buffer at `offset`.
    fn write_at(&self, offset: usize, data: &[u8]);
    fn play(&self);
    fn pause(&self);
    /// Moves the device's play position to a ring offset.
    fn set_position(&self, offset: usize);
    /// Volume in 0..=1; the device applies its own loudness curve.
    fn set_volume(&self, volume: f32);
    /// Current play position in the device buffer, if the device exposes one.
    fn play_cursor(&self) -> Option<usize>;
    fn is_playing(&self) -> bool;
}

/// Pull-style device: owns a callback thread that drains an [`AudioMixer`].
///
/// Not `Send`: device stream handles stay on the host thread (the watchdog
/// reaches the callback through the mixer's shared flags instead).
pub trait PullAudioBackend {
    /// Builds the output stream for `format` and starts the callback.
    fn start(&mut self, mixer: AudioMixer, format: AudioFormat) -> Result<(), MediaError>;
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
}

/// Device configuration chosen at load time.
pub enum AudioSink {
    Push(Arc<dyn AudioBackend>),
    Pull(Box<dyn PullAudioBackend>),
}

/// Clonable handle the pull callback drains PCM through.
///
/// Applies software volume and substitutes silence while paused or when the
/// ring runs dry. Everything it touches is lock-free or behind the ring's
/// own mutex, so it is safe in a realtime callback context.
pub struct AudioMixer {
    ring: Arc<AudioRing>,
    volume_bits: Arc<AtomicU32>,
    playing: Arc<AtomicBool>,
    scratch: Vec<u8>,
}

impl Clone for AudioMixer {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            volume_bits: Arc::clone(&self.volume_bits),
            playing: Arc::clone(&self.playing),
            scratch: Vec::new(),
        }
    }
}

impl AudioMixer {
    fn new(ring: Arc<AudioRing>) -> Self {
        Self {
            ring,
            volume_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            playing: Arc::new(AtomicBool::new(false)),
            scratch: Vec::new(),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Fills `out` with the next samples: ring contents scaled by the
    /// software volume, silence for whatever the ring cannot supply.
    pub fn mix_into(&mut self, out: &mut [i16]) {
        if !self.is_playing() {
            out.fill(0);
            return;
        }
        let wanted = out.len() * 2;
        self.scratch.resize(wanted, 0);
        let got = self.ring.read_into(&mut self.scratch[..wanted]);
        let volume = self.volume();
        let samples = got / 2;
        for (i, sample) in out.iter_mut().take(samples).enumerate() {
            let raw = i16::from_ne_bytes([self.scratch[i * 2], self.scratch[i * 2 + 1]]);
            *sample = (raw as f32 * volume) as i16;
        }
        out[samples..].fill(0);
    }
}

enum SinkState {
    Push {
        backend: Arc<dyn AudioBackend>,
        last_cursor: Option<usize>,
    },
    Pull {
        backend: Box<dyn PullAudioBackend>,
        mixer: AudioMixer,
    },
}

/// The engine-side half of the audio device: single writer in front of the
/// ring, fill reconciliation, and underrun recovery.
pub struct AudioOutput {
    ring: Arc<AudioRing>,
    sink: SinkState,
    watchdog: Option<StallWatchdog>,
    pcm_bytes: Vec<u8>,
    shut_down: bool,
}

impl AudioOutput {
    /// Opens the output for `format` over the given device. Device failures
    /// surface as [`MediaError::DeviceFailed`]; the caller degrades the
    /// session to video-only.
    pub fn open(format: AudioFormat, sink: AudioSink) -> Result<Self, MediaError> {
        let ring = Arc::new(AudioRing::open(format));
        let (sink, target) = match sink {
            AudioSink::Push(backend) => {
                let target = WatchdogTarget::Push(Arc::clone(&backend));
                (
                    SinkState::Push {
                        backend,
                        last_cursor: None,
                    },
                    target,
                )
            }
            AudioSink::Pull(mut backend) => {
                let mixer = AudioMixer::new(Arc::clone(&ring));
                backend.start(mixer.clone(), format)?;
                let target = WatchdogTarget::Pull(mixer.clone());
                (SinkState::Pull { backend, mixer }, target)
            }
        };
        let watchdog = StallWatchdog::spawn(Arc::clone(&ring), target);
        debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            capacity = ring.capacity(),
            "audio output opened"
        );
        Ok(Self {
            ring,
            sink,
            watchdog: Some(watchdog),
            pcm_bytes: Vec::new(),
            shut_down: false,
        })
    }

    /// Writes interleaved S16 PCM into the ring, mirroring each physical
    /// chunk into a push device at the same offsets.
    pub fn write(&mut self, pcm: &[i16]) -> WriteOutcome {
        self.pcm_bytes.clear();
        self.pcm_bytes.reserve(pcm.len() * 2);
        for sample in pcm {
            self.pcm_bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        match &mut self.sink {
            SinkState::Push { backend, .. } => self
                .ring
                .write(&self.pcm_bytes, |offset, chunk| backend.write_at(offset, chunk)),
            SinkState::Pull { .. } => self.ring.write(&self.pcm_bytes, |_, _| {}),
        }
    }

    /// Updates the fill level from playback progress: play-cursor delta when
    /// the device reports one, elapsed-time decay otherwise. Pull devices
    /// drain the ring exactly through the mixer, so nothing is estimated.
    pub fn reconcile(&mut self, elapsed: Duration) {
        match &mut self.sink {
            SinkState::Push {
                backend,
                last_cursor,
            } => {
                if !backend.is_playing() {
                    return;
                }
                match backend.play_cursor() {
                    Some(cursor) => {
                        let capacity = self.ring.capacity();
                        if capacity > 0 {
                            if let Some(prev) = *last_cursor {
                                let played = (cursor + capacity - prev) % capacity;
                                self.ring.consume(played);
                            }
                        }
                        *last_cursor = Some(cursor);
                    }
                    None => self.ring.account_elapsed(elapsed),
                }
            }
            SinkState::Pull { .. } => {}
        }
    }

    pub fn needs_refill(&self) -> bool {
        self.ring.needs_refill()
    }

    pub fn write_offset(&self) -> usize {
        self.ring.write_offset()
    }

    pub fn is_playing(&self) -> bool {
        match &self.sink {
            SinkState::Push { backend, .. } => backend.is_playing(),
            SinkState::Pull { mixer, .. } => mixer.is_playing(),
        }
    }

    /// Resumes the device if it is not running. After a stall the device's
    /// position is re-seated at the write offset so playback continues with
    /// the freshest data instead of replaying the stale region.
    pub fn ensure_playing(&mut self) {
        match &mut self.sink {
            SinkState::Push {
                backend,
                last_cursor,
            } => {
                if !backend.is_playing() {
                    let offset = self.ring.write_offset();
                    backend.set_position(offset);
                    *last_cursor = Some(offset);
                    backend.play();
                }
            }
            SinkState::Pull { backend, mixer } => {
                if !mixer.is_playing() {
                    backend.play();
                    mixer.set_playing(true);
                }
            }
        }
    }

    /// Pauses the device without discarding buffered audio.
    pub fn halt(&mut self) {
        match &mut self.sink {
            SinkState::Push { backend, .. } => backend.pause(),
            SinkState::Pull { backend, mixer } => {
                mixer.set_playing(false);
                backend.pause();
            }
        }
    }

    /// Restart protocol: clears the ring and moves the device back to
    /// offset zero.
    pub fn rewind(&mut self) {
        self.ring.reset();
        match &mut self.sink {
            SinkState::Push {
                backend,
                last_cursor,
            } => {
                backend.set_position(0);
                *last_cursor = Some(0);
            }
            SinkState::Pull { .. } => {}
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        match &mut self.sink {
            SinkState::Push { backend, .. } => backend.set_volume(volume),
            SinkState::Pull { mixer, .. } => mixer.set_volume(volume),
        }
    }

    /// Stops the device and joins the watchdog. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.cancel_and_join();
        }
        match &mut self.sink {
            SinkState::Push { backend, .. } => backend.pause(),
            SinkState::Pull { backend, mixer } => {
                mixer.set_playing(false);
                backend.stop();
            }
        }
        debug!("audio output shut down");
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum WatchdogTarget {
    Push(Arc<dyn AudioBackend>),
    Pull(AudioMixer),
}

impl WatchdogTarget {
    fn is_playing(&self) -> bool {
        match self {
            WatchdogTarget::Push(backend) => backend.is_playing(),
            WatchdogTarget::Pull(mixer) => mixer.is_playing(),
        }
    }

    fn pause(&self) {
        match self {
            WatchdogTarget::Push(backend) => backend.pause(),
            WatchdogTarget::Pull(mixer) => mixer.set_playing(false),
        }
    }
}

/// Pauses the device when the host stops feeding the ring.
///
/// The host tick both writes audio and pumps frames; if ticks stop arriving
/// (window hidden, app stalled) the device would otherwise loop over stale
/// ring contents. The watchdog polls write liveness and pauses the device
/// once the freeze window passes without a write.
struct StallWatchdog {
    cancel: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StallWatchdog {
    fn spawn(ring: Arc<AudioRing>, target: WatchdogTarget) -> Self {
        let (cancel, cancelled) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("audio-stall-watchdog".into())
            .spawn(move || loop {
                match cancelled.recv_timeout(WATCHDOG_POLL) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if target.is_playing() && ring.last_write_elapsed() > FREEZE_WINDOW {
                            warn!("no audio writes within freeze window, pausing device");
                            target.pause();
                        }
                    }
                }
            })
            .ok();
        Self { cancel, handle }
    }

    fn cancel_and_join(&mut self) {
        let _ = self.cancel.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StallWatchdog {
    fn drop(&mut self) {
        self.cancel_and_join();
    }
}
