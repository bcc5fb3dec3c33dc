//! Synchronized audio/video playback engine.
//!
//! `reel` turns a demuxed, compressed media stream into presented video
//! frames and played audio, keeping the two in sync against wall-clock
//! time. It owns no codecs, containers or rendering: those arrive as
//! collaborator trait objects ([`Demuxer`], [`VideoDecoderBackend`],
//! [`AudioDecoderBackend`], [`TextureSink`], and an audio device behind
//! [`AudioSink`]) and the engine orchestrates them from the host's tick.
//!
//! Typical use: implement the collaborator traits over your codec stack,
//! build a [`Player`] with [`Player::load`], then call [`Player::update`]
//! once per host tick until it returns `false`.

pub mod audio_output;
pub mod audio_ring;
pub mod clock;
#[cfg(feature = "cpal-audio")]
pub mod cpal_audio;
pub mod frame_queue;
pub mod media;
pub mod player;

pub use audio_output::{AudioBackend, AudioMixer, AudioOutput, AudioSink, PullAudioBackend};
pub use audio_ring::{AudioFormat, AudioRing, WriteOutcome};
pub use clock::PlaybackClock;
#[cfg(feature = "cpal-audio")]
pub use cpal_audio::CpalBackend;
pub use frame_queue::FrameQueue;
pub use media::{
    AudioDecoderBackend, AudioPacket, DecodedImage, Demuxer, FramePair, ImageStatus, MediaError,
    PlaneChannel, StreamInfo, TextureSink, VideoDecoderBackend, VideoPacket,
};
pub use player::Player;
