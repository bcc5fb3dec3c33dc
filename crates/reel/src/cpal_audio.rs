//! cpal-backed pull audio device (feature `cpal-audio`).
//!
//! Builds an i16 output stream at the media's sample rate and channel count
//! and lets the cpal callback drain the [`AudioMixer`]. The OS audio layer
//! resamples to the device's native rate when they differ.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::error;

use crate::audio_output::{AudioMixer, PullAudioBackend};
use crate::audio_ring::AudioFormat;
use crate::media::MediaError;

/// Default output device driven through cpal.
#[derive(Default)]
pub struct CpalBackend {
    stream: Option<cpal::Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PullAudioBackend for CpalBackend {
    fn start(&mut self, mixer: AudioMixer, format: AudioFormat) -> Result<(), MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MediaError::DeviceFailed("no audio output device".into()))?;

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut mixer = mixer;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    mixer.mix_into(data);
                },
                |err| error!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| MediaError::DeviceFailed(e.to_string()))?;
        stream
            .play()
            .map_err(|e| MediaError::DeviceFailed(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn play(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.play() {
                error!(%err, "cpal stream play failed");
            }
        }
    }

    fn pause(&mut self) {
        // pause() may not be supported on all platforms; the mixer's playing
        // flag fills silence either way
        if let Some(stream) = &self.stream {
            let _ = stream.pause();
        }
    }

    fn stop(&mut self) {
        self.stream = None;
    }
}
