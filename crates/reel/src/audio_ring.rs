//! Fixed-capacity PCM byte ring shared between the decode path and the
//! audio device.
//!
//! The ring holds roughly one second of decoded audio. The pump writes at a
//! wrapping cursor, splitting any write that crosses the capacity boundary
//! into a tail chunk and a head chunk; a push-style device mirrors those
//! physical chunks at the same offsets, a pull-style device drains the ring
//! from its callback. Fill level is tracked against either the device's play
//! cursor or elapsed wall time, and drives the pump's refill decisions.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// PCM layout of the ring's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Bytes per sample frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Bytes of PCM per second of playback.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }
}

/// Result of one ring write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes accepted into the ring
    pub written: usize,
    /// True when the write reached the capacity boundary and the cursor
    /// wrapped. The pump treats this as a request for more data right away,
    /// since the freshly wrapped region is about to be played.
    pub wrapped: bool,
}

impl WriteOutcome {
    pub const REFUSED: WriteOutcome = WriteOutcome {
        written: 0,
        wrapped: false,
    };
}

#[derive(Debug)]
struct RingState {
    storage: Vec<u8>,
    write_offset: usize,
    read_offset: usize,
    filled: usize,
    last_write: Instant,
}

/// Byte ring with wraparound splitting and fill accounting.
#[derive(Debug)]
pub struct AudioRing {
    format: AudioFormat,
    capacity: usize,
    refill_threshold: usize,
    inner: Mutex<RingState>,
}

impl AudioRing {
    /// Opens a ring sized to one second of the given format. Capacity and
    /// refill threshold are block-aligned by construction.
    pub fn open(format: AudioFormat) -> Self {
        let capacity = format.bytes_per_second();
        Self {
            format,
            capacity,
            refill_threshold: capacity / 3,
            inner: Mutex::new(RingState {
                storage: vec![0u8; capacity],
                write_offset: 0,
                read_offset: 0,
                filled: 0,
                last_write: Instant::now(),
            }),
        }
    }

    /// A zero-capacity ring that refuses all writes. Stands in for a session
    /// with no audio track or no device.
    pub fn closed() -> Self {
        let format = AudioFormat {
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
        };
        Self {
            format,
            capacity: 0,
            refill_threshold: 0,
            inner: Mutex::new(RingState {
                storage: Vec::new(),
                write_offset: 0,
                read_offset: 0,
                filled: 0,
                last_write: Instant::now(),
            }),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes `data` at the current cursor, splitting at the capacity
    /// boundary. Each physical chunk is reported to `mirror` with its ring
    /// offset after the lock is released, so a push backend can copy it into
    /// the device buffer at the same position.
    ///
    /// A write that exceeds the free space overwrites the oldest unread
    /// bytes; the read cursor is advanced past the clobbered span so a pull
    /// consumer resumes at the oldest byte that survived.
    pub fn write(&self, data: &[u8], mut mirror: impl FnMut(usize, &[u8])) -> WriteOutcome {
        if self.capacity == 0 || data.is_empty() {
            return WriteOutcome::REFUSED;
        }
        debug_assert!(data.len() <= self.capacity, "write larger than ring");
        let len = data.len().min(self.capacity);
        let data = &data[..len];

        let (offset, first_len) = {
            let mut state = self.inner.lock();
            let offset = state.write_offset;
            let first_len = (self.capacity - offset).min(len);
            state.storage[offset..offset + first_len].copy_from_slice(&data[..first_len]);
            let rest = len - first_len;
            if rest > 0 {
                state.storage[..rest].copy_from_slice(&data[first_len..]);
            }
            state.write_offset = (offset + len) % self.capacity;
            let new_filled = state.filled + len;
            if new_filled > self.capacity {
                let clobbered = new_filled - self.capacity;
                state.read_offset = (state.read_offset + clobbered) % self.capacity;
                state.filled = self.capacity;
            } else {
                state.filled = new_filled;
            }
            state.last_write = Instant::now();
            (offset, first_len)
        };

        mirror(offset, &data[..first_len]);
        let wrapped = offset + len >= self.capacity;
        if len > first_len {
            mirror(0, &data[first_len..]);
        }
        WriteOutcome {
            written: len,
            wrapped,
        }
    }

    /// Decrements the fill level by bytes the device reports as played.
    pub fn consume(&self, bytes: usize) {
        let mut state = self.inner.lock();
        state.filled = state.filled.saturating_sub(bytes);
    }

    /// Decrements the fill level by the bytes `dt` of playback would drain.
    /// Approximate fallback for devices that expose no play cursor.
    pub fn account_elapsed(&self, dt: Duration) {
        if self.capacity == 0 {
            return;
        }
        let drained = (dt.as_secs_f64() * self.format.bytes_per_second() as f64) as usize;
        let drained = drained - drained % self.format.block_align().max(1);
        if drained > 0 {
            self.consume(drained);
        }
    }

    /// Drains up to `out.len()` bytes from the read cursor. Returns the
    /// number of bytes copied; the caller fills any remainder with silence.
    pub fn read_into(&self, out: &mut [u8]) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        let mut state = self.inner.lock();
        let n = out.len().min(state.filled);
        let first_len = (self.capacity - state.read_offset).min(n);
        let start = state.read_offset;
        out[..first_len].copy_from_slice(&state.storage[start..start + first_len]);
        let rest = n - first_len;
        if rest > 0 {
            out[first_len..n].copy_from_slice(&state.storage[..rest]);
        }
        state.read_offset = (state.read_offset + n) % self.capacity;
        state.filled -= n;
        n
    }

    /// Bytes currently buffered and unplayed.
    pub fn filled(&self) -> usize {
        self.inner.lock().filled
    }

    /// True when the buffered audio has fallen below the refill threshold.
    pub fn needs_refill(&self) -> bool {
        self.capacity > 0 && self.inner.lock().filled < self.refill_threshold
    }

    pub fn write_offset(&self) -> usize {
        self.inner.lock().write_offset
    }

    /// Clears the ring and rewinds both cursors to zero.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.write_offset = 0;
        state.read_offset = 0;
        state.filled = 0;
        state.storage.fill(0);
    }

    /// Time since the last write, read by the stall watchdog.
    pub fn last_write_elapsed(&self) -> Duration {
        self.inner.lock().last_write.elapsed()
    }
}
