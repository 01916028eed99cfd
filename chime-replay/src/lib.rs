//! Chime-Replay: real-time playback engine for tracker modules
//!
//! Turns a loaded [`chime_tracker::Module`] into interleaved stereo PCM, one
//! sequencer tick per call. The engine is synchronous and pull-based: the
//! host owns the audio clock, calls [`Replay::get_audio`] once per tick's
//! worth of output and consumes the returned frame count before calling
//! again. There is no internal buffering beyond one tick of mix scratch
//! space and the 128-value anti-click tail.
//!
//! # Architecture
//!
//! ```text
//!    Module (read-only, shared)
//!        │
//!        ▼
//!    Replay ── sequencer: order / row / tick state machine
//!        │
//!        ├── Channel × N ── effect state machines, envelopes, auto-vibrato
//!        │
//!        └── mixer: 2× oversampled resampling → 2:1 downsample → de-click
//! ```
//!
//! Playback is deterministic: identical (module, sample rate, interpolation)
//! inputs produce byte-identical audio on every run. The one random element,
//! the "random" vibrato/tremolo waveform, is seeded purely from the channel
//! index.
//!
//! # Usage
//!
//! ```ignore
//! use chime_tracker::Module;
//! use chime_replay::{Replay, calculate_mix_buf_len};
//!
//! let module = Module::load(&bytes).unwrap();
//! let mut replay = Replay::new(&module, 48000, true).unwrap();
//! let mut mix_buf = vec![0i32; calculate_mix_buf_len(48000)];
//! loop {
//!     let frames = replay.get_audio(&mut mix_buf);
//!     // consume mix_buf[..frames * 2]
//! }
//! ```

mod channel;
mod effect;
mod replay;

pub use effect::Effect;
pub use replay::{Replay, ReplayError, calculate_mix_buf_len};

#[cfg(test)]
mod tests;
