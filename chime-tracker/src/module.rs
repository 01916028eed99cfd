//! Unified tracker module data structures
//!
//! All three loaders produce the same shapes. A loaded [`Module`] is
//! logically read-only: the loader is its sole writer, and one module may be
//! shared by any number of replay cursors.

use crate::data::Data;
use crate::error::LoadError;
use crate::{S3M_MAGIC, XM_MAGIC, protracker, s3m, xm};

/// Load-time-immutable song definition.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module name (XM 20, S3M 28, MOD 20 bytes)
    pub name: String,
    /// Number of channels
    pub num_channels: usize,
    /// Number of instruments, not counting the index-0 sentinel
    pub num_instruments: usize,
    /// Number of patterns
    pub num_patterns: usize,
    /// Pattern order table
    pub sequence: Vec<u8>,
    /// Sequence position to restart from after the last entry
    pub restart_pos: usize,
    /// Default global volume (0-64)
    pub default_gvol: i32,
    /// Default speed (ticks per row)
    pub default_speed: i32,
    /// Default tempo
    pub default_tempo: i32,
    /// Sample rate of a sample played at C-2
    pub c2_rate: i32,
    /// Output gain (64 = unity for 4-channel material)
    pub gain: i32,
    /// Linear (vs logarithmic "Amiga") period space
    pub linear_periods: bool,
    /// Volume slides also run on the first tick of a row (S3M)
    pub fast_vol_slides: bool,
    /// Default panning per channel (0-255)
    pub default_panning: Vec<u8>,
    /// Pattern data
    pub patterns: Vec<Pattern>,
    /// Instruments; index 0 is the inert "no instrument" sentinel
    pub instruments: Vec<Instrument>,
}

impl Module {
    /// Parse a module from a raw file image.
    ///
    /// Format is detected by signature: `"Extended Module:"` at offset 0,
    /// `"SCRM"` at offset 44, anything else is handed to the ProTracker
    /// loader (which has the only unconditional failure path).
    pub fn load(bytes: &[u8]) -> Result<Module, LoadError> {
        let data = Data::new(bytes);
        if data.matches(0, XM_MAGIC) {
            xm::parse(&data)
        } else if data.matches(44, S3M_MAGIC) {
            s3m::parse(&data)
        } else {
            protracker::parse(&data)
        }
    }

    /// Pattern index at a sequence position, if both are in range.
    pub fn pattern_at(&self, seq_pos: usize) -> Option<&Pattern> {
        let idx = *self.sequence.get(seq_pos)? as usize;
        self.patterns.get(idx)
    }
}

/// Flat row-major grid of pattern cells, 5 bytes per cell.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    /// Grid width
    pub num_channels: usize,
    /// Grid height
    pub num_rows: usize,
    /// `num_channels * num_rows * 5` bytes of (key, instrument, volume,
    /// effect, param) cells
    pub data: Vec<u8>,
}

impl Pattern {
    /// Allocate a zero-filled pattern.
    pub fn new(num_channels: usize, num_rows: usize) -> Self {
        Self {
            num_channels,
            num_rows,
            data: vec![0; num_channels * num_rows * 5],
        }
    }

    /// The cell at (row, channel); a zeroed cell out of range.
    pub fn note(&self, row: usize, chan: usize) -> Note {
        if row >= self.num_rows || chan >= self.num_channels {
            return Note::default();
        }
        let offset = (row * self.num_channels + chan) * 5;
        Note {
            key: self.data[offset],
            instrument: self.data[offset + 1],
            volume: self.data[offset + 2],
            effect: self.data[offset + 3],
            param: self.data[offset + 4],
        }
    }

    /// Overwrite the cell at (row, channel); out of range is ignored.
    pub fn set_note(&mut self, row: usize, chan: usize, note: Note) {
        if row >= self.num_rows || chan >= self.num_channels {
            return;
        }
        let offset = (row * self.num_channels + chan) * 5;
        self.data[offset] = note.key;
        self.data[offset + 1] = note.instrument;
        self.data[offset + 2] = note.volume;
        self.data[offset + 3] = note.effect;
        self.data[offset + 4] = note.param;
    }
}

/// One pattern cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Note {
    /// 0 = none, 1-96 = playable key, above 96 = key off
    pub key: u8,
    /// 1-based instrument, 0 = none
    pub instrument: u8,
    /// Volume column byte
    pub volume: u8,
    /// Effect id in the unified numbering
    pub effect: u8,
    /// Effect parameter
    pub param: u8,
}

/// Instrument: one or more samples with a key map, envelopes, auto-vibrato
/// and fade-out.
#[derive(Debug, Clone)]
pub struct Instrument {
    /// Instrument name
    pub name: String,
    /// Samples; always at least one (possibly empty)
    pub samples: Vec<Sample>,
    /// Key (1-96) to sample index map; entry 0 is the no-key fallback
    pub key_to_sample: [u8; 97],
    /// Auto-vibrato waveform
    pub vib_type: i32,
    /// Auto-vibrato sweep (ticks to reach full depth)
    pub vib_sweep: i32,
    /// Auto-vibrato depth
    pub vib_depth: i32,
    /// Auto-vibrato rate
    pub vib_rate: i32,
    /// Fade-out subtracted from the fade level each tick after key-off
    pub vol_fadeout: i32,
    /// Volume envelope
    pub vol_env: Envelope,
    /// Panning envelope
    pub pan_env: Envelope,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: String::new(),
            samples: vec![Sample::default()],
            key_to_sample: [0; 97],
            vib_type: 0,
            vib_sweep: 0,
            vib_depth: 0,
            vib_rate: 0,
            vol_fadeout: 0,
            vol_env: Envelope::default(),
            pan_env: Envelope::default(),
        }
    }
}

/// Signed 16-bit PCM sample with loop metadata.
///
/// The data vector always carries one extra synthesized sample equal to the
/// value at the loop start, so the resampler's interpolation fetch never
/// needs a boundary special case. After construction
/// `loop_start + loop_length < data.len()` always holds.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    /// Sample name
    pub name: String,
    /// Base volume (0-64)
    pub volume: i32,
    /// Base panning; 0 = unset, otherwise value + 1
    pub panning: i32,
    /// Semitone offset applied to the played key
    pub rel_note: i32,
    /// Fine-tune in 1/128ths of a semitone
    pub fine_tune: i32,
    /// Loop start in samples
    pub loop_start: i32,
    /// Loop length in samples; 0 or 1 means no loop
    pub loop_length: i32,
    /// PCM data plus the loop-wrap sample
    pub data: Vec<i16>,
}

impl Sample {
    /// Install PCM data with a loop region already resolved by the loader.
    ///
    /// The region is clamped into the data, the wrap sample is synthesized,
    /// and a bidirectional loop is unrolled by mirroring the loop region
    /// once (doubling the loop length).
    pub fn set_data(
        &mut self,
        mut data: Vec<i16>,
        loop_start: i32,
        loop_length: i32,
        ping_pong: bool,
    ) {
        let len = data.len() as i32;
        let mut loop_start = loop_start.clamp(0, len);
        let mut loop_length = loop_length.max(0);
        if loop_start + loop_length > len {
            loop_length = len - loop_start;
        }
        if loop_length < 1 {
            loop_start = len;
            loop_length = 0;
        }
        data.push(0);
        data[(loop_start + loop_length) as usize] = data[loop_start as usize];
        self.loop_start = loop_start;
        self.loop_length = loop_length;
        self.data = data;
        if ping_pong && loop_length > 0 {
            self.mirror_loop();
        }
    }

    /// Unroll a ping-pong loop into a forward loop of twice the length.
    /// Data past the loop end is unreachable once looping and is dropped.
    fn mirror_loop(&mut self) {
        let loop_start = self.loop_start as usize;
        let loop_length = self.loop_length as usize;
        let loop_end = loop_start + loop_length;
        let mut new_data = Vec::with_capacity(loop_end + loop_length + 1);
        new_data.extend_from_slice(&self.data[..loop_end]);
        for idx in 0..loop_length {
            new_data.push(self.data[loop_end - idx - 1]);
        }
        new_data.push(0);
        self.loop_length *= 2;
        self.data = new_data;
        self.data[loop_start + self.loop_length as usize] = self.data[loop_start];
    }
}

/// Piecewise-linear volume or panning envelope driven by playback ticks.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Envelope participates in amplitude/panning composition
    pub enabled: bool,
    /// Hold at the sustain tick while the key is on
    pub sustain: bool,
    /// Loop between the loop ticks
    pub looped: bool,
    /// Tick held while sustaining
    pub sustain_tick: i32,
    /// Loop region start tick
    pub loop_start_tick: i32,
    /// Loop region end tick
    pub loop_end_tick: i32,
    /// (tick, amplitude) breakpoints with non-decreasing ticks
    pub points: Vec<(i32, i32)>,
}

impl Envelope {
    /// Advance the envelope cursor by one tick, honoring loop and sustain.
    pub fn next_tick(&self, tick: i32, key_on: bool) -> i32 {
        let mut tick = tick + 1;
        if self.looped && tick >= self.loop_end_tick {
            tick = self.loop_start_tick;
        }
        if self.sustain && key_on && tick >= self.sustain_tick {
            tick = self.sustain_tick;
        }
        tick
    }

    /// Amplitude at a tick: linear interpolation between the surrounding
    /// breakpoints, flat extrapolation past the last one. A zero-width
    /// segment evaluates to its left point.
    pub fn ampl(&self, tick: i32) -> i32 {
        let Some(&(last_tick, last_ampl)) = self.points.last() else {
            return 0;
        };
        if tick >= last_tick {
            return last_ampl;
        }
        let mut point = 0;
        for (idx, &(point_tick, _)) in self.points.iter().enumerate().skip(1) {
            if point_tick <= tick {
                point = idx;
            }
        }
        let (t0, a0) = self.points[point];
        let Some(&(t1, a1)) = self.points.get(point + 1) else {
            return a0;
        };
        let dt = t1 - t0;
        if dt <= 0 {
            return a0;
        }
        a0 + ((((a1 - a0) << 24) / dt) * (tick - t0) >> 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_note_bounds() {
        let mut pattern = Pattern::new(2, 4);
        assert_eq!(pattern.data.len(), 2 * 4 * 5);
        pattern.set_note(
            1,
            1,
            Note {
                key: 49,
                instrument: 1,
                volume: 0,
                effect: 0xC,
                param: 32,
            },
        );
        assert_eq!(pattern.note(1, 1).key, 49);
        assert_eq!(pattern.note(1, 1).param, 32);
        // Out of range reads a silent cell, writes are dropped
        assert_eq!(pattern.note(4, 0), Note::default());
        pattern.set_note(9, 9, Note { key: 1, ..Note::default() });
    }

    #[test]
    fn test_sample_loop_clamped_and_wrapped() {
        let mut sample = Sample::default();
        sample.set_data(vec![10, 20, 30, 40], 1, 100, false);
        assert_eq!(sample.loop_start, 1);
        assert_eq!(sample.loop_length, 3);
        assert!(sample.loop_start + sample.loop_length < sample.data.len() as i32);
        // Wrap sample equals the loop start value
        assert_eq!(sample.data[4], 20);
    }

    #[test]
    fn test_sample_no_loop() {
        let mut sample = Sample::default();
        sample.set_data(vec![1, 2, 3], 3, 0, false);
        assert_eq!(sample.loop_start, 3);
        assert_eq!(sample.loop_length, 0);
        assert_eq!(sample.data.len(), 4);
    }

    #[test]
    fn test_sample_ping_pong_mirrors_loop() {
        let mut sample = Sample::default();
        sample.set_data(vec![0, 1, 2, 3], 1, 3, true);
        assert_eq!(sample.loop_length, 6);
        assert_eq!(sample.loop_start, 1);
        // Forward region then the mirrored tail
        assert_eq!(&sample.data[..7], &[0, 1, 2, 3, 3, 2, 1]);
        // Wrap sample equals the loop start value
        assert_eq!(sample.data[7], 1);
    }

    #[test]
    fn test_envelope_interpolation_and_extrapolation() {
        let env = Envelope {
            enabled: true,
            points: vec![(0, 64), (10, 32), (20, 0)],
            ..Envelope::default()
        };
        assert_eq!(env.ampl(0), 64);
        assert_eq!(env.ampl(5), 48);
        assert_eq!(env.ampl(10), 32);
        assert_eq!(env.ampl(15), 16);
        // Flat extrapolation past the final breakpoint
        assert_eq!(env.ampl(20), 0);
        assert_eq!(env.ampl(1000), 0);
    }

    #[test]
    fn test_envelope_duplicate_tick_points() {
        let env = Envelope {
            points: vec![(0, 10), (5, 20), (5, 60), (9, 60)],
            ..Envelope::default()
        };
        // The later of two same-tick breakpoints wins; no zero-width
        // interpolation happens
        assert_eq!(env.ampl(5), 60);
        assert_eq!(env.ampl(4), 18);
    }

    #[test]
    fn test_envelope_sustain_and_loop_cursor() {
        let env = Envelope {
            sustain: true,
            sustain_tick: 4,
            looped: true,
            loop_start_tick: 2,
            loop_end_tick: 8,
            ..Envelope::default()
        };
        // Key held: cursor pins at the sustain tick
        assert_eq!(env.next_tick(3, true), 4);
        assert_eq!(env.next_tick(4, true), 4);
        // Key released: cursor wraps through the loop region
        assert_eq!(env.next_tick(6, false), 7);
        assert_eq!(env.next_tick(7, false), 2);
    }
}
