//! Playback cursor: sequencer state machine, mixing pipeline and public API

use thiserror::Error;
use tracing::debug;

use chime_tracker::Module;

use crate::channel::Channel;
use crate::effect::Effect;

/// Interleaved values carried across ticks for the de-click cross-fade
/// (64 stereo frames).
const RAMP_BUF_LEN: usize = 128;

/// Lowest reachable tempo; also sizes the mix buffer
const MIN_TEMPO: i32 = 32;

/// Sample rates accepted by [`Replay::new`]
const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u32> = 8000..=192000;

/// Errors from [`Replay::new`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// Sampling rate outside the supported range
    #[error("sample rate {0} outside supported range 8000-192000")]
    SampleRate(u32),
}

/// Mutable playback cursor over a shared, read-only [`Module`].
///
/// Drive it from a single thread; independent replays over the same module
/// are fine. All state transitions are total: unknown effects are no-ops and
/// malformed positions clamp, so playback never fails once the replay
/// exists.
pub struct Replay<'m> {
    module: &'m Module,
    sample_rate: i32,
    interpolation: bool,
    global_vol: i32,
    seq_pos: i32,
    break_pos: i32,
    row: i32,
    next_row: i32,
    tick: i32,
    speed: i32,
    tempo: i32,
    pl_count: i32,
    pl_chan: i32,
    ramp_buf: [i32; RAMP_BUF_LEN],
    play_count: Vec<Vec<u8>>,
    channels: Vec<Channel>,
}

impl<'m> Replay<'m> {
    /// Create a playback cursor at sequence position 0.
    ///
    /// `interpolation` selects linear-interpolated sample fetch over
    /// nearest-sample fetch.
    pub fn new(
        module: &'m Module,
        sample_rate: u32,
        interpolation: bool,
    ) -> Result<Replay<'m>, ReplayError> {
        if !SAMPLE_RATE_RANGE.contains(&sample_rate) {
            return Err(ReplayError::SampleRate(sample_rate));
        }
        let mut replay = Replay {
            module,
            sample_rate: sample_rate as i32,
            interpolation,
            global_vol: 0,
            seq_pos: 0,
            break_pos: 0,
            row: 0,
            next_row: 0,
            tick: 0,
            speed: 0,
            tempo: 0,
            pl_count: -1,
            pl_chan: -1,
            ramp_buf: [0; RAMP_BUF_LEN],
            play_count: Vec::new(),
            channels: (0..module.num_channels)
                .map(|idx| Channel::new(module, idx))
                .collect(),
        };
        replay.set_sequence_pos(0);
        Ok(replay)
    }

    /// Jump to a sequence position. Speed, tempo and global volume reset to
    /// the module defaults, every channel re-initializes, and the play-count
    /// table used for loop detection is rebuilt. Out-of-range positions
    /// clamp to 0.
    pub fn set_sequence_pos(&mut self, pos: usize) {
        let module = self.module;
        let mut pos = pos as i32;
        if pos >= module.sequence.len() as i32 {
            pos = 0;
        }
        self.break_pos = pos;
        self.next_row = 0;
        self.tick = 1;
        self.global_vol = module.default_gvol;
        self.speed = if module.default_speed > 0 {
            module.default_speed
        } else {
            6
        };
        self.tempo = if module.default_tempo > 0 {
            module.default_tempo
        } else {
            125
        };
        self.pl_count = -1;
        self.pl_chan = -1;
        self.play_count = module
            .sequence
            .iter()
            .map(|&pat| {
                let rows = module
                    .patterns
                    .get(pat as usize)
                    .map_or(0, |pattern| pattern.num_rows);
                vec![0u8; rows]
            })
            .collect();
        for (idx, channel) in self.channels.iter_mut().enumerate() {
            *channel = Channel::new(module, idx);
        }
        self.ramp_buf.fill(0);
        debug!(pos, "sequence position set");
        self.advance_tick();
    }

    /// Mix one tick of audio into `mix_buf` (sized by
    /// [`calculate_mix_buf_len`]) and advance playback. Returns the number
    /// of stereo frames written, which varies with the current tempo.
    pub fn get_audio(&mut self, mix_buf: &mut [i32]) -> usize {
        let tick_len = self.tick_len();
        assert!(
            mix_buf.len() >= (tick_len + 65) * 4,
            "mix_buf needs calculate_mix_buf_len(sample_rate) values"
        );
        mix_buf[..(tick_len + 65) * 4].fill(0);
        // Mix each channel at twice the output rate, with one tick of
        // lookahead for the downsampler
        let module = self.module;
        for channel in &mut self.channels {
            channel.resample(
                module,
                mix_buf,
                0,
                (tick_len + 65) * 2,
                self.sample_rate * 2,
                self.interpolation,
            );
            channel.update_sample_idx(module, (tick_len * 2) as i32, self.sample_rate * 2);
        }
        downsample(mix_buf, tick_len + 64);
        self.volume_ramp(mix_buf, tick_len);
        self.advance_tick();
        tick_len
    }

    /// Song length in samples at the current sampling rate, from position 0
    /// until the first revisited (sequence, row) pair. Resets playback.
    pub fn calculate_duration(&mut self) -> usize {
        self.set_sequence_pos(0);
        let mut duration = 0;
        let mut count = 0;
        while count < 1 {
            duration += self.tick_len();
            count = self.advance_tick();
        }
        self.set_sequence_pos(0);
        duration
    }

    /// Seek to approximately `sample_pos` by deterministically replaying the
    /// tick loop from position 0, updating only channel sample positions.
    /// Returns the sample position actually reached. Cost is proportional to
    /// the target position.
    pub fn seek(&mut self, sample_pos: usize) -> usize {
        self.set_sequence_pos(0);
        let mut current_pos = 0;
        loop {
            let tick_len = self.tick_len();
            if current_pos + tick_len > sample_pos {
                break;
            }
            for idx in 0..self.module.num_channels {
                self.channels[idx].update_sample_idx(
                    self.module,
                    (tick_len * 2) as i32,
                    self.sample_rate * 2,
                );
            }
            current_pos += tick_len;
            self.advance_tick();
        }
        debug!(sample_pos, current_pos, "seek complete");
        current_pos
    }

    /// Current sequence position.
    pub fn sequence_pos(&self) -> usize {
        self.seq_pos as usize
    }

    /// Current row within the playing pattern.
    pub fn row(&self) -> usize {
        self.row as usize
    }

    fn tick_len(&self) -> usize {
        calculate_tick_len(self.tempo, self.sample_rate)
    }

    /// One sequencer tick: a row boundary runs the row interpreter, any
    /// other tick runs every channel's continuous effects. Returns the
    /// play count of the current row minus one (≥ 1 once a row repeats).
    fn advance_tick(&mut self) -> i32 {
        self.tick -= 1;
        if self.tick <= 0 {
            self.tick = self.speed;
            self.advance_row();
        } else {
            for idx in 0..self.channels.len() {
                self.channels[idx].tick(self.module, &mut self.global_vol);
            }
        }
        self.play_count
            .get(self.seq_pos as usize)
            .and_then(|rows| rows.get(self.row as usize))
            .map_or(1, |&count| count as i32 - 1)
    }

    /// Row boundary: resolve loop/break/delay redirections, bump the play
    /// counter, then feed every channel its new pattern cell.
    fn advance_row(&mut self) {
        let module = self.module;
        let seq_len = module.sequence.len() as i32;
        if self.next_row < 0 {
            self.break_pos = self.seq_pos + 1;
            self.next_row = 0;
        }
        if self.break_pos >= 0 {
            let restart = if (module.restart_pos as i32) < seq_len {
                module.restart_pos as i32
            } else {
                0
            };
            if self.break_pos >= seq_len {
                self.break_pos = restart;
                self.next_row = 0;
            }
            let mut scanned = 0;
            while module.sequence[self.break_pos as usize] as usize >= module.num_patterns {
                // Skip invalid sequence entries, settling on 0 if every
                // entry is invalid
                scanned += 1;
                if scanned > seq_len {
                    self.break_pos = 0;
                    self.next_row = 0;
                    break;
                }
                self.break_pos += 1;
                if self.break_pos >= seq_len {
                    self.break_pos = restart;
                    self.next_row = 0;
                }
            }
            self.seq_pos = self.break_pos;
            for channel in &mut self.channels {
                channel.pl_row = 0;
            }
            self.break_pos = -1;
        }
        let pattern_idx = module.sequence[self.seq_pos as usize] as usize;
        let pattern = module
            .patterns
            .get(pattern_idx)
            .unwrap_or(&module.patterns[0]);
        self.row = self.next_row;
        if self.row >= pattern.num_rows as i32 {
            self.row = 0;
        }
        if self.pl_count < 0 {
            // Count the visit unless a pattern loop is replaying the row
            if let Some(count) = self
                .play_count
                .get_mut(self.seq_pos as usize)
                .and_then(|rows| rows.get_mut(self.row as usize))
            {
                *count = (*count + 1).min(127);
            }
        }
        self.next_row = self.row + 1;
        if self.next_row >= pattern.num_rows as i32 {
            self.next_row = -1;
        }
        let row = self.row;
        for idx in 0..self.channels.len() {
            let note = pattern.note(row as usize, idx);
            let (effect, param) = Effect::decode(note.effect, note.param);
            self.channels[idx].row(module, &mut self.global_vol, note, effect, param);
            match effect {
                Effect::SetSpeed => {
                    if param > 0 {
                        self.speed = param as i32;
                        self.tick = param as i32;
                    }
                }
                Effect::PatternJump => {
                    if self.pl_count < 0 {
                        self.break_pos = param as i32;
                        self.next_row = 0;
                    }
                }
                Effect::PatternBreak => {
                    if self.pl_count < 0 {
                        if self.break_pos < 0 {
                            self.break_pos = self.seq_pos + 1;
                        }
                        self.next_row = ((param >> 4) * 10 + (param & 0xF)) as i32;
                    }
                }
                Effect::SetSpeedTempo => {
                    if param > 0 {
                        if param < 32 {
                            self.speed = param as i32;
                            self.tick = param as i32;
                        } else {
                            self.tempo = param as i32;
                        }
                    }
                }
                Effect::SetTempo => {
                    if param > 32 {
                        self.tempo = param as i32;
                    }
                }
                Effect::PatternLoop => {
                    let channel = &mut self.channels[idx];
                    if param == 0 {
                        // Set the loop marker on this channel
                        channel.pl_row = row;
                    }
                    if channel.pl_row < row && self.break_pos < 0 {
                        if self.pl_count < 0 {
                            // Not already looping, begin
                            self.pl_count = param as i32;
                            self.pl_chan = idx as i32;
                        }
                        if self.pl_chan == idx as i32 {
                            if self.pl_count == 0 {
                                // Loop finished, invalidate the marker
                                channel.pl_row = row + 1;
                            } else {
                                self.next_row = channel.pl_row;
                            }
                            self.pl_count -= 1;
                        }
                    }
                }
                Effect::PatternDelay => {
                    self.tick = self.speed + self.speed * param as i32;
                }
                _ => {}
            }
        }
    }

    /// Cross-fade the start of this tick against the previous tick's tail
    /// to remove volume-step clicks, then save the new tail.
    fn volume_ramp(&mut self, mix_buf: &mut [i32], tick_len: usize) {
        let ramp_rate = 256 * 2048 / self.sample_rate;
        let mut idx = 0;
        let mut a1 = 0;
        while a1 < 256 {
            let a2 = 256 - a1;
            mix_buf[idx] = (mix_buf[idx] * a1 + self.ramp_buf[idx] * a2) >> 8;
            mix_buf[idx + 1] = (mix_buf[idx + 1] * a1 + self.ramp_buf[idx + 1] * a2) >> 8;
            idx += 2;
            a1 += ramp_rate;
        }
        self.ramp_buf
            .copy_from_slice(&mix_buf[tick_len * 2..tick_len * 2 + RAMP_BUF_LEN]);
    }
}

/// Length in samples of one tick at `tempo`. Tempos below the reachable
/// minimum clamp so a malformed default can never outgrow the mix buffer.
fn calculate_tick_len(tempo: i32, sample_rate: i32) -> usize {
    ((sample_rate * 5) / (tempo.max(MIN_TEMPO) * 2)) as usize
}

/// Required `mix_buf` length (in interleaved i32 values) for
/// [`Replay::get_audio`] at the given sampling rate.
pub fn calculate_mix_buf_len(sample_rate: u32) -> usize {
    (calculate_tick_len(MIN_TEMPO, sample_rate as i32) + 65) * 4
}

/// 2:1 downsampling with a simple 1-2-1 anti-alias kernel. The buffer must
/// hold `count * 2 + 1` stereo frames.
fn downsample(buf: &mut [i32], count: usize) {
    let out_len = count * 2;
    let mut idx = 0;
    let mut out_idx = 0;
    while out_idx < out_len {
        buf[out_idx] = (buf[idx] >> 2) + (buf[idx + 2] >> 1) + (buf[idx + 4] >> 2);
        buf[out_idx + 1] = (buf[idx + 1] >> 2) + (buf[idx + 3] >> 1) + (buf[idx + 5] >> 2);
        idx += 4;
        out_idx += 2;
    }
}
