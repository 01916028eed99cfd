//! XM (FastTracker 2 Extended Module) loader
//!
//! Format reference:
//! <https://github.com/milkytracker/MilkyTracker/blob/master/resources/reference/xm-form.txt>

use tracing::{debug, warn};

use crate::data::Data;
use crate::error::LoadError;
use crate::module::{Envelope, Instrument, Module, Pattern, Sample};
use crate::{MAX_CHANNELS, MAX_ROWS};

/// XM format version we support
const XM_VERSION: i32 = 0x0104;

/// Trackers whose envelope point ticks are delta-encoded
const DELTA_ENV_TRACKER: &[u8; 15] = b"DigiBooster Pro";

pub(crate) fn parse(data: &Data) -> Result<Module, LoadError> {
    if data.u16le(58) != XM_VERSION {
        return Err(LoadError::XmVersion);
    }
    let mut module = Module {
        name: data.ascii(17, 20),
        ..Module::default()
    };
    let delta_env = data.matches(38, DELTA_ENV_TRACKER);
    let mut offset = 60 + data.u32le(60) as usize;
    let sequence_len = data.u16le(64) as usize;
    module.restart_pos = data.u16le(66) as usize;
    module.num_channels = data.u16le(68) as usize;
    module.num_patterns = data.u16le(70) as usize;
    module.num_instruments = data.u16le(72) as usize;
    module.linear_periods = data.u16le(74) & 0x1 != 0;
    module.default_gvol = 64;
    module.default_speed = data.u16le(76);
    module.default_tempo = data.u16le(78);
    module.c2_rate = 8363;
    module.gain = 64;
    if module.num_channels > MAX_CHANNELS {
        warn!(
            channels = module.num_channels,
            "clamping XM channel count to {MAX_CHANNELS}"
        );
        module.num_channels = MAX_CHANNELS;
    }
    module.default_panning = vec![128; module.num_channels];
    module.sequence = (0..sequence_len)
        .map(|idx| {
            let entry = data.u8(80 + idx);
            if (entry as usize) < module.num_patterns {
                entry as u8
            } else {
                0
            }
        })
        .collect();
    if module.sequence.is_empty() {
        module.sequence.push(0);
    }

    for _ in 0..module.num_patterns {
        if data.u8(offset + 4) != 0 {
            return Err(LoadError::XmPacking);
        }
        let num_rows = (data.u16le(offset + 5) as usize).clamp(1, MAX_ROWS);
        let pat_data_len = data.u16le(offset + 7) as usize;
        offset += data.u32le(offset) as usize;
        let next_offset = offset + pat_data_len;
        let mut pattern = Pattern::new(module.num_channels, num_rows);
        if pat_data_len > 0 {
            let num_notes = num_rows * module.num_channels;
            let mut pat_data_offset = 0;
            let next_byte = |offset: &mut usize| {
                let value = data.u8(*offset) as u8;
                *offset += 1;
                value
            };
            for _ in 0..num_notes {
                let mut flags = data.u8(offset);
                if flags & 0x80 == 0 {
                    flags = 0x1F;
                } else {
                    offset += 1;
                }
                let key = if flags & 0x01 > 0 { next_byte(&mut offset) } else { 0 };
                let ins = if flags & 0x02 > 0 { next_byte(&mut offset) } else { 0 };
                let vol = if flags & 0x04 > 0 { next_byte(&mut offset) } else { 0 };
                let mut fxc = if flags & 0x08 > 0 { next_byte(&mut offset) } else { 0 };
                let mut fxp = if flags & 0x10 > 0 { next_byte(&mut offset) } else { 0 };
                if fxc >= 0x40 {
                    fxc = 0;
                    fxp = 0;
                }
                pattern.data[pat_data_offset] = key;
                pattern.data[pat_data_offset + 1] = ins;
                pattern.data[pat_data_offset + 2] = vol;
                pattern.data[pat_data_offset + 3] = fxc;
                pattern.data[pat_data_offset + 4] = fxp;
                pat_data_offset += 5;
            }
        }
        module.patterns.push(pattern);
        offset = next_offset;
    }
    if module.patterns.is_empty() {
        module.patterns.push(Pattern::new(module.num_channels, 64));
    }

    module.instruments = vec![Instrument::default()];
    for _ in 1..=module.num_instruments {
        let mut instrument = Instrument {
            name: data.ascii(offset + 4, 22),
            ..Instrument::default()
        };
        let num_samples = data.u16le(offset + 27) as usize;
        instrument.samples = vec![Sample::default(); num_samples.max(1)];
        if num_samples > 0 {
            for key in 0..96 {
                let sam = data.u8(offset + 33 + key) as usize;
                instrument.key_to_sample[key + 1] = if sam < num_samples { sam as u8 } else { 0 };
            }
            let vol_points = read_env_points(data, offset + 129, delta_env);
            let pan_points = read_env_points(data, offset + 177, delta_env);
            let num_vol_points = env_point_count(data.u8(offset + 225));
            let num_pan_points = env_point_count(data.u8(offset + 226));
            let vol_flags = data.u8(offset + 233);
            let pan_flags = data.u8(offset + 234);
            instrument.vol_env = Envelope {
                enabled: num_vol_points > 0 && vol_flags & 0x1 != 0,
                sustain: vol_flags & 0x2 != 0,
                looped: vol_flags & 0x4 != 0,
                sustain_tick: vol_points[(data.u8(offset + 227) & 0xF) as usize].0,
                loop_start_tick: vol_points[(data.u8(offset + 228) & 0xF) as usize].0,
                loop_end_tick: vol_points[(data.u8(offset + 229) & 0xF) as usize].0,
                points: vol_points[..num_vol_points].to_vec(),
            };
            instrument.pan_env = Envelope {
                enabled: num_pan_points > 0 && pan_flags & 0x1 != 0,
                sustain: pan_flags & 0x2 != 0,
                looped: pan_flags & 0x4 != 0,
                sustain_tick: pan_points[(data.u8(offset + 230) & 0xF) as usize].0,
                loop_start_tick: pan_points[(data.u8(offset + 231) & 0xF) as usize].0,
                loop_end_tick: pan_points[(data.u8(offset + 232) & 0xF) as usize].0,
                points: pan_points[..num_pan_points].to_vec(),
            };
            instrument.vib_type = data.u8(offset + 235);
            instrument.vib_sweep = data.u8(offset + 236);
            instrument.vib_depth = data.u8(offset + 237);
            instrument.vib_rate = data.u8(offset + 238);
            instrument.vol_fadeout = data.u16le(offset + 239);
        }
        offset += data.u32le(offset) as usize;
        let mut sam_head_offset = offset;
        offset += num_samples * 40;
        for sam in 0..num_samples {
            let sample = &mut instrument.samples[sam];
            let sam_data_bytes = data.u32le(sam_head_offset) as usize;
            let mut sam_loop_start = data.u32le(sam_head_offset + 4) as i64;
            let mut sam_loop_length = data.u32le(sam_head_offset + 8) as i64;
            sample.volume = data.u8(sam_head_offset + 12);
            sample.fine_tune = data.s8(sam_head_offset + 13);
            let sam_type = data.u8(sam_head_offset + 14);
            let looped = sam_type & 0x3 > 0;
            let ping_pong = sam_type & 0x2 > 0;
            let sixteen_bit = sam_type & 0x10 > 0;
            sample.panning = data.u8(sam_head_offset + 15) + 1;
            sample.rel_note = data.s8(sam_head_offset + 16);
            sample.name = data.ascii(sam_head_offset + 18, 22);
            sam_head_offset += 40;
            let mut sam_data_samples = sam_data_bytes.min(data.len());
            if sixteen_bit {
                sam_data_samples >>= 1;
                sam_loop_start >>= 1;
                sam_loop_length >>= 1;
            }
            if !looped || sam_loop_start + sam_loop_length > sam_data_samples as i64 {
                sam_loop_start = sam_data_samples as i64;
                sam_loop_length = 0;
            }
            let mut pcm = if sixteen_bit {
                data.sam_s16le(offset, sam_data_samples)
            } else {
                data.sam_s8(offset, sam_data_samples)
            };
            // XM sample data is delta-encoded
            let mut amp: i32 = 0;
            for value in pcm.iter_mut() {
                amp += *value as i32;
                amp = (amp & 0x7FFF) - (amp & 0x8000);
                *value = amp as i16;
            }
            sample.set_data(pcm, sam_loop_start as i32, sam_loop_length as i32, ping_pong);
            offset += sam_data_bytes;
        }
        module.instruments.push(instrument);
    }
    debug!(
        name = %module.name,
        channels = module.num_channels,
        patterns = module.num_patterns,
        instruments = module.num_instruments,
        linear = module.linear_periods,
        "loaded XM module"
    );
    Ok(module)
}

/// Twelve (tick, amplitude) pairs, padded to 16 entries so the 4-bit
/// sustain/loop indices always land on a defined value.
fn read_env_points(data: &Data, offset: usize, delta: bool) -> [(i32, i32); 16] {
    let mut points = [(0, 0); 16];
    let mut point_tick = 0;
    for (point, out) in points.iter_mut().take(12).enumerate() {
        let point_offset = offset + point * 4;
        point_tick = if delta { point_tick } else { 0 } + data.u16le(point_offset);
        let ampl = data.u16le(point_offset + 2);
        if ampl > 64 {
            warn!(ampl, "clamping envelope amplitude");
        }
        *out = (point_tick, ampl.min(64));
    }
    points
}

/// Point counts above the format's 12-point maximum disable the envelope.
fn env_point_count(count: i32) -> usize {
    if count as usize > 12 { 0 } else { count as usize }
}
