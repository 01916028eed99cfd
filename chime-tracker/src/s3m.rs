//! S3M (Scream Tracker 3) loader

use tracing::debug;

use crate::data::Data;
use crate::error::LoadError;
use crate::module::{Instrument, Module, Pattern, Sample};
use crate::pitch::{FP_MASK, FP_SHIFT, log_2};

/// Tracker version whose volume slides always ran on tick 0
const FAST_SLIDES_VERSION: i32 = 0x1300;

/// "SCRM" as a little-endian word at offset 44
const SCRM_MAGIC: u32 = 0x4d524353;

/// Per-instrument "SCRS" sample signature (low half, at offset 76)
const SCRS_MARKER: i32 = 0x4353;

pub(crate) fn parse(data: &Data) -> Result<Module, LoadError> {
    let mut module = Module {
        name: data.ascii(0, 28),
        ..Module::default()
    };
    let sequence_len = data.u16le(32) as usize;
    module.num_instruments = data.u16le(34) as usize;
    module.num_patterns = data.u16le(36) as usize;
    let flags = data.u16le(38);
    let version = data.u16le(40);
    module.fast_vol_slides = (flags & 0x40) == 0x40 || version == FAST_SLIDES_VERSION;
    let signed_samples = data.u16le(42) == 1;
    if data.u32le(44) != SCRM_MAGIC {
        return Err(LoadError::S3mMagic);
    }
    module.default_gvol = data.u8(48);
    module.default_speed = data.u8(49);
    module.default_tempo = data.u8(50);
    module.c2_rate = 8363;
    module.gain = data.u8(51) & 0x7F;
    let stereo_mode = data.u8(51) & 0x80 == 0x80;
    let default_pan = data.u8(53) == 0xFC;
    // Compact the 32 header channel slots into the channels actually in use
    let mut channel_map = [-1i32; 32];
    for (idx, entry) in channel_map.iter_mut().enumerate() {
        if data.u8(64 + idx) < 16 {
            *entry = module.num_channels as i32;
            module.num_channels += 1;
        }
    }
    module.sequence = (0..sequence_len)
        .map(|idx| data.u8(96 + idx) as u8)
        .collect();
    if module.sequence.is_empty() {
        module.sequence.push(0);
    }
    let mut module_data_idx = 96 + sequence_len;

    module.instruments = vec![Instrument::default()];
    for _ in 1..=module.num_instruments {
        let mut instrument = Instrument::default();
        let inst_offset = (data.u16le(module_data_idx) as usize) << 4;
        module_data_idx += 2;
        instrument.name = data.ascii(inst_offset + 48, 28);
        if data.u8(inst_offset) == 1 && data.u16le(inst_offset + 76) == SCRS_MARKER {
            let sample = &mut instrument.samples[0];
            let sample_offset = ((data.u8(inst_offset + 13) as usize) << 20)
                + ((data.u16le(inst_offset + 14) as usize) << 4);
            let sample_length = (data.u32le(inst_offset + 16) as usize).min(data.len()) as i32;
            let mut loop_start = data.u32le(inst_offset + 20) as i64 as i32;
            let mut loop_length = data.u32le(inst_offset + 24) as i64 as i32 - loop_start;
            sample.volume = data.u8(inst_offset + 28);
            if data.u8(inst_offset + 30) != 0 {
                return Err(LoadError::S3mPackedSamples);
            }
            let sample_flags = data.u8(inst_offset + 31);
            if loop_start + loop_length > sample_length {
                loop_length = sample_length - loop_start;
            }
            if loop_length < 1 || sample_flags & 0x1 == 0 {
                loop_start = sample_length;
                loop_length = 0;
            }
            let sixteen_bit = sample_flags & 0x4 != 0;
            // Convert the sample's C2 rate into a note/fine-tune pair
            let tune = (log_2(data.u32le(inst_offset + 32) as i32) - log_2(module.c2_rate)) * 12;
            sample.rel_note = tune >> FP_SHIFT;
            sample.fine_tune = (tune & FP_MASK) >> (FP_SHIFT - 7);
            let mut pcm = if sixteen_bit {
                data.sam_s16le(sample_offset, sample_length as usize)
            } else {
                data.sam_s8(sample_offset, sample_length as usize)
            };
            if !signed_samples {
                for value in pcm.iter_mut() {
                    *value = ((*value as i32 & 0xFFFF) - 32768) as i16;
                }
            }
            sample.set_data(pcm, loop_start, loop_length, false);
        }
        module.instruments.push(instrument);
    }

    for _ in 0..module.num_patterns {
        let mut pattern = Pattern::new(module.num_channels, 64);
        let mut pat_offset = ((data.u16le(module_data_idx) as usize) << 4) + 2;
        let mut row = 0;
        while row < 64 {
            let token = data.u8(pat_offset);
            pat_offset += 1;
            if token == 0 {
                row += 1;
                continue;
            }
            let mut key = 0;
            let mut ins = 0;
            if token & 0x20 == 0x20 {
                // Key + instrument
                key = data.u8(pat_offset);
                ins = data.u8(pat_offset + 1);
                pat_offset += 2;
                if key < 0xFE {
                    key = (key >> 4) * 12 + (key & 0xF) + 1;
                } else if key == 0xFF {
                    key = 0;
                }
            }
            let mut volume = 0;
            if token & 0x40 == 0x40 {
                // Volume column
                volume = (data.u8(pat_offset) & 0x7F) + 0x10;
                pat_offset += 1;
                if volume > 0x50 {
                    volume = 0;
                }
            }
            let mut effect = 0;
            let mut param = 0;
            if token & 0x80 == 0x80 {
                // Effect + parameter, shifted into the unified numbering
                effect = data.u8(pat_offset);
                param = data.u8(pat_offset + 1);
                pat_offset += 2;
                if !(1..0x40).contains(&effect) {
                    effect = 0;
                    param = 0;
                } else {
                    effect += 0x80;
                }
            }
            let chan = channel_map[(token & 0x1F) as usize];
            if chan >= 0 {
                let note_offset = (row * module.num_channels + chan as usize) * 5;
                pattern.data[note_offset] = key as u8;
                pattern.data[note_offset + 1] = ins as u8;
                pattern.data[note_offset + 2] = volume as u8;
                pattern.data[note_offset + 3] = effect as u8;
                pattern.data[note_offset + 4] = param as u8;
            }
        }
        module.patterns.push(pattern);
        module_data_idx += 2;
    }
    if module.patterns.is_empty() {
        module.patterns.push(Pattern::new(module.num_channels, 64));
    }

    module.default_panning = vec![0; module.num_channels];
    for chan in 0..32 {
        if channel_map[chan] >= 0 {
            let mut panning = 7;
            if stereo_mode {
                panning = if data.u8(64 + chan) < 8 { 3 } else { 12 };
            }
            if default_pan {
                let pan_flags = data.u8(module_data_idx + chan);
                if pan_flags & 0x20 == 0x20 {
                    panning = pan_flags & 0xF;
                }
            }
            module.default_panning[channel_map[chan] as usize] = (panning * 17) as u8;
        }
    }
    debug!(
        name = %module.name,
        channels = module.num_channels,
        patterns = module.num_patterns,
        instruments = module.num_instruments,
        fast_vol_slides = module.fast_vol_slides,
        "loaded S3M module"
    );
    Ok(module)
}
