//! ProTracker MOD loader (4-channel originals and the xCHN/xxCH descendants)

use tracing::{debug, warn};

use crate::data::Data;
use crate::error::LoadError;
use crate::module::{Instrument, Module, Pattern, Sample};
use crate::pitch::{FP_ONE, FP_SHIFT, log_2};
use crate::MAX_CHANNELS;

/// Amiga period of the highest playable key, times four
const PERIOD_TOP: i32 = 29021;

pub(crate) fn parse(data: &Data) -> Result<Module, LoadError> {
    let mut module = Module {
        name: data.ascii(0, 20),
        ..Module::default()
    };
    let sequence_len = (data.u8(950) & 0x7F) as usize;
    module.restart_pos = (data.u8(951) & 0x7F) as usize;
    if module.restart_pos >= sequence_len {
        module.restart_pos = 0;
    }
    module.sequence = vec![0; 128];
    for idx in 0..128 {
        let pat = (data.u8(952 + idx) & 0x7F) as usize;
        module.sequence[idx] = pat as u8;
        if pat >= module.num_patterns {
            module.num_patterns = pat + 1;
        }
    }
    module.sequence.truncate(sequence_len.max(1));
    match data.u16be(1082) {
        0x4b2e | 0x4b21 | 0x5434 => {
            // M.K. / M!K! / FLT4
            module.num_channels = 4;
            module.c2_rate = 8287;
            module.gain = 64;
        }
        0x484e => {
            // xCHN
            module.num_channels = (data.u8(1080) - 48) as usize;
            module.c2_rate = 8363;
            module.gain = 32;
        }
        0x4348 => {
            // xxCH
            module.num_channels = ((data.u8(1080) - 48) * 10 + data.u8(1081) - 48) as usize;
            module.c2_rate = 8363;
            module.gain = 32;
        }
        _ => return Err(LoadError::ModFormat),
    }
    if module.num_channels == 0 || module.num_channels > MAX_CHANNELS {
        warn!(
            channels = module.num_channels,
            "clamping MOD channel count to {MAX_CHANNELS}"
        );
        module.num_channels = module.num_channels.clamp(1, MAX_CHANNELS);
    }
    module.default_gvol = 64;
    module.default_speed = 6;
    module.default_tempo = 125;
    module.default_panning = (0..module.num_channels)
        .map(|idx| if idx & 3 == 1 || idx & 3 == 2 { 204 } else { 51 })
        .collect();

    let mut module_data_idx = 1084;
    let pat_data_len = module.num_channels * 64 * 5;
    for _ in 0..module.num_patterns {
        let mut pattern = Pattern::new(module.num_channels, 64);
        let mut pat_data_idx = 0;
        while pat_data_idx < pat_data_len {
            let mut period = (data.u8(module_data_idx) & 0xF) << 8;
            period = (period | data.u8(module_data_idx + 1)) * 4;
            if (112..=6848).contains(&period) {
                let mut key = -12 * log_2((period << FP_SHIFT) / PERIOD_TOP);
                key = (key + (key & (FP_ONE >> 1))) >> FP_SHIFT;
                pattern.data[pat_data_idx] = key as u8;
            }
            let ins = ((data.u8(module_data_idx + 2) & 0xF0) >> 4) | (data.u8(module_data_idx) & 0x10);
            pattern.data[pat_data_idx + 1] = ins as u8;
            let mut effect = data.u8(module_data_idx + 2) & 0x0F;
            let mut param = data.u8(module_data_idx + 3);
            if param == 0 && (effect < 3 || effect == 0xA) {
                effect = 0;
            }
            if param == 0 && (effect == 5 || effect == 6) {
                effect -= 2;
            }
            if effect == 8 && module.num_channels == 4 {
                effect = 0;
                param = 0;
            }
            pattern.data[pat_data_idx + 3] = effect as u8;
            pattern.data[pat_data_idx + 4] = param as u8;
            module_data_idx += 4;
            pat_data_idx += 5;
        }
        module.patterns.push(pattern);
    }

    module.num_instruments = 31;
    module.instruments = vec![Instrument::default()];
    for ins in 1..=module.num_instruments {
        let mut instrument = Instrument {
            name: data.ascii(ins * 30 - 10, 22),
            ..Instrument::default()
        };
        let sample = &mut instrument.samples[0];
        let sample_length = data.u16be(ins * 30 + 12) * 2;
        let fine_tune = (data.u8(ins * 30 + 14) & 0xF) << 4;
        sample.fine_tune = (fine_tune & 0x7F) - (fine_tune & 0x80);
        sample.volume = (data.u8(ins * 30 + 15) & 0x7F).min(64);
        let mut loop_start = data.u16be(ins * 30 + 16) * 2;
        let mut loop_length = data.u16be(ins * 30 + 18) * 2;
        if loop_start + loop_length > sample_length {
            loop_length = sample_length - loop_start;
        }
        if loop_length < 4 {
            loop_start = sample_length;
            loop_length = 0;
        }
        let pcm = data.sam_s8(module_data_idx, sample_length as usize);
        sample.set_data(pcm, loop_start, loop_length, false);
        module.instruments.push(instrument);
        module_data_idx += sample_length as usize;
    }
    debug!(
        name = %module.name,
        channels = module.num_channels,
        patterns = module.num_patterns,
        c2_rate = module.c2_rate,
        "loaded MOD module"
    );
    Ok(module)
}
