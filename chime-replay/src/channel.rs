//! Per-voice runtime state and the row/tick effect interpreters
//!
//! A channel binds an instrument/sample pair, tracks pitch as a period plus
//! non-destructive vibrato/arpeggio add-terms, volume as a 0-64 value plus a
//! tremolo add-term, and remembers the last parameter of every effect family
//! that re-uses it on later rows. Frequency and amplitude are composed once
//! at the end of every row/tick pass.

use chime_tracker::pitch::{FP_MASK, FP_ONE, FP_SHIFT, exp_2};
use chime_tracker::{Instrument, Module, Note, Sample};

use crate::effect::Effect;

/// Quarter sine, 0..255 amplitude over 32 steps
const SINE_TABLE: [i32; 32] = [
    0, 24, 49, 74, 97, 120, 141, 161, 180, 197, 212, 224, 235, 244, 250, 253,
    255, 253, 250, 244, 235, 224, 212, 197, 180, 161, 141, 120, 97, 74, 49, 24,
];

#[derive(Debug, Clone, Default)]
pub(crate) struct Channel {
    // Current row, as delivered by the sequencer
    note_key: u8,
    note_ins: u8,
    note_vol: u8,
    effect: Effect,
    fx_param: u8,
    // Instrument driving envelopes/auto-vibrato, and the playing sample.
    // The two can diverge: an instrument change without a keyed note leaves
    // the previous waveform sounding, so the sample keeps its own
    // instrument index.
    instrument: usize,
    sample_ins: usize,
    sample: usize,
    key_on: bool,
    random_seed: i32,
    /// Pattern-loop marker row, managed by the sequencer
    pub pl_row: i32,
    // Playback position and composed output levels
    sample_off: i32,
    sample_idx: i32,
    sample_fra: i32,
    freq: i32,
    ampl: i32,
    pann: i32,
    volume: i32,
    panning: i32,
    fadeout_vol: i32,
    vol_env_tick: i32,
    pan_env_tick: i32,
    period: i32,
    porta_period: i32,
    retrig_count: i32,
    fx_count: i32,
    av_count: i32,
    // Remembered effect parameters, one slot per effect family
    porta_up_param: u8,
    porta_down_param: u8,
    tone_porta_param: u8,
    offset_param: u8,
    fine_porta_up_param: u8,
    fine_porta_down_param: u8,
    xfine_porta_param: u8,
    arpeggio_param: u8,
    vol_slide_param: u8,
    gvol_slide_param: u8,
    pan_slide_param: u8,
    fine_vslide_up_param: u8,
    fine_vslide_down_param: u8,
    retrig_volume: i32,
    retrig_ticks: i32,
    tremor_on_ticks: i32,
    tremor_off_ticks: i32,
    vibrato_type: i32,
    vibrato_phase: i32,
    vibrato_speed: i32,
    vibrato_depth: i32,
    tremolo_type: i32,
    tremolo_phase: i32,
    tremolo_speed: i32,
    tremolo_depth: i32,
    tremolo_add: i32,
    vibrato_add: i32,
    arpeggio_add: i32,
}

impl Channel {
    pub fn new(module: &Module, id: usize) -> Self {
        Self {
            panning: module.default_panning[id] as i32,
            random_seed: (id as i32 + 1).wrapping_mul(0xABCDEF),
            ..Self::default()
        }
    }

    fn instrument<'m>(&self, module: &'m Module) -> &'m Instrument {
        &module.instruments[self.instrument]
    }

    fn sample<'m>(&self, module: &'m Module) -> &'m Sample {
        &module.instruments[self.sample_ins].samples[self.sample]
    }

    // =========================================================================
    // Row and tick entry points
    // =========================================================================

    /// Apply a new pattern cell: bind instrument/sample, run the volume
    /// column, remember supplied parameters and apply row-level effects.
    pub fn row(&mut self, module: &Module, gvol: &mut i32, note: Note, effect: Effect, param: u8) {
        self.note_key = note.key;
        self.note_ins = note.instrument;
        self.note_vol = note.volume;
        self.effect = effect;
        self.fx_param = param;
        self.retrig_count += 1;
        self.vibrato_add = 0;
        self.tremolo_add = 0;
        self.arpeggio_add = 0;
        self.fx_count = 0;
        if !(effect == Effect::NoteDelay && param > 0) {
            self.trigger(module);
        }
        match effect {
            Effect::PortaUp => {
                if param > 0 {
                    self.porta_up_param = param;
                }
                self.porta_up(self.porta_up_param as i32);
            }
            Effect::PortaDown => {
                if param > 0 {
                    self.porta_down_param = param;
                }
                self.porta_down(self.porta_down_param as i32);
            }
            Effect::TonePorta => {
                if param > 0 {
                    self.tone_porta_param = param;
                }
            }
            Effect::Vibrato => {
                if param >> 4 > 0 {
                    self.vibrato_speed = (param >> 4) as i32;
                }
                if param & 0xF > 0 {
                    self.vibrato_depth = (param & 0xF) as i32;
                }
                self.vibrato(false);
            }
            Effect::TonePortaVolSlide => {
                if param > 0 {
                    self.vol_slide_param = param;
                }
                self.volume_slide(module.fast_vol_slides);
            }
            Effect::VibratoVolSlide => {
                if param > 0 {
                    self.vol_slide_param = param;
                }
                self.vibrato(false);
                self.volume_slide(module.fast_vol_slides);
            }
            Effect::Tremolo => {
                if param >> 4 > 0 {
                    self.tremolo_speed = (param >> 4) as i32;
                }
                if param & 0xF > 0 {
                    self.tremolo_depth = (param & 0xF) as i32;
                }
                self.tremolo();
            }
            Effect::SetPanning => {
                self.panning = if param < 128 { (param as i32) << 1 } else { 255 };
            }
            Effect::VolumeSlide => {
                if param > 0 {
                    self.vol_slide_param = param;
                }
                self.volume_slide(module.fast_vol_slides);
            }
            Effect::SetVolume => {
                self.volume = if param >= 64 { 64 } else { (param & 0x3F) as i32 };
            }
            Effect::SetGlobalVolume => {
                *gvol = if param >= 64 { 64 } else { (param & 0x3F) as i32 };
            }
            Effect::GlobalVolumeSlide => {
                if param > 0 {
                    self.gvol_slide_param = param;
                }
            }
            Effect::KeyOff => {
                self.key_on = false;
            }
            Effect::SetEnvelopeTick => {
                self.vol_env_tick = param as i32;
                self.pan_env_tick = param as i32;
            }
            Effect::PanningSlide => {
                if param > 0 {
                    self.pan_slide_param = param;
                }
            }
            Effect::RetrigVolSlide => {
                if param >> 4 > 0 {
                    self.retrig_volume = (param >> 4) as i32;
                }
                if param & 0xF > 0 {
                    self.retrig_ticks = (param & 0xF) as i32;
                }
                self.retrig_vol_slide();
            }
            Effect::Tremor => {
                if param >> 4 > 0 {
                    self.tremor_on_ticks = (param >> 4) as i32;
                }
                if param & 0xF > 0 {
                    self.tremor_off_ticks = (param & 0xF) as i32;
                }
                self.tremor();
            }
            Effect::ExtraFinePorta => {
                if param > 0 {
                    self.xfine_porta_param = param;
                }
                let sub = (self.xfine_porta_param & 0xF) as i32;
                match self.xfine_porta_param & 0xF0 {
                    0x10 => self.porta_up(0xE0 | sub),
                    0x20 => self.porta_down(0xE0 | sub),
                    _ => {}
                }
            }
            Effect::FinePortaUp => {
                if param > 0 {
                    self.fine_porta_up_param = param;
                }
                self.porta_up(0xF0 | (self.fine_porta_up_param & 0xF) as i32);
            }
            Effect::FinePortaDown => {
                if param > 0 {
                    self.fine_porta_down_param = param;
                }
                self.porta_down(0xF0 | (self.fine_porta_down_param & 0xF) as i32);
            }
            Effect::SetVibratoWaveform => {
                if param < 8 {
                    self.vibrato_type = param as i32;
                }
            }
            Effect::SetTremoloWaveform => {
                if param < 8 {
                    self.tremolo_type = param as i32;
                }
            }
            Effect::FineVolSlideUp => {
                if param > 0 {
                    self.fine_vslide_up_param = param;
                }
                self.volume = (self.volume + self.fine_vslide_up_param as i32).min(64);
            }
            Effect::FineVolSlideDown => {
                if param > 0 {
                    self.fine_vslide_down_param = param;
                }
                self.volume = (self.volume - self.fine_vslide_down_param as i32).max(0);
            }
            Effect::NoteCut => {
                if param == 0 {
                    self.volume = 0;
                }
            }
            Effect::Arpeggio => {
                if param > 0 {
                    self.arpeggio_param = param;
                }
            }
            Effect::FineVibrato => {
                if param >> 4 > 0 {
                    self.vibrato_speed = (param >> 4) as i32;
                }
                if param & 0xF > 0 {
                    self.vibrato_depth = (param & 0xF) as i32;
                }
                self.vibrato(true);
            }
            Effect::CoarsePanning => {
                self.panning = param as i32 * 17;
            }
            _ => {}
        }
        self.auto_vibrato(module);
        self.calculate_freq(module);
        self.calculate_ampl(module, *gvol);
        self.update_envelopes(module);
    }

    /// Re-apply continuous effects on a non-row tick.
    pub fn tick(&mut self, module: &Module, gvol: &mut i32) {
        self.vibrato_add = 0;
        self.fx_count += 1;
        self.retrig_count += 1;
        let delaying = self.effect == Effect::NoteDelay && self.fx_count <= self.fx_param as i32;
        if !delaying {
            match self.note_vol & 0xF0 {
                0x60 => {
                    // Volume slide down
                    self.volume = (self.volume - (self.note_vol & 0xF) as i32).max(0);
                }
                0x70 => {
                    // Volume slide up
                    self.volume = (self.volume + (self.note_vol & 0xF) as i32).min(64);
                }
                0xB0 => {
                    // Vibrato
                    self.vibrato_phase += self.vibrato_speed;
                    self.vibrato(false);
                }
                0xD0 => {
                    // Pan slide left
                    self.panning = (self.panning - (self.note_vol & 0xF) as i32).max(0);
                }
                0xE0 => {
                    // Pan slide right
                    self.panning = (self.panning + (self.note_vol & 0xF) as i32).min(255);
                }
                0xF0 => {
                    // Tone portamento
                    self.tone_porta();
                }
                _ => {}
            }
        }
        match self.effect {
            Effect::PortaUp => self.porta_up(self.porta_up_param as i32),
            Effect::PortaDown => self.porta_down(self.porta_down_param as i32),
            Effect::TonePorta => self.tone_porta(),
            Effect::Vibrato => {
                self.vibrato_phase += self.vibrato_speed;
                self.vibrato(false);
            }
            Effect::TonePortaVolSlide => {
                self.tone_porta();
                self.volume_slide(module.fast_vol_slides);
            }
            Effect::VibratoVolSlide => {
                self.vibrato_phase += self.vibrato_speed;
                self.vibrato(false);
                self.volume_slide(module.fast_vol_slides);
            }
            Effect::Tremolo => {
                self.tremolo_phase += self.tremolo_speed;
                self.tremolo();
            }
            Effect::VolumeSlide => self.volume_slide(module.fast_vol_slides),
            Effect::GlobalVolumeSlide => {
                let up = (self.gvol_slide_param >> 4) as i32;
                let down = (self.gvol_slide_param & 0xF) as i32;
                *gvol = (*gvol + up - down).clamp(0, 64);
            }
            Effect::PanningSlide => {
                let right = (self.pan_slide_param >> 4) as i32;
                let left = (self.pan_slide_param & 0xF) as i32;
                self.panning = (self.panning + right - left).clamp(0, 255);
            }
            Effect::RetrigVolSlide => self.retrig_vol_slide(),
            Effect::Tremor => self.tremor(),
            Effect::Retrig => {
                if self.fx_count >= self.fx_param as i32 {
                    self.fx_count = 0;
                    self.sample_idx = 0;
                    self.sample_fra = 0;
                }
            }
            Effect::NoteCut => {
                if self.fx_param as i32 == self.fx_count {
                    self.volume = 0;
                }
            }
            Effect::NoteDelay => {
                if self.fx_param as i32 == self.fx_count {
                    self.trigger(module);
                }
            }
            Effect::Arpeggio => {
                if self.fx_count == 1 {
                    self.arpeggio_add = (self.arpeggio_param >> 4) as i32;
                } else if self.fx_count == 2 {
                    self.arpeggio_add = (self.arpeggio_param & 0xF) as i32;
                } else {
                    self.arpeggio_add = 0;
                    self.fx_count = 0;
                }
            }
            Effect::FineVibrato => {
                self.vibrato_phase += self.vibrato_speed;
                self.vibrato(true);
            }
            _ => {}
        }
        self.auto_vibrato(module);
        self.calculate_freq(module);
        self.calculate_ampl(module, *gvol);
        self.update_envelopes(module);
    }

    // =========================================================================
    // Note triggering
    // =========================================================================

    fn trigger(&mut self, module: &Module) {
        let ins = self.note_ins as usize;
        if ins > 0 && ins <= module.num_instruments {
            self.instrument = ins;
            let instrument = self.instrument(module);
            let key = if self.note_key < 97 { self.note_key as usize } else { 0 };
            let sam = instrument.key_to_sample[key] as usize;
            let sample = &instrument.samples[sam];
            self.volume = if sample.volume >= 64 { 64 } else { sample.volume & 0x3F };
            if sample.panning > 0 {
                self.panning = (sample.panning - 1) & 0xFF;
            }
            if self.period > 0 && sample.loop_length > 1 {
                // Amiga trigger: swap the playing waveform in place
                self.sample_ins = self.instrument;
                self.sample = sam;
            }
            self.sample_off = 0;
            self.vol_env_tick = 0;
            self.pan_env_tick = 0;
            self.fadeout_vol = 32768;
            self.key_on = true;
        }
        if self.effect == Effect::SampleOffset {
            if self.fx_param > 0 {
                self.offset_param = self.fx_param;
            }
            self.sample_off = (self.offset_param as i32) << 8;
        }
        // Volume column
        if (0x10..0x60).contains(&self.note_vol) {
            self.volume = if self.note_vol < 0x50 {
                (self.note_vol - 0x10) as i32
            } else {
                64
            };
        }
        match self.note_vol & 0xF0 {
            0x80 => {
                // Fine volume down
                self.volume = (self.volume - (self.note_vol & 0xF) as i32).max(0);
            }
            0x90 => {
                // Fine volume up
                self.volume = (self.volume + (self.note_vol & 0xF) as i32).min(64);
            }
            0xA0 => {
                // Set vibrato speed
                if self.note_vol & 0xF > 0 {
                    self.vibrato_speed = (self.note_vol & 0xF) as i32;
                }
            }
            0xB0 => {
                // Vibrato
                if self.note_vol & 0xF > 0 {
                    self.vibrato_depth = (self.note_vol & 0xF) as i32;
                }
                self.vibrato(false);
            }
            0xC0 => {
                // Set panning
                self.panning = (self.note_vol & 0xF) as i32 * 17;
            }
            0xF0 => {
                // Tone portamento
                if self.note_vol & 0xF > 0 {
                    self.tone_porta_param = self.note_vol & 0xF;
                }
            }
            _ => {}
        }
        if self.note_key > 0 {
            if self.note_key > 96 {
                self.key_on = false;
            } else {
                let porta = self.note_vol & 0xF0 == 0xF0
                    || matches!(self.effect, Effect::TonePorta | Effect::TonePortaVolSlide);
                if !porta {
                    let sam = self.instrument(module).key_to_sample[self.note_key as usize];
                    self.sample_ins = self.instrument;
                    self.sample = sam as usize;
                }
                let mut fine_tune = self.sample(module).fine_tune;
                if self.effect == Effect::SetFineTune {
                    fine_tune = (((self.fx_param & 0xF) as i32) << 4) - 128;
                }
                let key = (self.note_key as i32 + self.sample(module).rel_note).clamp(1, 120);
                let period = (key << 6) + (fine_tune >> 1);
                if module.linear_periods {
                    self.porta_period = 7744 - period;
                } else {
                    self.porta_period =
                        (29021 * exp_2((period << FP_SHIFT) / -768)) >> FP_SHIFT;
                }
                if !porta {
                    self.period = self.porta_period;
                    self.sample_idx = self.sample_off;
                    self.sample_fra = 0;
                    if self.vibrato_type < 4 {
                        self.vibrato_phase = 0;
                    }
                    if self.tremolo_type < 4 {
                        self.tremolo_phase = 0;
                    }
                    self.retrig_count = 0;
                    self.av_count = 0;
                }
            }
        }
    }

    // =========================================================================
    // Effect helpers
    // =========================================================================

    fn volume_slide(&mut self, fast_slides: bool) {
        let up = (self.vol_slide_param >> 4) as i32;
        let down = (self.vol_slide_param & 0xF) as i32;
        if down == 0xF && up > 0 {
            // Fine slide up
            if self.fx_count == 0 {
                self.volume += up;
            }
        } else if up == 0xF && down > 0 {
            // Fine slide down
            if self.fx_count == 0 {
                self.volume -= down;
            }
        } else if self.fx_count > 0 || fast_slides {
            self.volume += up - down;
        }
        self.volume = self.volume.clamp(0, 64);
    }

    fn porta_up(&mut self, param: i32) {
        match param & 0xF0 {
            0xE0 => {
                // Extra-fine
                if self.fx_count == 0 {
                    self.period -= param & 0xF;
                }
            }
            0xF0 => {
                // Fine
                if self.fx_count == 0 {
                    self.period -= (param & 0xF) << 2;
                }
            }
            _ => {
                if self.fx_count > 0 {
                    self.period -= param << 2;
                }
            }
        }
        if self.period < 0 {
            self.period = 0;
        }
    }

    fn porta_down(&mut self, param: i32) {
        if self.period > 0 {
            match param & 0xF0 {
                0xE0 => {
                    if self.fx_count == 0 {
                        self.period += param & 0xF;
                    }
                }
                0xF0 => {
                    if self.fx_count == 0 {
                        self.period += (param & 0xF) << 2;
                    }
                }
                _ => {
                    if self.fx_count > 0 {
                        self.period += param << 2;
                    }
                }
            }
            if self.period > 65535 {
                self.period = 65535;
            }
        }
    }

    fn tone_porta(&mut self) {
        if self.period > 0 {
            if self.period < self.porta_period {
                self.period += (self.tone_porta_param as i32) << 2;
                if self.period > self.porta_period {
                    self.period = self.porta_period;
                }
            } else {
                self.period -= (self.tone_porta_param as i32) << 2;
                if self.period < self.porta_period {
                    self.period = self.porta_period;
                }
            }
        }
    }

    fn waveform(&mut self, phase: i32, wave_type: i32) -> i32 {
        match wave_type {
            6 => {
                // Saw up
                (((phase + 0x20) & 0x3F) << 3) - 255
            }
            1 | 7 => {
                // Saw down
                255 - (((phase + 0x20) & 0x3F) << 3)
            }
            2 | 5 => {
                // Square
                if phase & 0x20 > 0 { 255 } else { -255 }
            }
            3 | 8 => {
                // Random, stepped by a per-channel generator
                let amplitude = (self.random_seed >> 20) - 255;
                self.random_seed = (self.random_seed.wrapping_mul(65) + 17) & 0x1FFFFFFF;
                amplitude
            }
            _ => {
                // Sine
                let amplitude = SINE_TABLE[(phase & 0x1F) as usize];
                if phase & 0x20 > 0 { -amplitude } else { amplitude }
            }
        }
    }

    fn vibrato(&mut self, fine: bool) {
        let wave = self.waveform(self.vibrato_phase, self.vibrato_type & 0x3);
        self.vibrato_add = wave * self.vibrato_depth >> if fine { 7 } else { 5 };
    }

    fn tremolo(&mut self) {
        let wave = self.waveform(self.tremolo_phase, self.tremolo_type & 0x3);
        self.tremolo_add = wave * self.tremolo_depth >> 6;
    }

    fn tremor(&mut self) {
        if self.retrig_count >= self.tremor_on_ticks {
            self.tremolo_add = -64;
        }
        if self.retrig_count >= self.tremor_on_ticks + self.tremor_off_ticks {
            self.tremolo_add = 0;
            self.retrig_count = 0;
        }
    }

    fn retrig_vol_slide(&mut self) {
        if self.retrig_count >= self.retrig_ticks {
            self.retrig_count = 0;
            self.sample_idx = 0;
            self.sample_fra = 0;
            self.volume = match self.retrig_volume {
                0x1 => self.volume - 1,
                0x2 => self.volume - 2,
                0x3 => self.volume - 4,
                0x4 => self.volume - 8,
                0x5 => self.volume - 16,
                0x6 => self.volume * 2 / 3,
                0x7 => self.volume >> 1,
                0x9 => self.volume + 1,
                0xA => self.volume + 2,
                0xB => self.volume + 4,
                0xC => self.volume + 8,
                0xD => self.volume + 16,
                0xE => self.volume * 3 / 2,
                0xF => self.volume << 1,
                _ => self.volume,
            }
            .clamp(0, 64);
        }
    }

    // =========================================================================
    // Per-tick composition
    // =========================================================================

    fn update_envelopes(&mut self, module: &Module) {
        let instrument = self.instrument(module);
        if instrument.vol_env.enabled {
            if !self.key_on {
                self.fadeout_vol = (self.fadeout_vol - instrument.vol_fadeout).max(0);
            }
            self.vol_env_tick = instrument.vol_env.next_tick(self.vol_env_tick, self.key_on);
        }
        if instrument.pan_env.enabled {
            self.pan_env_tick = instrument.pan_env.next_tick(self.pan_env_tick, self.key_on);
        }
    }

    /// Instrument-level vibrato with a sweep ramp; its tick counter survives
    /// note changes.
    fn auto_vibrato(&mut self, module: &Module) {
        let instrument = self.instrument(module);
        let mut depth = instrument.vib_depth & 0x7F;
        if depth > 0 {
            let sweep = instrument.vib_sweep & 0x7F;
            let rate = instrument.vib_rate & 0x7F;
            let vib_type = instrument.vib_type;
            if self.av_count < sweep {
                depth = depth * self.av_count / sweep;
            }
            let wave = self.waveform(self.av_count * rate >> 2, vib_type + 4);
            self.vibrato_add += wave * depth >> 8;
            self.av_count += 1;
        }
    }

    fn calculate_freq(&mut self, module: &Module) {
        let mut per = self.period + self.vibrato_add;
        if module.linear_periods {
            per -= self.arpeggio_add << 6;
            if !(28..=7680).contains(&per) {
                per = 7680;
            }
            self.freq = ((module.c2_rate >> 4) * exp_2(((4608 - per) << FP_SHIFT) / 768))
                >> (FP_SHIFT - 4);
        } else {
            if per > 29021 {
                per = 29021;
            }
            per = (((per as i64) << FP_SHIFT) / exp_2((self.arpeggio_add << FP_SHIFT) / 12) as i64)
                as i32;
            if per < 28 {
                per = 29021;
            }
            self.freq = module.c2_rate * 1712 / per;
        }
    }

    fn calculate_ampl(&mut self, module: &Module, gvol: i32) {
        let instrument = self.instrument(module);
        let mut env_vol = if self.key_on { 64 } else { 0 };
        if instrument.vol_env.enabled {
            env_vol = instrument.vol_env.ampl(self.vol_env_tick);
        }
        let mut vol = (self.volume + self.tremolo_add).clamp(0, 64);
        vol = (vol * module.gain * FP_ONE) >> 13;
        vol = (vol * self.fadeout_vol) >> 15;
        self.ampl = (vol * gvol * env_vol) >> 12;
        let mut env_pan = 32;
        if instrument.pan_env.enabled {
            env_pan = instrument.pan_env.ampl(self.pan_env_tick);
        }
        let range = if self.panning < 128 {
            self.panning
        } else {
            255 - self.panning
        };
        self.pann = self.panning + (range * (env_pan - 32) >> 5);
    }

    // =========================================================================
    // Resampling
    // =========================================================================

    /// Mix `count` stereo frames into `mix_buf` at twice the output rate,
    /// without advancing the stored playback position.
    pub fn resample(
        &self,
        module: &Module,
        mix_buf: &mut [i32],
        offset: usize,
        count: usize,
        sample_rate: i32,
        interpolate: bool,
    ) {
        if self.ampl <= 0 {
            return;
        }
        let sample = self.sample(module);
        let sample_data = &sample.data;
        let l_gain = self.ampl * (255 - self.pann) >> 8;
        let r_gain = self.ampl * self.pann >> 8;
        let mut sam_idx = self.sample_idx;
        let mut sam_fra = self.sample_fra;
        let step = ((self.freq as i64) << (FP_SHIFT - 3)) / ((sample_rate >> 3) as i64);
        let step = step as i32;
        let loop_len = sample.loop_length;
        let loop_end = sample.loop_start + loop_len;
        let mut out_idx = offset * 2;
        let out_end = (offset + count) * 2;
        while out_idx < out_end {
            if sam_idx >= loop_end {
                if loop_len > 1 {
                    while sam_idx >= loop_end {
                        sam_idx -= loop_len;
                    }
                } else {
                    break;
                }
            }
            let y = if interpolate {
                let c = sample_data[sam_idx as usize] as i32;
                let m = sample_data[sam_idx as usize + 1] as i32 - c;
                ((m * sam_fra) >> FP_SHIFT) + c
            } else {
                sample_data[sam_idx as usize] as i32
            };
            mix_buf[out_idx] += (y * l_gain) >> FP_SHIFT;
            mix_buf[out_idx + 1] += (y * r_gain) >> FP_SHIFT;
            out_idx += 2;
            sam_fra += step;
            sam_idx += sam_fra >> FP_SHIFT;
            sam_fra &= FP_MASK;
        }
    }

    /// Advance the playback position by `count` frames at twice the output
    /// rate, wrapping into the loop region.
    pub fn update_sample_idx(&mut self, module: &Module, count: i32, sample_rate: i32) {
        let sample = self.sample(module);
        let step = ((self.freq as i64) << (FP_SHIFT - 3)) / ((sample_rate >> 3) as i64);
        let fra = self.sample_fra as i64 + step * count as i64;
        self.sample_idx += (fra >> FP_SHIFT) as i32;
        if self.sample_idx > sample.loop_start {
            if sample.loop_length > 1 {
                self.sample_idx = sample.loop_start
                    + (self.sample_idx - sample.loop_start) % sample.loop_length;
            } else {
                self.sample_idx = sample.loop_start;
            }
        }
        self.sample_fra = (fra & FP_MASK as i64) as i32;
    }
}
