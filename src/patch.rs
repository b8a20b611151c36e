//! S-330 patch and tone data blocks.
//!
//! These are the denibblized memory images the bulk transfers move around:
//! a patch is a 256-byte block, a tone is 128 bytes. Offsets below mirror
//! the parameter catalogs under `schema/`.

use crate::error::AppError;

type Result<T> = std::result::Result<T, AppError>;

pub const NUM_PATCHES: usize = 32;
pub const NUM_TONES: usize = 32;
/// Tones transfer in banks of this many during full-range loads.
pub const TONE_BANK_SIZE: usize = 8;

pub const PATCH_DATA_SIZE: usize = 256;
pub const TONE_DATA_SIZE: usize = 128;

/// Key map covers MIDI notes 12..=120.
pub const TONE_MAP_LEN: usize = 109;
pub const TONE_MAP_LOW_KEY: u8 = 12;

pub const PATCH_NAME_LEN: usize = 12;
pub const TONE_NAME_LEN: usize = 8;

// Patch block offsets ///////////////////////////////////////////

pub const PATCH_BEND_RANGE: usize = 12;
pub const PATCH_AFTERTOUCH_SENSE: usize = 13;
pub const PATCH_KEY_MODE: usize = 14;
pub const PATCH_VELOCITY_SW_THRESHOLD: usize = 15;
pub const PATCH_TONE_MAP_A: usize = 16;
pub const PATCH_TONE_MAP_B: usize = 125;
pub const PATCH_OCTAVE_SHIFT: usize = 234;
pub const PATCH_OUTPUT_ASSIGN: usize = 235;
pub const PATCH_OUTPUT_LEVEL: usize = 236;
pub const PATCH_DETUNE: usize = 237;

// Tone block offsets ////////////////////////////////////////////

pub const TONE_ORIG_SUB_TONE: usize = 8;
pub const TONE_FREQUENCY_COARSE: usize = 9;
pub const TONE_FREQUENCY_FINE: usize = 10;
pub const TONE_WAVE_BANK: usize = 11;
pub const TONE_WAVE_NUMBER: usize = 12;
pub const TONE_WAVE_SEGMENT_TOP: usize = 13;
pub const TONE_WAVE_SEGMENT_LENGTH: usize = 14;
pub const TONE_LOOP_MODE: usize = 15;
pub const TONE_TVF_CUTOFF: usize = 16;
pub const TONE_TVF_RESONANCE: usize = 17;
pub const TONE_TVF_KEY_FOLLOW: usize = 18;
pub const TONE_TVF_LFO_DEPTH: usize = 19;
pub const TONE_TVF_ENV: usize = 20;
pub const TONE_TVA_LEVEL: usize = 38;
pub const TONE_TVA_LFO_DEPTH: usize = 39;
pub const TONE_TVA_ENV: usize = 40;
pub const TONE_LFO_MODE: usize = 58;
pub const TONE_LFO_RATE: usize = 59;
pub const TONE_LFO_DELAY: usize = 60;
pub const TONE_LFO_PITCH_DEPTH: usize = 61;
pub const TONE_PITCH_FOLLOW: usize = 62;
pub const TONE_ENV_MODE: usize = 63;

pub const ENVELOPE_SIZE: usize = 18;
pub const ENVELOPE_POINTS: usize = 8;

/// Bytes past these offsets are reserved in the respective blocks; the
/// device ignores writes there, so narrow edits must not land in them.
pub const PATCH_MAPPED_END: usize = PATCH_DETUNE + 1;
pub const TONE_MAPPED_END: usize = TONE_ENV_MODE + 1;

// Envelope //////////////////////////////////////////////////////

/// An 8-point envelope. The block layout is sustain point, end point,
/// eight levels, eight rates. The sustain point must come before the
/// end point or the device loops the tail forever. Points are numbered
/// 0..=7 for sustain and 1..=8 for end; rates run 1..=127, a rate of
/// zero stalls the device's envelope generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sustain_point: u8,
    end_point: u8,
    pub levels: [u8; ENVELOPE_POINTS],
    pub rates: [u8; ENVELOPE_POINTS],
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            sustain_point: 0,
            end_point: 1,
            levels: [0; ENVELOPE_POINTS],
            rates: [1; ENVELOPE_POINTS],
        }
    }

    pub fn sustain_point(&self) -> u8 {
        return self.sustain_point;
    }

    pub fn end_point(&self) -> u8 {
        return self.end_point;
    }

    pub fn set_sustain_point(&mut self, point: u8) -> Result<()> {
        if point >= self.end_point {
            return Err(AppError::invalid_value(&format!(
                "sustain point {} must come before end point {}",
                point, self.end_point
            )));
        }
        self.sustain_point = point;
        return Ok(());
    }

    pub fn set_end_point(&mut self, point: u8) -> Result<()> {
        if point as usize > ENVELOPE_POINTS || point <= self.sustain_point {
            return Err(AppError::invalid_value(&format!(
                "end point {} must follow sustain point {}",
                point, self.sustain_point
            )));
        }
        self.end_point = point;
        return Ok(());
    }

    /// Device memory is taken as-is. An inverted pair is logged, not
    /// rejected, so an odd block can still be inspected and repaired.
    pub fn from_bytes(bytes: &[u8; ENVELOPE_SIZE]) -> Self {
        let sustain_point = bytes[0];
        let end_point = bytes[1];
        if sustain_point >= end_point {
            log::warn!(
                "envelope has sustain point {} at or past end point {}",
                sustain_point,
                end_point
            );
        }
        let mut levels = [0u8; ENVELOPE_POINTS];
        levels.copy_from_slice(&bytes[2..10]);
        let mut rates = [0u8; ENVELOPE_POINTS];
        rates.copy_from_slice(&bytes[10..18]);
        Self {
            sustain_point,
            end_point,
            levels,
            rates,
        }
    }

    pub fn to_bytes(&self) -> [u8; ENVELOPE_SIZE] {
        let mut bytes = [0u8; ENVELOPE_SIZE];
        bytes[0] = self.sustain_point;
        bytes[1] = self.end_point;
        bytes[2..10].copy_from_slice(&self.levels);
        bytes[10..18].copy_from_slice(&self.rates);
        return bytes;
    }
}

impl Default for Envelope {
    fn default() -> Self {
        return Self::new();
    }
}

// Names /////////////////////////////////////////////////////////

fn decode_name(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    return text.trim_end_matches([' ', '\0']).to_string();
}

fn encode_name(name: &str, slots: &mut [u8]) {
    slots.fill(b' ');
    for (slot, byte) in slots.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
}

// Patch /////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub name: String,
    pub bend_range: u8,
    pub aftertouch_sense: u8,
    pub key_mode: u8,
    pub velocity_sw_threshold: u8,
    /// Tone index per key, MIDI notes 12..=120.
    pub tone_map_a: [u8; TONE_MAP_LEN],
    pub tone_map_b: [u8; TONE_MAP_LEN],
    pub octave_shift: u8,
    pub output_assign: u8,
    pub output_level: u8,
    pub detune: u8,
}

impl Patch {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            bend_range: 2,
            aftertouch_sense: 0,
            key_mode: 0,
            velocity_sw_threshold: 0,
            tone_map_a: [0; TONE_MAP_LEN],
            tone_map_b: [0; TONE_MAP_LEN],
            octave_shift: 0,
            output_assign: 0,
            output_level: 100,
            detune: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PATCH_DATA_SIZE {
            return Err(AppError::new(
                crate::error::ErrorType::Truncated,
                format!("patch block is {} bytes, expected {}", bytes.len(), PATCH_DATA_SIZE),
            ));
        }
        let mut tone_map_a = [0u8; TONE_MAP_LEN];
        tone_map_a.copy_from_slice(&bytes[PATCH_TONE_MAP_A..PATCH_TONE_MAP_A + TONE_MAP_LEN]);
        let mut tone_map_b = [0u8; TONE_MAP_LEN];
        tone_map_b.copy_from_slice(&bytes[PATCH_TONE_MAP_B..PATCH_TONE_MAP_B + TONE_MAP_LEN]);
        return Ok(Self {
            name: decode_name(&bytes[0..PATCH_NAME_LEN]),
            bend_range: bytes[PATCH_BEND_RANGE],
            aftertouch_sense: bytes[PATCH_AFTERTOUCH_SENSE],
            key_mode: bytes[PATCH_KEY_MODE],
            velocity_sw_threshold: bytes[PATCH_VELOCITY_SW_THRESHOLD],
            tone_map_a,
            tone_map_b,
            octave_shift: bytes[PATCH_OCTAVE_SHIFT],
            output_assign: bytes[PATCH_OUTPUT_ASSIGN],
            output_level: bytes[PATCH_OUTPUT_LEVEL],
            detune: bytes[PATCH_DETUNE],
        });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; PATCH_DATA_SIZE];
        encode_name(&self.name, &mut bytes[0..PATCH_NAME_LEN]);
        bytes[PATCH_BEND_RANGE] = self.bend_range;
        bytes[PATCH_AFTERTOUCH_SENSE] = self.aftertouch_sense;
        bytes[PATCH_KEY_MODE] = self.key_mode;
        bytes[PATCH_VELOCITY_SW_THRESHOLD] = self.velocity_sw_threshold;
        bytes[PATCH_TONE_MAP_A..PATCH_TONE_MAP_A + TONE_MAP_LEN].copy_from_slice(&self.tone_map_a);
        bytes[PATCH_TONE_MAP_B..PATCH_TONE_MAP_B + TONE_MAP_LEN].copy_from_slice(&self.tone_map_b);
        bytes[PATCH_OCTAVE_SHIFT] = self.octave_shift;
        bytes[PATCH_OUTPUT_ASSIGN] = self.output_assign;
        bytes[PATCH_OUTPUT_LEVEL] = self.output_level;
        bytes[PATCH_DETUNE] = self.detune;
        return bytes;
    }

    /// Patch a single byte in place, by block offset. Keeps a cached
    /// entity in step with a narrow write already sent to the device.
    pub fn set_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        if offset >= PATCH_MAPPED_END {
            return Err(AppError::invalid_value(&format!(
                "offset {} is in the reserved tail of the patch block",
                offset
            )));
        }
        let mut bytes = self.to_bytes();
        bytes[offset] = value;
        *self = Self::from_bytes(&bytes)?;
        return Ok(());
    }

    /// Tone index sounding for `key` on the primary map, if the key is
    /// inside the mapped range.
    pub fn tone_for_key(&self, key: u8) -> Option<u8> {
        let index = key.checked_sub(TONE_MAP_LOW_KEY)? as usize;
        return self.tone_map_a.get(index).copied();
    }
}

impl Default for Patch {
    fn default() -> Self {
        return Self::new();
    }
}

// Tone //////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tone {
    pub name: String,
    pub orig_sub_tone: u8,
    pub frequency_coarse: u8,
    pub frequency_fine: u8,
    pub wave_bank: u8,
    pub wave_number: u8,
    pub wave_segment_top: u8,
    pub wave_segment_length: u8,
    pub loop_mode: u8,
    pub tvf_cutoff: u8,
    pub tvf_resonance: u8,
    pub tvf_key_follow: u8,
    pub tvf_lfo_depth: u8,
    pub tvf_env: Envelope,
    pub tva_level: u8,
    pub tva_lfo_depth: u8,
    pub tva_env: Envelope,
    pub lfo_mode: u8,
    pub lfo_rate: u8,
    pub lfo_delay: u8,
    pub lfo_pitch_depth: u8,
    pub pitch_follow: u8,
    pub env_mode: u8,
}

impl Tone {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            orig_sub_tone: 0,
            frequency_coarse: 60,
            frequency_fine: 0,
            wave_bank: 0,
            wave_number: 0,
            wave_segment_top: 0,
            wave_segment_length: 0,
            loop_mode: 0,
            tvf_cutoff: 127,
            tvf_resonance: 0,
            tvf_key_follow: 0,
            tvf_lfo_depth: 0,
            tvf_env: Envelope::new(),
            tva_level: 100,
            tva_lfo_depth: 0,
            tva_env: Envelope::new(),
            lfo_mode: 0,
            lfo_rate: 0,
            lfo_delay: 0,
            lfo_pitch_depth: 0,
            pitch_follow: 1,
            env_mode: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TONE_DATA_SIZE {
            return Err(AppError::new(
                crate::error::ErrorType::Truncated,
                format!("tone block is {} bytes, expected {}", bytes.len(), TONE_DATA_SIZE),
            ));
        }
        let mut tvf_env_bytes = [0u8; ENVELOPE_SIZE];
        tvf_env_bytes.copy_from_slice(&bytes[TONE_TVF_ENV..TONE_TVF_ENV + ENVELOPE_SIZE]);
        let mut tva_env_bytes = [0u8; ENVELOPE_SIZE];
        tva_env_bytes.copy_from_slice(&bytes[TONE_TVA_ENV..TONE_TVA_ENV + ENVELOPE_SIZE]);
        return Ok(Self {
            name: decode_name(&bytes[0..TONE_NAME_LEN]),
            orig_sub_tone: bytes[TONE_ORIG_SUB_TONE],
            frequency_coarse: bytes[TONE_FREQUENCY_COARSE],
            frequency_fine: bytes[TONE_FREQUENCY_FINE],
            wave_bank: bytes[TONE_WAVE_BANK],
            wave_number: bytes[TONE_WAVE_NUMBER],
            wave_segment_top: bytes[TONE_WAVE_SEGMENT_TOP],
            wave_segment_length: bytes[TONE_WAVE_SEGMENT_LENGTH],
            loop_mode: bytes[TONE_LOOP_MODE],
            tvf_cutoff: bytes[TONE_TVF_CUTOFF],
            tvf_resonance: bytes[TONE_TVF_RESONANCE],
            tvf_key_follow: bytes[TONE_TVF_KEY_FOLLOW],
            tvf_lfo_depth: bytes[TONE_TVF_LFO_DEPTH],
            tvf_env: Envelope::from_bytes(&tvf_env_bytes),
            tva_level: bytes[TONE_TVA_LEVEL],
            tva_lfo_depth: bytes[TONE_TVA_LFO_DEPTH],
            tva_env: Envelope::from_bytes(&tva_env_bytes),
            lfo_mode: bytes[TONE_LFO_MODE],
            lfo_rate: bytes[TONE_LFO_RATE],
            lfo_delay: bytes[TONE_LFO_DELAY],
            lfo_pitch_depth: bytes[TONE_LFO_PITCH_DEPTH],
            pitch_follow: bytes[TONE_PITCH_FOLLOW],
            env_mode: bytes[TONE_ENV_MODE],
        });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; TONE_DATA_SIZE];
        encode_name(&self.name, &mut bytes[0..TONE_NAME_LEN]);
        bytes[TONE_ORIG_SUB_TONE] = self.orig_sub_tone;
        bytes[TONE_FREQUENCY_COARSE] = self.frequency_coarse;
        bytes[TONE_FREQUENCY_FINE] = self.frequency_fine;
        bytes[TONE_WAVE_BANK] = self.wave_bank;
        bytes[TONE_WAVE_NUMBER] = self.wave_number;
        bytes[TONE_WAVE_SEGMENT_TOP] = self.wave_segment_top;
        bytes[TONE_WAVE_SEGMENT_LENGTH] = self.wave_segment_length;
        bytes[TONE_LOOP_MODE] = self.loop_mode;
        bytes[TONE_TVF_CUTOFF] = self.tvf_cutoff;
        bytes[TONE_TVF_RESONANCE] = self.tvf_resonance;
        bytes[TONE_TVF_KEY_FOLLOW] = self.tvf_key_follow;
        bytes[TONE_TVF_LFO_DEPTH] = self.tvf_lfo_depth;
        bytes[TONE_TVF_ENV..TONE_TVF_ENV + ENVELOPE_SIZE]
            .copy_from_slice(&self.tvf_env.to_bytes());
        bytes[TONE_TVA_LEVEL] = self.tva_level;
        bytes[TONE_TVA_LFO_DEPTH] = self.tva_lfo_depth;
        bytes[TONE_TVA_ENV..TONE_TVA_ENV + ENVELOPE_SIZE]
            .copy_from_slice(&self.tva_env.to_bytes());
        bytes[TONE_LFO_MODE] = self.lfo_mode;
        bytes[TONE_LFO_RATE] = self.lfo_rate;
        bytes[TONE_LFO_DELAY] = self.lfo_delay;
        bytes[TONE_LFO_PITCH_DEPTH] = self.lfo_pitch_depth;
        bytes[TONE_PITCH_FOLLOW] = self.pitch_follow;
        bytes[TONE_ENV_MODE] = self.env_mode;
        return bytes;
    }

    pub fn set_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        if offset >= TONE_MAPPED_END {
            return Err(AppError::invalid_value(&format!(
                "offset {} is in the reserved tail of the tone block",
                offset
            )));
        }
        let mut bytes = self.to_bytes();
        bytes[offset] = value;
        *self = Self::from_bytes(&bytes)?;
        return Ok(());
    }
}

impl Default for Tone {
    fn default() -> Self {
        return Self::new();
    }
}
