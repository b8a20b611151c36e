//! Program file layout for the S5000/S6000.
//!
//! A program file is a RIFF container with form type `APRG`: six
//! fixed header chunks (program, output, tune, two LFOs, mod matrix)
//! followed by one `kgrp` container per keygroup. Each keygroup holds
//! key location, three envelopes, a filter and four sample zones.

use super::chunk::{Chunk, ChunkSpec, Field, FormatError};

pub const RIFF_TAG: [u8; 4] = *b"RIFF";
pub const FORM_APRG: [u8; 4] = *b"APRG";
pub const KEYGROUP_TAG: [u8; 4] = *b"kgrp";

pub const MAX_KEYGROUPS: usize = 99;
pub const ZONES_PER_KEYGROUP: usize = 4;

// Chunk layouts /////////////////////////////////////////////////

pub static PROGRAM: ChunkSpec = ChunkSpec {
    tag: *b"prg ",
    fields: &[
        Field::pad(1),
        Field::u8("midi_program_number"),
        Field::u8("keygroup_count"),
        Field::pad(3),
    ],
};

pub static OUTPUT: ChunkSpec = ChunkSpec {
    tag: *b"out ",
    fields: &[
        Field::pad(1),
        Field::u8("loudness"),
        Field::u8("amp_mod_1"),
        Field::u8("amp_mod_2"),
        Field::u8("pan_mod_1"),
        Field::u8("pan_mod_2"),
        Field::u8("pan_mod_3"),
        Field::u8("velocity_sensitivity"),
    ],
};

pub static TUNE: ChunkSpec = ChunkSpec {
    tag: *b"tune",
    fields: &[
        Field::pad(1),
        Field::u8("semitone_tune"),
        Field::u8("fine_tune"),
        Field::u8("c_detune"),
        Field::u8("cs_detune"),
        Field::u8("d_detune"),
        Field::u8("ds_detune"),
        Field::u8("e_detune"),
        Field::u8("f_detune"),
        Field::u8("fs_detune"),
        Field::u8("g_detune"),
        Field::u8("gs_detune"),
        Field::u8("a_detune"),
        Field::u8("as_detune"),
        Field::u8("b_detune"),
        Field::u8("pitch_bend_up"),
        Field::u8("pitch_bend_down"),
        Field::u8("bend_mode"),
        Field::u8("aftertouch"),
        Field::pad(5),
    ],
};

pub static LFO: ChunkSpec = ChunkSpec {
    tag: *b"lfo ",
    fields: &[
        Field::pad(1),
        Field::u8("waveform"),
        Field::u8("rate"),
        Field::u8("delay"),
        Field::u8("depth"),
        Field::u8("sync"),
        Field::pad(1),
        Field::u8("modwheel"),
        Field::u8("aftertouch"),
        Field::u8("rate_mod"),
        Field::u8("delay_mod"),
        Field::u8("depth_mod"),
        Field::pad(2),
    ],
};

pub static MODS: ChunkSpec = ChunkSpec {
    tag: *b"mods",
    fields: &[
        Field::pad(2),
        Field::pad(1),
        Field::u8("amp_mod_1_source"),
        Field::pad(1),
        Field::u8("amp_mod_2_source"),
        Field::pad(1),
        Field::u8("pan_mod_1_source"),
        Field::pad(1),
        Field::u8("pan_mod_2_source"),
        Field::pad(1),
        Field::u8("pan_mod_3_source"),
        Field::pad(1),
        Field::u8("lfo1_rate_mod_source"),
        Field::pad(1),
        Field::u8("lfo1_delay_mod_source"),
        Field::pad(1),
        Field::u8("lfo1_depth_mod_source"),
        Field::pad(1),
        Field::u8("lfo2_rate_mod_source"),
        Field::pad(1),
        Field::u8("lfo2_delay_mod_source"),
        Field::pad(1),
        Field::u8("lfo2_depth_mod_source"),
        Field::pad(1),
        Field::u8("pitch_mod_1_source"),
        Field::pad(1),
        Field::u8("pitch_mod_2_source"),
        Field::pad(1),
        Field::u8("amp_mod_source"),
        Field::pad(1),
        Field::u8("filter_mod_1_source"),
        Field::pad(1),
        Field::u8("filter_mod_2_source"),
        Field::pad(1),
        Field::u8("filter_mod_3_source"),
        Field::pad(2),
    ],
};

pub static KEY_LOCATION: ChunkSpec = ChunkSpec {
    tag: *b"kloc",
    fields: &[
        Field::pad(4),
        Field::u8("low_note"),
        Field::u8("high_note"),
        Field::u8("semitone_tune"),
        Field::u8("fine_tune"),
        Field::u8("override_fx"),
        Field::u8("fx_send_level"),
        Field::u8("pitch_mod_1"),
        Field::u8("pitch_mod_2"),
        Field::u8("amp_mod"),
        Field::bool("zone_xfade"),
        Field::u8("mute_group"),
        Field::pad(1),
    ],
};

pub static ENVELOPE: ChunkSpec = ChunkSpec {
    tag: *b"env ",
    fields: &[
        Field::pad(1),
        Field::u8("attack"),
        Field::pad(1),
        Field::u8("decay"),
        Field::u8("release"),
        Field::pad(2),
        Field::u8("sustain"),
        Field::pad(2),
        Field::u8("velocity_to_attack"),
        Field::pad(1),
        Field::u8("keyscale"),
        Field::pad(1),
        Field::u8("on_velocity_to_release"),
        Field::u8("off_velocity_to_release"),
        Field::pad(2),
    ],
};

pub static FILTER: ChunkSpec = ChunkSpec {
    tag: *b"filt",
    fields: &[
        Field::pad(1),
        Field::u8("mode"),
        Field::u8("cutoff"),
        Field::u8("resonance"),
        Field::u8("keyboard_track"),
        Field::u8("mod_input_1"),
        Field::u8("mod_input_2"),
        Field::u8("mod_input_3"),
        Field::u8("headroom"),
        Field::pad(1),
    ],
};

pub static ZONE: ChunkSpec = ChunkSpec {
    tag: *b"zone",
    fields: &[
        Field::pad(1),
        Field::name("sample_name", 20),
        Field::pad(12),
        Field::u8("low_velocity"),
        Field::u8("high_velocity"),
        Field::u8("fine_tune"),
        Field::u8("semitone_tune"),
        Field::u8("filter"),
        Field::u8("pan_balance"),
        Field::u8("playback"),
        Field::u8("output"),
        Field::u8("level"),
        Field::u8("keyboard_track"),
        Field::u8("velocity_to_start_lsb"),
        Field::u8("velocity_to_start_msb"),
        Field::pad(3),
    ],
};

// Keygroup //////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct Keygroup {
    pub key_location: Chunk,
    pub amp_envelope: Chunk,
    pub filter_envelope: Chunk,
    pub aux_envelope: Chunk,
    pub filter: Chunk,
    pub zones: [Chunk; ZONES_PER_KEYGROUP],
}

impl Keygroup {
    /// A keygroup spanning the full keyboard with empty zones.
    pub fn new() -> Self {
        let mut key_location = Chunk::with_defaults(&KEY_LOCATION);
        let _ = key_location.set_u8("low_note", 21);
        let _ = key_location.set_u8("high_note", 127);
        Self {
            key_location,
            amp_envelope: Chunk::with_defaults(&ENVELOPE),
            filter_envelope: Chunk::with_defaults(&ENVELOPE),
            aux_envelope: Chunk::with_defaults(&ENVELOPE),
            filter: Chunk::with_defaults(&FILTER),
            zones: [
                Chunk::with_defaults(&ZONE),
                Chunk::with_defaults(&ZONE),
                Chunk::with_defaults(&ZONE),
                Chunk::with_defaults(&ZONE),
            ],
        }
    }

    fn parse(buffer: &[u8], offset: usize) -> Result<(Self, usize), FormatError> {
        if buffer.len() < offset + 8 {
            return Err(FormatError::Truncated {
                offset,
                needed: offset + 8 - buffer.len(),
            });
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&buffer[offset..offset + 4]);
        if found != KEYGROUP_TAG {
            return Err(FormatError::Mismatch {
                offset,
                expected: KEYGROUP_TAG,
                found,
            });
        }
        let declared = u32::from_le_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]) as usize;
        let body_end = offset + 8 + declared;
        if buffer.len() < body_end {
            return Err(FormatError::Truncated {
                offset,
                needed: body_end - buffer.len(),
            });
        }

        let mut pos = offset + 8;
        let mut next = |spec: &'static ChunkSpec| -> Result<Chunk, FormatError> {
            let (chunk, consumed) = Chunk::parse(spec, buffer, pos)?;
            pos += consumed;
            Ok(chunk)
        };
        let key_location = next(&KEY_LOCATION)?;
        let amp_envelope = next(&ENVELOPE)?;
        let filter_envelope = next(&ENVELOPE)?;
        let aux_envelope = next(&ENVELOPE)?;
        let filter = next(&FILTER)?;
        let zones = [next(&ZONE)?, next(&ZONE)?, next(&ZONE)?, next(&ZONE)?];
        if pos != body_end {
            return Err(FormatError::Truncated {
                offset: pos,
                needed: body_end.abs_diff(pos),
            });
        }
        return Ok((
            Self {
                key_location,
                amp_envelope,
                filter_envelope,
                aux_envelope,
                filter,
                zones,
            },
            8 + declared,
        ));
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        self.key_location.write(&mut body);
        self.amp_envelope.write(&mut body);
        self.filter_envelope.write(&mut body);
        self.aux_envelope.write(&mut body);
        self.filter.write(&mut body);
        for zone in &self.zones {
            zone.write(&mut body);
        }
        out.extend_from_slice(&KEYGROUP_TAG);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
    }
}

impl Default for Keygroup {
    fn default() -> Self {
        return Self::new();
    }
}

// Program ///////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct Program {
    pub program: Chunk,
    pub output: Chunk,
    pub tune: Chunk,
    pub lfo1: Chunk,
    pub lfo2: Chunk,
    pub mods: Chunk,
    pub keygroups: Vec<Keygroup>,
}

impl Program {
    /// A fresh program with `keygroup_count` default keygroups.
    pub fn new(keygroup_count: u8) -> Self {
        let mut program = Chunk::with_defaults(&PROGRAM);
        let _ = program.set_u8("keygroup_count", keygroup_count);
        let keygroups = (0..keygroup_count).map(|_| Keygroup::new()).collect();
        Self {
            program,
            output: Chunk::with_defaults(&OUTPUT),
            tune: Chunk::with_defaults(&TUNE),
            lfo1: Chunk::with_defaults(&LFO),
            lfo2: Chunk::with_defaults(&LFO),
            mods: Chunk::with_defaults(&MODS),
            keygroups,
        }
    }

    pub fn keygroup_count(&self) -> usize {
        return self.keygroups.len();
    }

    /// Parse a whole `APRG` file. The keygroup count comes from the
    /// `prg ` header chunk, not from the buffer length.
    pub fn parse(buffer: &[u8]) -> Result<Self, FormatError> {
        if buffer.len() < 12 {
            return Err(FormatError::Truncated {
                offset: 0,
                needed: 12 - buffer.len(),
            });
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&buffer[0..4]);
        if found != RIFF_TAG {
            return Err(FormatError::Mismatch {
                offset: 0,
                expected: RIFF_TAG,
                found,
            });
        }
        let riff_len = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]) as usize;
        if buffer.len() < 8 + riff_len {
            return Err(FormatError::Truncated {
                offset: 0,
                needed: 8 + riff_len - buffer.len(),
            });
        }
        found.copy_from_slice(&buffer[8..12]);
        if found != FORM_APRG {
            return Err(FormatError::Mismatch {
                offset: 8,
                expected: FORM_APRG,
                found,
            });
        }

        let mut pos = 12;
        let mut next = |spec: &'static ChunkSpec| -> Result<Chunk, FormatError> {
            let (chunk, consumed) = Chunk::parse(spec, buffer, pos)?;
            pos += consumed;
            Ok(chunk)
        };
        let program = next(&PROGRAM)?;
        let output = next(&OUTPUT)?;
        let tune = next(&TUNE)?;
        let lfo1 = next(&LFO)?;
        let lfo2 = next(&LFO)?;
        let mods = next(&MODS)?;

        let count = program.get_u8("keygroup_count")? as usize;
        let mut keygroups = Vec::with_capacity(count);
        for _ in 0..count {
            let (keygroup, consumed) = Keygroup::parse(buffer, pos)?;
            pos += consumed;
            keygroups.push(keygroup);
        }

        return Ok(Self {
            program,
            output,
            tune,
            lfo1,
            lfo2,
            mods,
            keygroups,
        });
    }

    pub fn write(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&FORM_APRG);
        self.program.write(&mut body);
        self.output.write(&mut body);
        self.tune.write(&mut body);
        self.lfo1.write(&mut body);
        self.lfo2.write(&mut body);
        self.mods.write(&mut body);
        for keygroup in &self.keygroups {
            keygroup.write(&mut body);
        }

        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&RIFF_TAG);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        return out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_body_sizes() {
        assert_eq!(PROGRAM.body_len(), 6);
        assert_eq!(OUTPUT.body_len(), 8);
        assert_eq!(TUNE.body_len(), 24);
        assert_eq!(LFO.body_len(), 14);
        assert_eq!(MODS.body_len(), 38);
        assert_eq!(KEY_LOCATION.body_len(), 16);
        assert_eq!(ENVELOPE.body_len(), 18);
        assert_eq!(FILTER.body_len(), 10);
        assert_eq!(ZONE.body_len(), 48);
    }

    #[test]
    fn test_new_program_round_trip() {
        let mut program = Program::new(2);
        program.output.set_u8("loudness", 85).unwrap();
        program.tune.set_u8("semitone_tune", 3).unwrap();
        program.keygroups[0]
            .key_location
            .set_u8("high_note", 60)
            .unwrap();
        program.keygroups[1]
            .key_location
            .set_u8("low_note", 61)
            .unwrap();
        program.keygroups[0].zones[0]
            .set_text("sample_name", "Piano C3")
            .unwrap();
        program.keygroups[0].amp_envelope.set_u8("attack", 12).unwrap();

        let bytes = program.write();
        let parsed = Program::parse(&bytes).unwrap();
        assert_eq!(parsed.keygroup_count(), 2);
        assert_eq!(parsed.output.get_u8("loudness").unwrap(), 85);
        assert_eq!(
            parsed.keygroups[0].zones[0].text("sample_name").unwrap(),
            "Piano C3"
        );
        assert_eq!(
            parsed.keygroups[0].amp_envelope.get_u8("attack").unwrap(),
            12
        );

        // bit-exact
        assert_eq!(parsed.write(), bytes);
    }

    #[test]
    fn test_riff_length_covers_everything() {
        let program = Program::new(3);
        let bytes = program.write();
        let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert_eq!(8 + declared, bytes.len());
    }

    #[test]
    fn test_keygroup_count_drives_parsing() {
        let bytes = Program::new(5).write();
        let parsed = Program::parse(&bytes).unwrap();
        assert_eq!(parsed.keygroups.len(), 5);
        assert_eq!(parsed.program.get_u8("keygroup_count").unwrap(), 5);
    }

    #[test]
    fn test_wrong_form_type() {
        let mut bytes = Program::new(1).write();
        bytes[8..12].copy_from_slice(b"AKPX");
        let err = Program::parse(&bytes).unwrap_err();
        assert_eq!(
            err,
            FormatError::Mismatch {
                offset: 8,
                expected: FORM_APRG,
                found: *b"AKPX",
            }
        );
    }

    #[test]
    fn test_misordered_chunk_reports_offset() {
        let mut bytes = Program::new(1).write();
        // corrupt the out chunk tag, first chunk after the 6-byte prg body
        let out_offset = 12 + PROGRAM.total_len();
        bytes[out_offset..out_offset + 4].copy_from_slice(b"tune");
        let err = Program::parse(&bytes).unwrap_err();
        assert_eq!(
            err,
            FormatError::Mismatch {
                offset: out_offset,
                expected: *b"out ",
                found: *b"tune",
            }
        );
    }

    #[test]
    fn test_truncated_file() {
        let bytes = Program::new(1).write();
        let err = Program::parse(&bytes[..bytes.len() - 10]).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { .. }));
    }

    #[test]
    fn test_sample_name_padding() {
        let mut program = Program::new(1);
        program.keygroups[0].zones[0]
            .set_text("sample_name", "this sample name is much too long")
            .unwrap();
        let parsed = Program::parse(&program.write()).unwrap();
        assert_eq!(
            parsed.keygroups[0].zones[0].text("sample_name").unwrap(),
            "this sample name is "
        );
    }
}
