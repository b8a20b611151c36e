//! Device client.
//!
//! One `DeviceClient` talks to one sampler on one device id. It owns the
//! handshake engine and a cache of entities already pulled from device
//! memory; repeated reads of the same patch or tone are served from the
//! cache until it is invalidated. Narrow parameter writes go out as
//! one-byte bulk transfers and patch the cached entity in place, so the
//! cache stays truthful without a re-read.

use std::collections::HashMap;

use crate::address;
use crate::error::{AppError, ErrorType};
use crate::handshake::Handshake;
use crate::params;
use crate::patch::{
    ENVELOPE_POINTS, NUM_PATCHES, NUM_TONES, PATCH_DATA_SIZE, Patch, TONE_BANK_SIZE,
    TONE_DATA_SIZE, Tone,
};
use crate::sysex;

type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Tvf,
    Tva,
}

impl EnvelopeKind {
    fn prefix(&self) -> &'static str {
        match self {
            EnvelopeKind::Tvf => "tvf",
            EnvelopeKind::Tva => "tva",
        }
    }
}

/// Device addresses step per nibble; byte `offset` into an entity block
/// sits two address units per byte past the block base.
fn offset_address(base: [u8; 4], byte_offset: usize) -> [u8; 4] {
    return sysex::encode_size(sysex::decode_size(&base) + (byte_offset * 2) as u32);
}

pub struct DeviceClient {
    handshake: Handshake,
    device_id: u8,
    patches: HashMap<u8, Patch>,
    tones: HashMap<u8, Tone>,
}

impl DeviceClient {
    pub fn new(handshake: Handshake, device_id: u8) -> Result<Self> {
        if device_id > sysex::MAX_DEVICE_ID {
            return Err(AppError::invalid_index(device_id, sysex::MAX_DEVICE_ID));
        }
        return Ok(Self {
            handshake,
            device_id,
            patches: HashMap::new(),
            tones: HashMap::new(),
        });
    }

    pub fn device_id(&self) -> u8 {
        return self.device_id;
    }

    // Patches ///////////////////////////////////////////////////

    /// Fetch one patch. `Ok(None)` means the device never answered,
    /// which is how an empty MIDI chain presents.
    pub async fn request_patch_data(&mut self, index: u8) -> Result<Option<Patch>> {
        if index as usize >= NUM_PATCHES {
            return Err(AppError::invalid_index(index, NUM_PATCHES as u8));
        }
        if let Some(patch) = self.patches.get(&index) {
            log::debug!("patch {} served from cache", index);
            return Ok(Some(patch.clone()));
        }
        let data = match self
            .handshake
            .bulk_read(self.device_id, address::patch(index, 0), PATCH_DATA_SIZE as u32)
            .await
        {
            Ok(data) => data,
            Err(e) if e.error_type == ErrorType::Timeout => {
                log::debug!("patch {} request timed out", index);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let patch = Patch::from_bytes(&data)?;
        self.patches.insert(index, patch.clone());
        return Ok(Some(patch));
    }

    pub async fn send_patch_data(&mut self, index: u8, patch: &Patch) -> Result<()> {
        if index as usize >= NUM_PATCHES {
            return Err(AppError::invalid_index(index, NUM_PATCHES as u8));
        }
        self.handshake
            .bulk_write(self.device_id, address::patch(index, 0), &patch.to_bytes())
            .await?;
        self.patches.insert(index, patch.clone());
        return Ok(());
    }

    /// Write one patch parameter by catalog name.
    pub async fn set_patch_param(&mut self, index: u8, name: &str, value: u8) -> Result<()> {
        if index as usize >= NUM_PATCHES {
            return Err(AppError::invalid_index(index, NUM_PATCHES as u8));
        }
        let Some(param) = params::patch_param(name) else {
            return Err(AppError::invalid_value(&format!(
                "unknown patch parameter: {}",
                name
            )));
        };
        param.check(value)?;
        let target = offset_address(address::patch(index, 0), param.offset);
        self.handshake
            .bulk_write(self.device_id, target, &[value])
            .await?;
        if let Some(patch) = self.patches.get_mut(&index) {
            patch.set_byte(param.offset, value)?;
        }
        return Ok(());
    }

    pub async fn set_patch_level(&mut self, index: u8, level: u8) -> Result<()> {
        return self.set_patch_param(index, "output_level", level).await;
    }

    // Tones /////////////////////////////////////////////////////

    pub async fn request_tone_data(&mut self, index: u8) -> Result<Option<Tone>> {
        if index as usize >= NUM_TONES {
            return Err(AppError::invalid_index(index, NUM_TONES as u8));
        }
        if let Some(tone) = self.tones.get(&index) {
            log::debug!("tone {} served from cache", index);
            return Ok(Some(tone.clone()));
        }
        let data = match self
            .handshake
            .bulk_read(self.device_id, address::tone(index, 0), TONE_DATA_SIZE as u32)
            .await
        {
            Ok(data) => data,
            Err(e) if e.error_type == ErrorType::Timeout => {
                log::debug!("tone {} request timed out", index);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let tone = Tone::from_bytes(&data)?;
        self.tones.insert(index, tone.clone());
        return Ok(Some(tone));
    }

    pub async fn send_tone_data(&mut self, index: u8, tone: &Tone) -> Result<()> {
        if index as usize >= NUM_TONES {
            return Err(AppError::invalid_index(index, NUM_TONES as u8));
        }
        self.handshake
            .bulk_write(self.device_id, address::tone(index, 0), &tone.to_bytes())
            .await?;
        self.tones.insert(index, tone.clone());
        return Ok(());
    }

    pub async fn set_tone_param(&mut self, index: u8, name: &str, value: u8) -> Result<()> {
        if index as usize >= NUM_TONES {
            return Err(AppError::invalid_index(index, NUM_TONES as u8));
        }
        let Some(param) = params::tone_param(name) else {
            return Err(AppError::invalid_value(&format!(
                "unknown tone parameter: {}",
                name
            )));
        };
        param.check(value)?;
        let target = offset_address(address::tone(index, 0), param.offset);
        self.handshake
            .bulk_write(self.device_id, target, &[value])
            .await?;
        if let Some(tone) = self.tones.get_mut(&index) {
            tone.set_byte(param.offset, value)?;
        }
        return Ok(());
    }

    pub async fn set_tone_envelope_level(
        &mut self,
        index: u8,
        kind: EnvelopeKind,
        point: u8,
        value: u8,
    ) -> Result<()> {
        if point as usize >= ENVELOPE_POINTS {
            return Err(AppError::invalid_index(point, ENVELOPE_POINTS as u8));
        }
        let name = format!("{}_env_level_{}", kind.prefix(), point + 1);
        return self.set_tone_param(index, &name, value).await;
    }

    pub async fn set_tone_envelope_rate(
        &mut self,
        index: u8,
        kind: EnvelopeKind,
        point: u8,
        value: u8,
    ) -> Result<()> {
        if point as usize >= ENVELOPE_POINTS {
            return Err(AppError::invalid_index(point, ENVELOPE_POINTS as u8));
        }
        let name = format!("{}_env_rate_{}", kind.prefix(), point + 1);
        return self.set_tone_param(index, &name, value).await;
    }

    /// Pull `count` tones from `start`, serially, paged in banks of
    /// [`TONE_BANK_SIZE`]. `progress` fires after every entity with
    /// (attempted, count) and always ends at the count; `each` fires per
    /// tone that actually answered. Silent tones are skipped, not fatal:
    /// a half-populated device is normal.
    pub async fn request_tone_range(
        &mut self,
        start: u8,
        count: u8,
        progress: &mut dyn FnMut(usize, usize),
        mut each: Option<&mut dyn FnMut(u8, &Tone)>,
    ) -> Result<()> {
        let end = start as usize + count as usize;
        if end > NUM_TONES {
            return Err(AppError::invalid_index(
                start.saturating_add(count),
                NUM_TONES as u8,
            ));
        }
        let mut loaded = 0;
        let mut attempted = 0;
        for bank_start in (start as usize..end).step_by(TONE_BANK_SIZE) {
            let bank_end = (bank_start + TONE_BANK_SIZE).min(end);
            log::debug!("loading tone bank {}..{}", bank_start, bank_end);
            for index in bank_start..bank_end {
                match self.request_tone_data(index as u8).await? {
                    Some(tone) => {
                        loaded += 1;
                        if let Some(callback) = each.as_mut() {
                            callback(index as u8, &tone);
                        }
                    }
                    None => {
                        log::warn!("tone {} did not answer, skipping", index);
                    }
                }
                attempted += 1;
                progress(attempted, count as usize);
            }
        }
        log::info!("loaded {} of {} tones", loaded, count);
        return Ok(());
    }

    // System parameters /////////////////////////////////////////

    pub async fn request_system_param(&self, offset: u8, len: u32) -> Result<Option<Vec<u8>>> {
        return self
            .handshake
            .direct_request(self.device_id, address::system(offset), len)
            .await;
    }

    /// Returns whether the device confirmed the write.
    pub async fn set_system_param(&self, offset: u8, data: Vec<u8>) -> Result<bool> {
        return self
            .handshake
            .direct_set(self.device_id, address::system(offset), data)
            .await;
    }

    // Cache control /////////////////////////////////////////////

    pub fn invalidate_patch_cache(&mut self, index: u8) {
        self.patches.remove(&index);
    }

    pub fn invalidate_tone_cache(&mut self, index: u8) {
        self.tones.remove(&index);
    }

    /// Call after the MIDI chain was re-plugged or the device power
    /// cycled; every cached entity may be stale.
    pub fn reconnect(&mut self) {
        log::info!("dropping cached entities for device {}", self.device_id);
        self.patches.clear();
        self.tones.clear();
    }
}
