//! Parameter catalogs.
//!
//! Editable parameters live in yaml files under `schema/`, one file per
//! entity. Each entry names a byte offset inside the entity's data block
//! and the value range the device accepts. Narrow writes go through the
//! catalog so an out-of-range value is caught before it reaches the wire.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::AppError;

#[cfg(not(test))]
use log::error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub offset: usize,
    pub min: u8,
    pub max: u8,
}

impl ParamDef {
    pub fn check(&self, value: u8) -> Result<(), AppError> {
        if value < self.min || value > self.max {
            return Err(AppError::invalid_value(&format!(
                "{} must be {}..={}, got {}",
                self.name, self.min, self.max, value
            )));
        }
        return Ok(());
    }
}

/// Entity description used tentatively during catalog loading.
/// Catalog yaml files use this shape.
#[derive(Debug, Clone, Deserialize)]
struct EntityDesc {
    pub entity: String,
    pub data_size: usize,
    pub params: Vec<ParamDef>,
}

/// Entity definition used internally for parameter lookups.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub entity: String,
    pub data_size: usize,
    pub params: BTreeMap<String, ParamDef>,
}

impl EntityDef {
    fn from_desc(desc: EntityDesc) -> Self {
        let mut def = Self {
            entity: desc.entity,
            data_size: desc.data_size,
            params: BTreeMap::new(),
        };
        for param in desc.params {
            def.params.insert(param.name.clone(), param);
        }
        return def;
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        return self.params.get(name);
    }
}

lazy_static! {
    pub static ref PARAM_SCHEMA: BTreeMap<String, EntityDef> = load_params("schema");
}

pub fn patch_param(name: &str) -> Option<&'static ParamDef> {
    return PARAM_SCHEMA.get("patch")?.get(name);
}

pub fn tone_param(name: &str) -> Option<&'static ParamDef> {
    return PARAM_SCHEMA.get("tone")?.get(name);
}

/// Catalog loader
pub fn load_params<P: AsRef<Path>>(directory: P) -> BTreeMap<String, EntityDef> {
    let mut catalog = BTreeMap::new();

    for entry in WalkDir::new(directory) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if entry.file_type().is_file() {
            let path = entry.path();
            if let Some(ext) = path.extension() {
                if ext == "yaml" || ext == "yml" {
                    match fs::read_to_string(path) {
                        Ok(content) => match serde_yaml::from_str::<EntityDesc>(&content) {
                            Ok(desc) => {
                                catalog.insert(desc.entity.clone(), EntityDef::from_desc(desc));
                            }
                            Err(e) => error!("YAML parse error in {:?}: {}", path, e),
                        },
                        Err(e) => error!("File read error in {:?}: {}", path, e),
                    }
                }
            }
        }
    }

    return catalog;
}

#[cfg(test)]
use std::eprintln as error;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch;

    #[test]
    fn test_catalog_loading() {
        let catalog = load_params("schema");
        assert_eq!(catalog.len(), 2);

        let Some(entry) = catalog.get("patch") else {
            panic!("the patch entry must be found");
        };
        assert_eq!(entry.entity, "patch");
        assert_eq!(entry.data_size, patch::PATCH_DATA_SIZE);

        let Some(output_level) = entry.get("output_level") else {
            panic!("output_level entry not found");
        };
        assert_eq!(output_level.offset, patch::PATCH_OUTPUT_LEVEL);
        assert_eq!(output_level.min, 0);
        assert_eq!(output_level.max, 127);

        let Some(bend_range) = entry.get("bend_range") else {
            panic!("bend_range entry not found");
        };
        assert_eq!(bend_range.offset, patch::PATCH_BEND_RANGE);
        assert_eq!(bend_range.max, 12);
    }

    #[test]
    fn test_tone_catalog_matches_block_layout() {
        let catalog = load_params("schema");
        let Some(entry) = catalog.get("tone") else {
            panic!("the tone entry must be found");
        };
        assert_eq!(entry.data_size, patch::TONE_DATA_SIZE);

        assert_eq!(entry.get("tvf_cutoff").unwrap().offset, patch::TONE_TVF_CUTOFF);
        assert_eq!(entry.get("lfo_rate").unwrap().offset, patch::TONE_LFO_RATE);
        // envelope points: two indices, then eight levels, then eight rates
        assert_eq!(
            entry.get("tvf_env_level_1").unwrap().offset,
            patch::TONE_TVF_ENV + 2
        );
        assert_eq!(
            entry.get("tvf_env_rate_8").unwrap().offset,
            patch::TONE_TVF_ENV + 17
        );
        assert_eq!(
            entry.get("tva_env_level_1").unwrap().offset,
            patch::TONE_TVA_ENV + 2
        );
        assert_eq!(
            entry.get("tva_env_sustain_point").unwrap().max,
            (patch::ENVELOPE_POINTS - 1) as u8
        );
        // end points run 1..=8; a zero rate stalls the envelope generator
        assert_eq!(
            entry.get("tvf_env_end_point").unwrap().max,
            patch::ENVELOPE_POINTS as u8
        );
        assert_eq!(
            entry.get("tva_env_end_point").unwrap().max,
            patch::ENVELOPE_POINTS as u8
        );
        assert_eq!(entry.get("tvf_env_rate_1").unwrap().min, 1);
        assert_eq!(entry.get("tva_env_rate_8").unwrap().min, 1);
        assert!(entry.get("tva_env_rate_1").unwrap().check(0).is_err());
        assert!(entry.get("tva_env_end_point").unwrap().check(8).is_ok());
    }

    #[test]
    fn test_param_range_check() {
        let param = ParamDef {
            name: "bend_range".to_string(),
            offset: 12,
            min: 0,
            max: 12,
        };
        assert!(param.check(0).is_ok());
        assert!(param.check(12).is_ok());
        let err = param.check(13).unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::InvalidValue);
    }
}
