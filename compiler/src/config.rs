// config.rs — Optional JSON configuration file
//
// Collects the option structs of the validating, lowering and emitting
// passes. Every field has a default, so a file only needs to name what it
// changes; command-line flags are applied on top by the binary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codegen::CodegenOptions;
use crate::error::{SdfgError, SdfgResult};
use crate::lower::LowerOptions;
use crate::validate::ValidationOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub validation: ValidationOptions,
    pub lower: LowerOptions,
    pub codegen: CodegenOptions,
}

impl Config {
    pub fn from_json(text: &str) -> SdfgResult<Config> {
        serde_json::from_str(text).map_err(|e| SdfgError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> SdfgResult<Config> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| SdfgError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::WcrAnalysis;

    #[test]
    fn empty_object_gives_defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = Config::from_json(
            r#"{ "validation": { "wcr_analysis": "conservative" },
                 "codegen": { "block_size": 256 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.validation.wcr_analysis, WcrAnalysis::Conservative);
        assert!(cfg.validation.check_volumes);
        assert_eq!(cfg.codegen.block_size, 256);
        assert!(cfg.codegen.openmp);
        assert_eq!(cfg.lower, LowerOptions::default());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let err = Config::from_json(r#"{ "optimizer": {} }"#).unwrap_err();
        assert!(matches!(err, SdfgError::Config(_)));
    }
}
