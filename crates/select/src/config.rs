//! Collection-wide settings.

use rst_core::positions::PositionType;

use crate::error::{Result, SelectionError};

/// Names of the structural debug levels, indexed by level.
pub const DEBUG_LEVEL_NAMES: [&str; 5] = ["no", "basic", "compile", "eval", "full"];

/// Highest structural debug level.
pub const MAX_DEBUG_LEVEL: u8 = 4;

/// Settings shared by every selection of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionConfig {
    /// Positions geometric methods evaluate atoms at. Default: `atom`.
    pub reference_position_type: PositionType,
    /// Positions written to each selection. Default: `atom`.
    pub output_position_type: PositionType,
    /// Structural debug level, 0 (silent) to 4. Default: 0.
    pub debug_level: u8,
    /// Restore the forest when a parse or group binding fails. Default: false.
    pub rollback_on_error: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            reference_position_type: PositionType::ATOM,
            output_position_type: PositionType::ATOM,
            debug_level: 0,
            rollback_on_error: false,
        }
    }
}

/// Parse a position type name.
pub fn parse_position_type(name: &str) -> Result<PositionType> {
    name.parse().map_err(SelectionError::InvalidInput)
}

/// Parse a debug level given as a number or a level name.
pub fn parse_debug_level(value: &str) -> Result<u8> {
    let value = value.trim();
    if let Some(level) = DEBUG_LEVEL_NAMES.iter().position(|n| *n == value) {
        return Ok(level as u8);
    }
    match value.parse::<u8>() {
        Ok(level) if level <= MAX_DEBUG_LEVEL => Ok(level),
        _ => Err(SelectionError::InvalidInput(format!(
            "invalid debug level '{}' (expected 0-{} or one of {})",
            value,
            MAX_DEBUG_LEVEL,
            DEBUG_LEVEL_NAMES.join(", ")
        ))),
    }
}

impl CollectionConfig {
    /// Apply one named option: `selrpos`, `seltype` or `seldebug`.
    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "selrpos" => self.reference_position_type = parse_position_type(value)?,
            "seltype" => self.output_position_type = parse_position_type(value)?,
            "seldebug" => self.debug_level = parse_debug_level(value)?,
            other => {
                return Err(SelectionError::InvalidInput(format!(
                    "unknown selection option '{}'",
                    other
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollectionConfig::default();
        assert!(config.reference_position_type.is_atom());
        assert!(config.output_position_type.is_atom());
        assert_eq!(config.debug_level, 0);
        assert!(!config.rollback_on_error);
    }

    #[test]
    fn test_apply_option() {
        let mut config = CollectionConfig::default();
        config.apply_option("selrpos", "res_com").unwrap();
        config.apply_option("seltype", "mol_cog").unwrap();
        config.apply_option("seldebug", "compile").unwrap();
        assert_eq!(config.reference_position_type.to_string(), "res_com");
        assert!(!config.output_position_type.is_atom());
        assert_eq!(config.debug_level, 2);

        assert!(config.apply_option("seltype", "res_middle").is_err());
        assert!(config.apply_option("seldebug", "5").is_err());
        assert!(config.apply_option("selfoo", "1").is_err());
    }

    #[test]
    fn test_debug_level_names() {
        assert_eq!(parse_debug_level("full").unwrap(), 4);
        assert_eq!(parse_debug_level(" 3 ").unwrap(), 3);
        assert!(parse_debug_level("loud").is_err());
    }
}
