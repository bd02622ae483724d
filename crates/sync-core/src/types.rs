//! Core data types for legacy-sync.
//!
//! This module defines `UniversalType`, the type universe that source column
//! types are translated into before destination DDL is derived.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Universal data type representation for legacy-sync.
///
/// `UniversalType` is the conceptual type of a column, independent of the
/// legacy source's spelling of it. The schema translator maps each source type
/// through a fixed lookup table into one of these variants, and each
/// destination derives its DDL from it via the [`ToDdl`] trait.
///
/// # Serialized Format
///
/// ```json
/// {"type": "var_char", "length": 255}
/// {"type": "decimal", "precision": 10, "scale": 2}
/// {"type": "timestamp"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UniversalType {
    // Boolean
    /// Boolean value
    Bool,

    // Integer types (sized)
    /// 16-bit signed integer
    Int16,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    // Floating point
    /// 32-bit IEEE 754 floating point
    Float32,

    /// 64-bit IEEE 754 floating point
    Float64,

    // Exact numeric
    /// Exact decimal with specified precision and scale
    Decimal {
        /// Total number of digits
        precision: u8,
        /// Number of digits after the decimal point
        scale: u8,
    },

    // String types
    /// Fixed-length character string
    Char {
        /// Maximum length
        length: u32,
    },

    /// Variable-length character string with max length
    VarChar {
        /// Maximum length
        length: u32,
    },

    /// Unlimited text
    Text,

    // Binary types
    /// Binary data
    Bytes,

    // Temporal types
    /// Date only (YYYY-MM-DD)
    Date,

    /// Time only (HH:MM:SS)
    Time,

    /// Timestamp without timezone (microsecond precision)
    Timestamp,
}

/// Trait for generating DDL statements from `UniversalType`.
///
/// Each destination implements this trait to generate appropriate DDL for
/// creating tables with the correct column types.
pub trait ToDdl {
    /// Generate DDL type definition for the given `UniversalType`.
    fn to_ddl(&self, sync_type: &UniversalType) -> String;
}

impl UniversalType {
    /// Create a new Decimal type with the given precision and scale.
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self::Decimal { precision, scale }
    }

    /// Create a new Char type with the given length.
    pub fn char(length: u32) -> Self {
        Self::Char { length }
    }

    /// Create a new VarChar type with the given length.
    pub fn varchar(length: u32) -> Self {
        Self::VarChar { length }
    }

    /// Whether values of this type are totally ordered in a way both databases
    /// agree on, which is what a change-tracking column needs.
    pub fn is_watermark_capable(&self) -> bool {
        matches!(
            self,
            Self::Int16 | Self::Int32 | Self::Int64 | Self::Date | Self::Timestamp
        )
    }

    /// Whether this is one of the integer types.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Whether this is one of the character string types.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Char { .. } | Self::VarChar { .. } | Self::Text)
    }
}

impl fmt::Display for UniversalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int16 => write!(f, "int16"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::Char { length } => write!(f, "char({length})"),
            Self::VarChar { length } => write!(f, "varchar({length})"),
            Self::Text => write!(f, "text"),
            Self::Bytes => write!(f, "bytes"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::Timestamp => write!(f, "timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let ty = UniversalType::decimal(10, 2);
        let json = serde_json::to_value(&ty).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "decimal", "precision": 10, "scale": 2})
        );

        let parsed: UniversalType =
            serde_json::from_str(r#"{"type": "var_char", "length": 64}"#).unwrap();
        assert_eq!(parsed, UniversalType::varchar(64));
    }

    #[test]
    fn test_watermark_capable_types() {
        assert!(UniversalType::Timestamp.is_watermark_capable());
        assert!(UniversalType::Int64.is_watermark_capable());
        assert!(UniversalType::Date.is_watermark_capable());
        assert!(!UniversalType::Text.is_watermark_capable());
        assert!(!UniversalType::Float64.is_watermark_capable());
        assert!(!UniversalType::decimal(10, 2).is_watermark_capable());
    }

    #[test]
    fn test_display() {
        assert_eq!(UniversalType::varchar(12).to_string(), "varchar(12)");
        assert_eq!(UniversalType::decimal(19, 4).to_string(), "decimal(19,4)");
    }
}
