//! Fixed lookup from legacy column types to `UniversalType`.
//!
//! Names are matched case-insensitively. MySQL spellings and the older
//! Sybase/SQL Server spellings found in legacy schemas share one table.

use sync_core::{SourceType, UniversalType};

/// Longest VARCHAR PostgreSQL accepts; longer declarations become TEXT.
const MAX_VARCHAR_LENGTH: u32 = 10_485_760;

/// Decimal shape used when the catalog reports none.
const DEFAULT_DECIMAL: (u8, u8) = (18, 0);

/// Map a source type, or `None` when it has no destination equivalent.
pub fn map_source_type(source: &SourceType) -> Option<UniversalType> {
    let ty = match source.name.as_str() {
        "bool" | "boolean" => UniversalType::Bool,
        "bit" => match source.length.or(source.precision.map(u32::from)) {
            None | Some(1) => UniversalType::Bool,
            Some(_) => UniversalType::Bytes,
        },

        "tinyint" | "smallint" | "year" => {
            if source.unsigned && source.name == "smallint" {
                UniversalType::Int32
            } else {
                UniversalType::Int16
            }
        }
        "mediumint" => UniversalType::Int32,
        "int" | "integer" => {
            if source.unsigned {
                UniversalType::Int64
            } else {
                UniversalType::Int32
            }
        }
        "bigint" => {
            if source.unsigned {
                UniversalType::decimal(20, 0)
            } else {
                UniversalType::Int64
            }
        }

        "decimal" | "numeric" | "dec" | "fixed" => {
            let (default_p, default_s) = DEFAULT_DECIMAL;
            UniversalType::decimal(
                source.precision.unwrap_or(default_p),
                source.scale.unwrap_or(default_s),
            )
        }
        "money" => UniversalType::decimal(19, 4),
        "smallmoney" => UniversalType::decimal(10, 4),

        "real" => UniversalType::Float32,
        "float" | "double" | "double precision" => UniversalType::Float64,

        "char" | "nchar" => match source.length {
            Some(length) if length > 0 && length <= MAX_VARCHAR_LENGTH => {
                UniversalType::char(length)
            }
            _ => UniversalType::Text,
        },
        "varchar" | "nvarchar" | "univarchar" => match source.length {
            Some(length) if length > 0 && length <= MAX_VARCHAR_LENGTH => {
                UniversalType::varchar(length)
            }
            _ => UniversalType::Text,
        },
        "text" | "tinytext" | "mediumtext" | "longtext" | "ntext" | "unitext" => UniversalType::Text,

        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "image" => {
            UniversalType::Bytes
        }

        "date" => UniversalType::Date,
        "time" => UniversalType::Time,
        "datetime" | "smalldatetime" | "timestamp" | "bigdatetime" => UniversalType::Timestamp,

        _ => return None,
    };
    Some(ty)
}

/// Whether a source default expression means "the current time".
pub fn is_current_timestamp_default(default: &str) -> bool {
    let normalized = default.trim().to_ascii_lowercase();
    let normalized = normalized.trim_end_matches("()");
    matches!(
        normalized,
        "current_timestamp" | "now" | "getdate" | "localtimestamp" | "sysdatetime"
    ) || normalized.starts_with("current_timestamp(")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(name: &str) -> Option<UniversalType> {
        map_source_type(&SourceType::new(name))
    }

    #[test]
    fn test_integers() {
        assert_eq!(map("INT"), Some(UniversalType::Int32));
        assert_eq!(map("tinyint"), Some(UniversalType::Int16));
        assert_eq!(map("bigint"), Some(UniversalType::Int64));
        assert_eq!(
            map_source_type(&SourceType::new("int").unsigned()),
            Some(UniversalType::Int64)
        );
        assert_eq!(
            map_source_type(&SourceType::new("bigint").unsigned()),
            Some(UniversalType::decimal(20, 0))
        );
    }

    #[test]
    fn test_fixed_precision_numeric_keeps_shape() {
        let ty = SourceType::new("decimal").with_precision(12, 3);
        assert_eq!(map_source_type(&ty), Some(UniversalType::decimal(12, 3)));
        assert_eq!(map("numeric"), Some(UniversalType::decimal(18, 0)));
        assert_eq!(map("money"), Some(UniversalType::decimal(19, 4)));
    }

    #[test]
    fn test_text_types() {
        let ty = SourceType::new("varchar").with_length(120);
        assert_eq!(map_source_type(&ty), Some(UniversalType::varchar(120)));
        let huge = SourceType::new("varchar").with_length(20_000_000);
        assert_eq!(map_source_type(&huge), Some(UniversalType::Text));
        assert_eq!(map("longtext"), Some(UniversalType::Text));
        let fixed = SourceType::new("char").with_length(2);
        assert_eq!(map_source_type(&fixed), Some(UniversalType::char(2)));
    }

    #[test]
    fn test_legacy_datetime_maps_to_timestamp() {
        assert_eq!(map("datetime"), Some(UniversalType::Timestamp));
        assert_eq!(map("smalldatetime"), Some(UniversalType::Timestamp));
        assert_eq!(map("date"), Some(UniversalType::Date));
    }

    #[test]
    fn test_bits() {
        assert_eq!(map("bit"), Some(UniversalType::Bool));
        let wide = SourceType::new("bit").with_length(8);
        assert_eq!(map_source_type(&wide), Some(UniversalType::Bytes));
    }

    #[test]
    fn test_unmapped_types() {
        for name in ["json", "enum", "set", "geometry", "point", "xml", "uniqueidentifier"] {
            assert_eq!(map(name), None, "{name} should be unsupported");
        }
    }

    #[test]
    fn test_current_timestamp_defaults() {
        assert!(is_current_timestamp_default("CURRENT_TIMESTAMP"));
        assert!(is_current_timestamp_default("current_timestamp()"));
        assert!(is_current_timestamp_default("CURRENT_TIMESTAMP(6)"));
        assert!(is_current_timestamp_default("getdate()"));
        assert!(is_current_timestamp_default("now()"));
        assert!(!is_current_timestamp_default("'2020-01-01 00:00:00'"));
    }
}
