//! Column types shared by scanned sources and converted output.
//!
//! The same closed set of types describes both sides of a conversion: the
//! *external* type a scanner observed in a CSV column and the *destination*
//! type a [`crate::conversion::ConversionPath`] produces.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Guid,
}

impl ColumnType {
    pub const ALL: [ColumnType; 7] = [
        ColumnType::String,
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Boolean,
        ColumnType::Date,
        ColumnType::DateTime,
        ColumnType::Guid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Guid => "guid",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "string", "integer", "float", "boolean", "date", "datetime", "guid",
        ]
    }

    /// Narrowest type able to hold values of both `self` and `other`.
    ///
    /// `integer` widens to `float` and `date` widens to `datetime`; every
    /// other mix of distinct types falls back to `string`.
    pub fn common_supertype(self, other: ColumnType) -> ColumnType {
        use ColumnType as T;
        match (self, other) {
            (a, b) if a == b => a,
            (T::Integer, T::Float) | (T::Float, T::Integer) => T::Float,
            (T::Date, T::DateTime) | (T::DateTime, T::Date) => T::DateTime,
            _ => T::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "str" | "text" => Ok(ColumnType::String),
            "integer" | "int" | "long" => Ok(ColumnType::Integer),
            "float" | "double" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "date-time" | "timestamp" => Ok(ColumnType::DateTime),
            "guid" | "uuid" => Ok(ColumnType::Guid),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_accepts_aliases_case_insensitively() {
        assert_eq!(ColumnType::from_str("INT").unwrap(), ColumnType::Integer);
        assert_eq!(ColumnType::from_str(" uuid ").unwrap(), ColumnType::Guid);
        assert_eq!(
            ColumnType::from_str("timestamp").unwrap(),
            ColumnType::DateTime
        );
        let err = ColumnType::from_str("decimal").unwrap_err();
        assert!(err.to_string().contains("Supported types"));
    }

    #[test]
    fn common_supertype_widens_numeric_and_temporal_pairs() {
        use ColumnType as T;
        assert_eq!(T::Integer.common_supertype(T::Float), T::Float);
        assert_eq!(T::DateTime.common_supertype(T::Date), T::DateTime);
        assert_eq!(T::Boolean.common_supertype(T::Integer), T::String);
        assert_eq!(T::Guid.common_supertype(T::Guid), T::Guid);
    }

    #[test]
    fn serde_uses_lowercase_tokens() {
        let yaml = serde_yaml::to_string(&ColumnType::DateTime).unwrap();
        assert_eq!(yaml.trim(), "datetime");
        let parsed: ColumnType = serde_yaml::from_str("Float").unwrap();
        assert_eq!(parsed, ColumnType::Float);
    }
}
