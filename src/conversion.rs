//! Conversion paths from external column types to output value types.
//!
//! A [`ConversionPath`] names a converter that turns a raw text cell of a
//! given external type into a typed [`Value`] of its destination type. The set
//! of paths is owned by a [`ConversionRegistry`], which is always passed
//! explicitly to the code that needs it. [`StandardRegistry`] is the built-in
//! registry for CSV sources.

use std::fmt;

use anyhow::{Result, anyhow};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, parse_naive_date, parse_typed_value},
    types::ColumnType,
};

/// Opaque, serializable identifier of a converter within its registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConverterId(String);

impl ConverterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConverterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversionPath {
    pub source: ColumnType,
    pub destination: ColumnType,
    pub converter: ConverterId,
}

impl fmt::Display for ConversionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.converter)
    }
}

pub trait ConversionRegistry {
    /// The designated default path for `external`. Must be total.
    fn default_for(&self, external: ColumnType) -> ConversionPath;

    /// Every path accepting `external`, the default included.
    fn available_for(&self, external: ColumnType) -> Vec<ConversionPath>;

    /// Looks up a persisted converter id.
    fn resolve(&self, converter: &ConverterId) -> Option<ConversionPath>;

    /// Converts one raw cell along `path`. Empty cells convert to `None`.
    fn convert(&self, path: &ConversionPath, raw: &str) -> Result<Option<Value>>;

    /// Path for `external` whose destination is `destination`, if offered.
    fn path_to(&self, external: ColumnType, destination: ColumnType) -> Option<ConversionPath> {
        self.available_for(external)
            .into_iter()
            .find(|path| path.destination == destination)
    }
}

/// Registry of the CSV converters. Each external type converts to itself by
/// default and can also be read as text; a few lossless widenings are offered
/// on top.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRegistry;

impl StandardRegistry {
    pub fn new() -> Self {
        StandardRegistry
    }

    fn destinations(external: ColumnType) -> &'static [ColumnType] {
        use ColumnType as T;
        match external {
            T::String => &[T::String],
            T::Integer => &[T::Integer, T::Float, T::String],
            T::Float => &[T::Float, T::String],
            T::Boolean => &[T::Boolean, T::Integer, T::String],
            T::Date => &[T::Date, T::DateTime, T::String],
            T::DateTime => &[T::DateTime, T::Date, T::String],
            T::Guid => &[T::Guid, T::String],
        }
    }

    fn path(source: ColumnType, destination: ColumnType) -> ConversionPath {
        ConversionPath {
            source,
            destination,
            converter: ConverterId::new(format!("{source}->{destination}")),
        }
    }
}

impl ConversionRegistry for StandardRegistry {
    fn default_for(&self, external: ColumnType) -> ConversionPath {
        Self::path(external, Self::destinations(external)[0])
    }

    fn available_for(&self, external: ColumnType) -> Vec<ConversionPath> {
        Self::destinations(external)
            .iter()
            .map(|destination| Self::path(external, *destination))
            .collect()
    }

    fn resolve(&self, converter: &ConverterId) -> Option<ConversionPath> {
        let (source, destination) = converter.as_str().split_once("->")?;
        let source = source.parse::<ColumnType>().ok()?;
        let destination = destination.parse::<ColumnType>().ok()?;
        Self::destinations(source)
            .contains(&destination)
            .then(|| Self::path(source, destination))
    }

    fn convert(&self, path: &ConversionPath, raw: &str) -> Result<Option<Value>> {
        if raw.is_empty() {
            return Ok(None);
        }
        if path.destination == ColumnType::String {
            return Ok(Some(Value::String(raw.to_string())));
        }
        let Some(parsed) = parse_source(raw, path.source)? else {
            return Ok(None);
        };
        let converted = match (parsed, path.destination) {
            (value, destination) if value.column_type() == destination => value,
            (Value::Integer(i), ColumnType::Float) => Value::Float(i as f64),
            (Value::Boolean(b), ColumnType::Integer) => Value::Integer(i64::from(b)),
            (Value::Date(d), ColumnType::DateTime) => Value::DateTime(d.and_time(NaiveTime::MIN)),
            (Value::DateTime(dt), ColumnType::Date) => Value::Date(dt.date()),
            (value, destination) => {
                return Err(anyhow!(
                    "No converter from {} to {destination}",
                    value.column_type()
                ));
            }
        };
        Ok(Some(converted))
    }
}

/// Parses `raw` as the path's source type. A `datetime` source also takes
/// date-only cells at midnight, as items scanned as `date` are read through
/// a widened `datetime` column.
fn parse_source(raw: &str, source: ColumnType) -> Result<Option<Value>> {
    match parse_typed_value(raw, source) {
        Err(err) if source == ColumnType::DateTime => match parse_naive_date(raw.trim()) {
            Ok(date) => Ok(Some(Value::DateTime(date.and_time(NaiveTime::MIN)))),
            Err(_) => Err(err),
        },
        parsed => parsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn default_path_converts_each_type_to_itself() {
        let registry = StandardRegistry::new();
        for ty in ColumnType::ALL {
            let path = registry.default_for(ty);
            assert_eq!(path.source, ty);
            assert_eq!(path.destination, ty);
            assert_eq!(registry.available_for(ty)[0], path);
        }
    }

    #[test]
    fn every_type_can_be_read_as_string() {
        let registry = StandardRegistry::new();
        for ty in ColumnType::ALL {
            assert!(registry.path_to(ty, ColumnType::String).is_some());
        }
    }

    #[test]
    fn resolve_round_trips_converter_ids() {
        let registry = StandardRegistry::new();
        let path = registry
            .path_to(ColumnType::Integer, ColumnType::Float)
            .unwrap();
        assert_eq!(path.converter.as_str(), "integer->float");
        assert_eq!(registry.resolve(&path.converter), Some(path));
        assert_eq!(registry.resolve(&ConverterId::new("string->guid")), None);
        assert_eq!(registry.resolve(&ConverterId::new("garbage")), None);
    }

    #[test]
    fn convert_applies_widening_conversions() {
        let registry = StandardRegistry::new();
        let to_float = registry
            .path_to(ColumnType::Integer, ColumnType::Float)
            .unwrap();
        assert_eq!(
            registry.convert(&to_float, "42").unwrap(),
            Some(Value::Float(42.0))
        );

        let to_datetime = registry
            .path_to(ColumnType::Date, ColumnType::DateTime)
            .unwrap();
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            registry.convert(&to_datetime, "2024-03-01").unwrap(),
            Some(Value::DateTime(midnight))
        );

        let bool_to_int = registry
            .path_to(ColumnType::Boolean, ColumnType::Integer)
            .unwrap();
        assert_eq!(
            registry.convert(&bool_to_int, "yes").unwrap(),
            Some(Value::Integer(1))
        );
    }

    #[test]
    fn convert_to_string_keeps_raw_text() {
        let registry = StandardRegistry::new();
        let path = registry
            .path_to(ColumnType::Integer, ColumnType::String)
            .unwrap();
        assert_eq!(
            registry.convert(&path, "007").unwrap(),
            Some(Value::String("007".to_string()))
        );
        assert_eq!(registry.convert(&path, "").unwrap(), None);
    }

    #[test]
    fn datetime_sources_accept_date_only_cells() {
        let registry = StandardRegistry::new();
        let midnight = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let path = registry.default_for(ColumnType::DateTime);
        assert_eq!(
            registry.convert(&path, "2024-01-02").unwrap(),
            Some(Value::DateTime(midnight))
        );

        let to_date = registry
            .path_to(ColumnType::DateTime, ColumnType::Date)
            .unwrap();
        assert_eq!(
            registry.convert(&to_date, "2024-01-02").unwrap(),
            Some(Value::Date(midnight.date()))
        );
        assert!(registry.convert(&path, "yesterday").is_err());
    }

    #[test]
    fn convert_reports_unparseable_cells() {
        let registry = StandardRegistry::new();
        let path = registry.default_for(ColumnType::Integer);
        assert!(registry.convert(&path, "abc").is_err());
    }
}
