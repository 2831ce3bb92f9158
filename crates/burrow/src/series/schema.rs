//! Named value schemas.
//!
//! A [`ValueSchema`] maps raw value-array slots to field names, e.g.
//! `0 => "Open"`, `1 => "Close"`, `4 => "Volume"`. Schemas are pure metadata:
//! entries are stored as raw arrays and projected only when a caller asks for
//! named values.
//!
//! Schemas are registered once through [`SchemaRegistryBuilder`] and the
//! resulting [`SchemaRegistry`] is immutable.

use crate::error::{Result, SeriesError};
use crate::series::segment::MAX_VALUES_PER_ENTRY;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered `(slot, name)` mapping for one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSchema {
    slots: Vec<(usize, Arc<str>)>,
}

impl ValueSchema {
    /// Creates a schema.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::SchemaMismatch` for a duplicate slot or name, or
    /// for a slot no stored entry could reach.
    pub fn new<N: Into<Arc<str>>>(slots: impl IntoIterator<Item = (usize, N)>) -> Result<Self> {
        let mut out: Vec<(usize, Arc<str>)> = Vec::new();
        for (slot, name) in slots {
            let name = name.into();
            if slot >= MAX_VALUES_PER_ENTRY {
                return Err(SeriesError::SchemaMismatch(format!(
                    "slot {slot} of field '{name}' is past the limit of {MAX_VALUES_PER_ENTRY} values"
                )));
            }
            if out.iter().any(|(s, _)| *s == slot) {
                return Err(SeriesError::SchemaMismatch(format!(
                    "slot {slot} mapped twice"
                )));
            }
            if out.iter().any(|(_, n)| *n == name) {
                return Err(SeriesError::SchemaMismatch(format!(
                    "field '{name}' mapped twice"
                )));
            }
            out.push((slot, name));
        }
        Ok(Self { slots: out })
    }

    /// The `(slot, name)` pairs in declaration order.
    pub fn slots(&self) -> &[(usize, Arc<str>)] {
        &self.slots
    }

    /// Number of raw slots needed to hold every mapped field.
    pub fn width(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|(s, _)| s.checked_add(1))
            .max()
            .unwrap_or(0)
    }

    /// Returns the slot mapped to `name`.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|(_, n)| n.as_ref() == name)
            .map(|(s, _)| *s)
    }

    /// Projects a raw value array into named form.
    ///
    /// Slots beyond the array read as `0.0`; values in unmapped slots are
    /// dropped.
    pub fn project(&self, values: &[f64]) -> NamedValues {
        let fields = self
            .slots
            .iter()
            .map(|(slot, name)| (Arc::clone(name), values.get(*slot).copied().unwrap_or(0.0)))
            .collect();
        NamedValues { fields }
    }

    /// Builds a raw value array from named fields.
    ///
    /// Mapped fields that are not supplied are written as `0.0`.
    pub fn values_from(&self, fields: &[(&str, f64)]) -> Result<Vec<f64>> {
        let mut values = vec![0.0; self.width()];
        for (name, value) in fields {
            let slot = self.slot_of(name).ok_or_else(|| {
                SeriesError::SchemaMismatch(format!("unknown field '{name}'"))
            })?;
            values[slot] = *value;
        }
        Ok(values)
    }
}

/// Values of one entry keyed by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamedValues {
    fields: Vec<(Arc<str>, f64)>,
}

impl NamedValues {
    /// Returns the value of `name`, if the schema maps it.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| *v)
    }

    /// Returns the value of `name`, or `0.0` when it is not mapped.
    pub fn get_or_default(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    /// Iterates over `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(n, v)| (n.as_ref(), *v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the projection holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Conversion from projected values into a caller-defined record.
///
/// ```
/// use alopex_burrow::{FromNamedValues, NamedValues};
///
/// struct HeartRate {
///     bpm: f64,
/// }
///
/// impl FromNamedValues for HeartRate {
///     fn from_named(values: &NamedValues) -> Self {
///         HeartRate { bpm: values.get_or_default("BPM") }
///     }
/// }
/// ```
pub trait FromNamedValues: Sized {
    /// Builds `Self` from a projection.
    fn from_named(values: &NamedValues) -> Self;
}

/// Collects schema registrations before the engine starts.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: HashMap<(String, String), Arc<ValueSchema>>,
}

impl SchemaRegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the schema of `series` for documents of `collection`.
    ///
    /// Registering the same key twice replaces the earlier schema.
    pub fn register<N: Into<Arc<str>>>(
        &mut self,
        collection: &str,
        series: &str,
        slots: impl IntoIterator<Item = (usize, N)>,
    ) -> Result<&mut Self> {
        let schema = ValueSchema::new(slots)?;
        self.schemas
            .insert((collection.to_string(), series.to_string()), Arc::new(schema));
        Ok(self)
    }

    /// Freezes the registrations.
    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry {
            schemas: self.schemas,
        }
    }
}

/// Immutable `(collection, series) -> schema` lookup.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<(String, String), Arc<ValueSchema>>,
}

impl SchemaRegistry {
    /// Creates a builder.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::new()
    }

    /// Looks up the schema of `series` in `collection`.
    pub fn resolve(&self, collection: &str, series: &str) -> Option<Arc<ValueSchema>> {
        self.schemas
            .get(&(collection.to_string(), series.to_string()))
            .cloned()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
