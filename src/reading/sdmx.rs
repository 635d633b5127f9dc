//! SDMX-JSON decoding.
//!
//! Observations in an SDMX-JSON message are keyed by colon-joined dimension
//! indices (`"0:3:1"`); each index selects a value from the matching entry of
//! `data.structure.dimensions.observation`. Decoding resolves every index to
//! its human-readable value and yields one [`FlatRecord`] per observation.

use std::fmt;

use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use tracing::{debug, warn};

use crate::{
    error::DecodeError,
    table::{Table, Value},
};

#[derive(Debug, Clone, Deserialize)]
pub struct DimensionValue {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl DimensionValue {
    /// Prefers the display name, the API omits it for some codelists.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or_default()
    }
}

/// One axis of the observation key with its ordered value catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct Dimension {
    pub id: String,
    #[serde(default)]
    pub values: Vec<DimensionValue>,
}

/// Observation map in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations(pub Vec<(String, Vec<Option<f64>>)>);

impl Observations {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Observations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ObservationsVisitor;

        impl<'de> Visitor<'de> for ObservationsVisitor {
            type Value = Observations;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of observation keys to value arrays")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, values)) = map.next_entry::<String, Vec<Option<f64>>>()? {
                    entries.push((key, values));
                }
                Ok(Observations(entries))
            }
        }

        deserializer.deserialize_map(ObservationsVisitor)
    }
}

/// One observation with every dimension index resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub dimensions: Vec<(String, String)>,
    pub measurement: Option<f64>,
}

impl FlatRecord {
    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, value)| value.as_str())
    }
}

/// Resolves each observation key against the dimension catalogs.
///
/// Records come out in observation order. A key whose token count differs
/// from the number of dimensions is rejected rather than truncated or padded.
pub fn decode(
    dimensions: &[Dimension],
    observations: &Observations,
) -> Result<Vec<FlatRecord>, DecodeError> {
    let mut records = Vec::with_capacity(observations.len());

    for (key, values) in &observations.0 {
        let tokens: Vec<&str> = key.split(':').collect();
        if tokens.len() != dimensions.len() {
            return Err(DecodeError::SchemaMismatch {
                key: key.clone(),
                expected: dimensions.len(),
                found: tokens.len(),
            });
        }

        let mut resolved = Vec::with_capacity(dimensions.len());
        for (dimension, token) in dimensions.iter().zip(&tokens) {
            let index: usize = token.parse().map_err(|_| DecodeError::InvalidIndex {
                key: key.clone(),
                token: token.to_string(),
            })?;
            let value = dimension
                .values
                .get(index)
                .ok_or_else(|| DecodeError::IndexOutOfRange {
                    key: key.clone(),
                    dimension: dimension.id.clone(),
                    index,
                    len: dimension.values.len(),
                })?;
            resolved.push((dimension.id.clone(), value.label().to_string()));
        }

        let measurement = *values
            .first()
            .ok_or_else(|| DecodeError::EmptyObservation { key: key.clone() })?;

        records.push(FlatRecord {
            dimensions: resolved,
            measurement,
        });
    }

    Ok(records)
}

/// Lays decoded records out as a table: one column per dimension, then the
/// measurement column.
pub fn to_table(
    dimensions: &[Dimension],
    records: Vec<FlatRecord>,
    measurement_column: &str,
) -> Result<Table, DecodeError> {
    let mut table = Table::new(
        dimensions
            .iter()
            .map(|d| d.id.clone())
            .chain(std::iter::once(measurement_column.to_string())),
    );

    for record in records {
        let mut row: Vec<Value> = dimensions
            .iter()
            .map(|d| record.get(&d.id).map_or(Value::Null, |v| Value::Text(v.to_string())))
            .collect();
        row.push(Value::from(record.measurement));
        table
            .push_row(row)
            .map_err(|e| DecodeError::InvalidRecord(e.to_string()))?;
    }

    Ok(table)
}

#[derive(Debug, Deserialize)]
struct Message {
    data: Option<MessageData>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(rename = "dataSets")]
    data_sets: Option<Vec<DataSet>>,
    structure: Option<Structure>,
}

#[derive(Debug, Deserialize)]
struct DataSet {
    observations: Option<Observations>,
}

#[derive(Debug, Deserialize)]
struct Structure {
    dimensions: Option<StructureDimensions>,
}

#[derive(Debug, Deserialize)]
struct StructureDimensions {
    observation: Option<Vec<Dimension>>,
}

/// The parts of an SDMX-JSON data message the decoder needs.
#[derive(Debug, Clone)]
pub struct SdmxMessage {
    pub dimensions: Vec<Dimension>,
    pub observations: Observations,
}

impl SdmxMessage {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let message: Message = serde_json::from_slice(bytes)?;
        let data = message.data.ok_or(DecodeError::MissingField("data"))?;

        let observations = data
            .data_sets
            .and_then(|sets| sets.into_iter().next())
            .ok_or(DecodeError::MissingField("data.dataSets[0]"))?
            .observations
            .ok_or(DecodeError::MissingField("data.dataSets[0].observations"))?;

        let dimensions = data
            .structure
            .and_then(|s| s.dimensions)
            .and_then(|d| d.observation)
            .ok_or(DecodeError::MissingField(
                "data.structure.dimensions.observation",
            ))?;

        Ok(SdmxMessage {
            dimensions,
            observations,
        })
    }

    pub fn into_table(self, measurement_column: &str) -> Result<Table, DecodeError> {
        debug!(
            observations = self.observations.len(),
            dimensions = ?self.dimensions.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "decoding SDMX message"
        );
        if self.observations.is_empty() {
            warn!("SDMX message carries no observations");
        }
        let records = decode(&self.dimensions, &self.observations)?;
        to_table(&self.dimensions, records, measurement_column)
    }
}

/// Parses and flattens a raw SDMX-JSON payload in one step.
pub fn decode_table(bytes: &[u8], measurement_column: &str) -> Result<Table, DecodeError> {
    SdmxMessage::from_slice(bytes)?.into_table(measurement_column)
}

// -- Tests -------------------------------------------------------------------
