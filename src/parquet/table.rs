//! Save any table to a parquet file.

use std::{path::Path, sync::Arc};

use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};

use crate::{
    error::StoreError,
    store::write_atomic,
    table::{Table, Value},
};

/// Narrowest arrow type that holds every non-null cell of a column.
fn column_type<'a>(cells: impl Iterator<Item = &'a Value>) -> DataType {
    let mut data_type = None;
    for cell in cells {
        data_type = match (cell, data_type) {
            (Value::Null, current) => current,
            (Value::Text(_), _) | (_, Some(DataType::Utf8)) => Some(DataType::Utf8),
            (Value::Float(_), _) | (Value::Integer(_), Some(DataType::Float64)) => {
                Some(DataType::Float64)
            }
            (Value::Integer(_), _) => Some(DataType::Int64),
        };
    }
    data_type.unwrap_or(DataType::Utf8)
}

fn column_array<'a>(data_type: &DataType, cells: impl Iterator<Item = &'a Value>) -> ArrayRef {
    match data_type {
        DataType::Int64 => Arc::new(cells.map(Value::as_i64).collect::<Int64Array>()),
        DataType::Float64 => Arc::new(cells.map(Value::as_f64).collect::<Float64Array>()),
        _ => Arc::new(
            cells
                .map(|cell| match cell {
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}

pub fn save_table(table: &Table, file_path: &Path) -> Result<(), StoreError> {
    // Define the schema from the cells themselves
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|name| Field::new(name.as_str(), column_type(table.column(name)), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let columns: Vec<ArrayRef> = table
        .columns()
        .iter()
        .zip(schema.fields().iter())
        .map(|(name, field)| column_array(field.data_type(), table.column(name)))
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))?;
    writer.write(&batch)?;
    let bytes = writer.into_inner()?;

    write_atomic(file_path, &bytes)
}

// -- Tests -------------------------------------------------------------------
