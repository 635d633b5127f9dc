//! Print the head of a saved dataset.

use anyhow::{Context as _, Result};

use crate::{
    store::{read_metadata, DatasetFiles, TableCache},
    table::Table,
};

/// Renders the metadata and the first `rows` rows of a dataset.
pub fn show(cache: &mut TableCache, files: &DatasetFiles, rows: usize) -> Result<String> {
    let table = cache
        .load(files)
        .with_context(|| format!("reading {}", files.csv().display()))?;
    let metadata = read_metadata(&files.meta())?;

    let mut out = String::new();
    out.push_str(&format!("{} ({} rows)\n", files.stem(), table.len()));
    if let Some(m) = metadata {
        out.push_str(&format!("  fetched:  {}\n", m.fetch_timestamp.to_rfc3339()));
        if let Some(source) = &m.source {
            out.push_str(&format!("  source:   {source}\n"));
        }
        if let Some(modified) = &m.last_modified {
            out.push_str(&format!("  modified: {modified}\n"));
        }
        if let Some(etag) = &m.etag {
            out.push_str(&format!("  etag:     {etag}\n"));
        }
        if m.synthetic {
            out.push_str("  WARNING: synthesized data, not a measurement\n");
        }
    }
    out.push('\n');
    out.push_str(&render(&table, rows));

    Ok(out)
}

fn render(table: &Table, rows: usize) -> String {
    let cells: Vec<Vec<String>> = table
        .rows()
        .iter()
        .take(rows)
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    let widths: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = line(table.columns().iter().map(String::as_str), &widths);
    for row in &cells {
        out.push_str(&line(row.iter().map(String::as_str), &widths));
    }
    out
}

fn line<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let padded: Vec<String> = values
        .zip(widths.iter().copied())
        .map(|(v, w)| format!("{v:<w$}"))
        .collect();
    padded.join("  ").trim_end().to_string() + "\n"
}

// -- Tests -------------------------------------------------------------------
