//! Parquet I/O for [`Table`].
//!
//! Tables are text-only in memory; the declared [`ColumnKind`] of each column
//! decides its physical type on disk. Writes are atomic: the file is written
//! to `{name}.parquet.tmp` and renamed into place.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;

use crate::clean;
use crate::table::Table;
use crate::ModelError;

/// Physical type of a column in a written Parquet file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int64,
    Float64,
    /// `YYYY-MM-DD` text stored as a Parquet date.
    Date,
}

/// Write `table` to `path`. Columns absent from `kinds` are written as text.
///
/// Values that do not parse as the declared kind are written as nulls.
pub fn write_parquet(
    table: &Table,
    kinds: &HashMap<&str, ColumnKind>,
    path: &Path,
) -> Result<(), ModelError> {
    let mut df = table_to_dataframe(table, kinds)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ModelError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| ModelError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| ModelError::Parquet(format!("write {}: {e}", path.display())))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ModelError::Io {
            path: path.display().to_string(),
            source: e,
        }
    })?;

    tracing::debug!(path = %path.display(), rows = table.height(), columns = table.width(), "Wrote parquet");
    Ok(())
}

/// Read a Parquet file into a text [`Table`]. Every column is cast to text;
/// dates render as `YYYY-MM-DD`.
pub fn read_parquet(path: &Path) -> Result<Table, ModelError> {
    let file = fs::File::open(path).map_err(|e| ModelError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| ModelError::Parquet(format!("read {}: {e}", path.display())))?;

    dataframe_to_table(&df)
}

fn table_to_dataframe(
    table: &Table,
    kinds: &HashMap<&str, ColumnKind>,
) -> Result<DataFrame, ModelError> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).ok_or_else(|| {
        ModelError::Parquet("epoch date out of range".into())
    })?;

    let mut columns = Vec::with_capacity(table.width());
    for (idx, name) in table.columns().iter().enumerate() {
        let values = table.rows().iter().map(|r| r[idx].as_deref());
        let kind = kinds.get(name.as_str()).copied().unwrap_or(ColumnKind::Text);

        let column = match kind {
            ColumnKind::Text => {
                let v: Vec<Option<String>> = values.map(|c| c.map(str::to_string)).collect();
                Column::new(name.as_str().into(), v)
            }
            ColumnKind::Int64 => {
                let v: Vec<Option<i64>> = values
                    .map(|c| c.and_then(|s| s.trim().parse::<i64>().ok()))
                    .collect();
                Column::new(name.as_str().into(), v)
            }
            ColumnKind::Float64 => {
                let v: Vec<Option<f64>> = values
                    .map(|c| c.and_then(clean::parse_decimal))
                    .collect();
                Column::new(name.as_str().into(), v)
            }
            ColumnKind::Date => {
                let v: Vec<Option<i32>> = values
                    .map(|c| {
                        c.and_then(clean::parse_date)
                            .map(|d| (d - epoch).num_days() as i32)
                    })
                    .collect();
                Column::new(name.as_str().into(), v)
                    .cast(&DataType::Date)
                    .map_err(|e| ModelError::Parquet(format!("date cast for {name}: {e}")))?
            }
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(|e| ModelError::Parquet(format!("dataframe creation: {e}")))
}

fn dataframe_to_table(df: &DataFrame) -> Result<Table, ModelError> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();

    let mut text_columns = Vec::with_capacity(names.len());
    for column in df.get_columns() {
        let as_text = column
            .cast(&DataType::String)
            .map_err(|e| ModelError::Parquet(format!("cast {} to text: {e}", column.name())))?;
        let ca = as_text
            .str()
            .map_err(|e| ModelError::Parquet(format!("column {} type: {e}", column.name())))?;
        let values: Vec<Option<String>> = ca.into_iter().map(|v| v.map(str::to_string)).collect();
        text_columns.push(values);
    }

    let mut table = Table::new(names);
    for i in 0..df.height() {
        let row = text_columns.iter().map(|c| c[i].clone()).collect();
        table.push_row(row)?;
    }
    Ok(table)
}
