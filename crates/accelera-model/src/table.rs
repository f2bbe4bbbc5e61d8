use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::ModelError;

/// A row-major table of nullable text cells.
///
/// Every stage of the pipeline hands data to the next one as a `Table`:
/// the bronze CSV is read into one, the silver profile renames its columns,
/// and the gold build slices it into dimensions and a fact. Typing only
/// happens at the Parquet boundary (see [`crate::parquet`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Append a row. The row must have exactly one cell per column.
    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<(), ModelError> {
        if row.len() != self.columns.len() {
            return Err(ModelError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }

    /// Rename columns according to `map`. Columns not in the map keep their name.
    ///
    /// If two columns end up sharing a name, the first keeps it and the later
    /// ones are dropped. Returns the `(from, to)` pairs that actually changed
    /// and the names of dropped duplicates.
    pub fn rename_columns(&mut self, map: &[(&str, &str)]) -> RenameOutcome {
        let lookup: HashMap<&str, &str> = map.iter().copied().collect();
        let mut outcome = RenameOutcome::default();

        let renamed: Vec<String> = self
            .columns
            .iter()
            .map(|c| match lookup.get(c.as_str()) {
                Some(to) => {
                    if c != to {
                        outcome.renamed.push((c.clone(), to.to_string()));
                    }
                    to.to_string()
                }
                None => c.clone(),
            })
            .collect();

        let mut seen = HashSet::new();
        let mut keep = Vec::with_capacity(renamed.len());
        for (i, name) in renamed.iter().enumerate() {
            if seen.insert(name.as_str()) {
                keep.push(i);
            } else {
                outcome.dropped.push(self.columns[i].clone());
            }
        }

        self.columns = keep.iter().map(|&i| renamed[i].clone()).collect();
        if keep.len() != renamed.len() {
            for row in &mut self.rows {
                *row = keep.iter().map(|&i| row[i].take()).collect();
            }
        }
        outcome
    }

    /// Append an all-null column unless one with that name already exists.
    /// Returns true when the column was added.
    pub fn ensure_column(&mut self, name: &str) -> bool {
        if self.has_column(name) {
            return false;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        true
    }

    /// Append a column with the given values (one per row).
    pub fn append_column(
        &mut self,
        name: &str,
        values: Vec<Option<String>>,
    ) -> Result<(), ModelError> {
        if values.len() != self.rows.len() {
            return Err(ModelError::RowWidth {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        if self.has_column(name) {
            return Err(ModelError::DuplicateColumn(name.to_string()));
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// A new table with only the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table, ModelError> {
        let indices = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| ModelError::MissingColumn(n.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }

    /// Remove the named columns. Names that are not present are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|&i| row[i].take()).collect();
        }
    }

    /// Transform every cell of one column in place.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> Result<(), ModelError>
    where
        F: FnMut(Option<String>) -> Option<String>,
    {
        let idx = self
            .column_index(name)
            .ok_or_else(|| ModelError::MissingColumn(name.to_string()))?;
        for row in &mut self.rows {
            row[idx] = f(row[idx].take());
        }
        Ok(())
    }

    /// Transform every cell of the table in place.
    pub fn map_cells<F>(&mut self, mut f: F)
    where
        F: FnMut(Option<String>) -> Option<String>,
    {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                *cell = f(cell.take());
            }
        }
    }

    pub fn null_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.iter().filter(|c| c.is_none()).count())
            .sum()
    }

    /// Read a CSV file with a header row. Empty fields become nulls.
    pub fn read_csv(path: &Path) -> Result<Table, ModelError> {
        let file = fs::File::open(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_csv_reader(file)
    }

    /// Parse CSV from any reader. Short rows are padded with nulls and long
    /// rows truncated to the header width.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Table, ModelError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let width = headers.len();
        let mut table = Table::new(headers);

        for record in rdr.records() {
            let record = record?;
            let mut row: Vec<Option<String>> = record
                .iter()
                .take(width)
                .map(|f| if f.is_empty() { None } else { Some(f.to_string()) })
                .collect();
            row.resize(width, None);
            table.rows.push(row);
        }

        Ok(table)
    }

    /// Write the table as CSV with a header row. Nulls are written as empty fields.
    pub fn write_csv(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ModelError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        wtr.flush().map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}

/// What [`Table::rename_columns`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenameOutcome {
    pub renamed: Vec<(String, String)>,
    /// Original names of columns dropped because their new name was already taken.
    pub dropped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Option<String>> {
        values
            .iter()
            .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
            .collect()
    }

    fn sample() -> Table {
        let mut t = Table::new(["id", "name", "stage"]);
        t.push_row(cells(&["1", "Ana", "Lead"])).unwrap();
        t.push_row(cells(&["2", "", "Lead"])).unwrap();
        t.push_row(cells(&["1", "Ana", "Lead"])).unwrap();
        t
    }

    #[test]
    fn test_push_row_width_mismatch() {
        let mut t = Table::new(["a", "b"]);
        let err = t.push_row(cells(&["1"])).unwrap_err();
        assert!(matches!(err, ModelError::RowWidth { expected: 2, found: 1 }));
    }

    #[test]
    fn test_rename_keeps_unmapped_and_drops_duplicates() {
        let mut t = Table::new(["userId", "userid", "city", "extra"]);
        t.push_row(cells(&["u1", "u2", "Recife", "x"])).unwrap();

        let outcome = t.rename_columns(&[("userId", "userid"), ("userid", "userid"), ("city", "cidade")]);

        assert_eq!(t.columns(), &["userid", "cidade", "extra"]);
        assert_eq!(t.cell(0, 0), Some("u1"));
        assert_eq!(outcome.dropped, vec!["userid".to_string()]);
        assert!(outcome.renamed.contains(&("city".to_string(), "cidade".to_string())));
        assert!(!outcome.renamed.iter().any(|(from, _)| from == "userid"));
    }

    #[test]
    fn test_select_and_drop() {
        let t = sample();
        let s = t.select(&["stage", "id"]).unwrap();
        assert_eq!(s.columns(), &["stage", "id"]);
        assert_eq!(s.cell(1, 1), Some("2"));
        assert!(matches!(t.select(&["nope"]), Err(ModelError::MissingColumn(_))));

        let mut d = sample();
        d.drop_columns(&["name", "absent"]);
        assert_eq!(d.columns(), &["id", "stage"]);
        assert_eq!(d.rows()[0], cells(&["1", "Lead"]));
    }

    #[test]
    fn test_ensure_and_append_column() {
        let mut t = sample();
        assert!(t.ensure_column("campanha_id"));
        assert!(!t.ensure_column("campanha_id"));
        assert_eq!(t.column("campanha_id").unwrap(), vec![None, None, None]);

        t.append_column("pk", vec![Some("1".into()), Some("2".into()), Some("3".into())])
            .unwrap();
        assert_eq!(t.cell(2, 4), Some("3"));
        assert!(t.append_column("pk", vec![None, None, None]).is_err());
        assert!(t.append_column("short", vec![None]).is_err());
    }

    #[test]
    fn test_csv_reader_pads_ragged_rows() {
        let data = "\u{feff}id,name,stage\n1,Ana,Lead\n2,,\n3,Bia\n4,Caio,Won,extra\n";
        let t = Table::from_csv_reader(data.as_bytes()).unwrap();

        assert_eq!(t.columns(), &["id", "name", "stage"]);
        assert_eq!(t.height(), 4);
        assert_eq!(t.rows()[1], cells(&["2", "", ""]));
        assert_eq!(t.rows()[2], cells(&["3", "Bia", ""]));
        assert_eq!(t.rows()[3], cells(&["4", "Caio", "Won"]));
        assert_eq!(t.null_count(), 3);
    }

    #[test]
    fn test_csv_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let t = sample();
        t.write_csv(&path).unwrap();

        let back = Table::read_csv(&path).unwrap();
        assert_eq!(back, t);
    }
}
