use accelera_cloud::Gcs;
use accelera_model::star::FACT_FILE;
use accelera_model::{read_parquet, DimensionSpec, Table, DIMENSIONS};
use accelera_refine::{Profile, DATE_COLUMNS};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Silver object checked by [`verify_remote`].
pub const REMOTE_SILVER_OBJECT: &str = "silver/leads-forms-accelera.parquet";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing file: {0}")]
    MissingFile(String),

    #[error("cannot read {file}: {reason}")]
    Unreadable { file: String, reason: String },

    #[error("{table}: first column is '{found}', expected '{pk}'")]
    PkNotFirst { table: String, pk: String, found: String },

    #[error("{table}: {pk} at row {row} is {found:?}, expected {expected}")]
    PkSequence {
        table: String,
        pk: String,
        row: usize,
        expected: i64,
        found: Option<String>,
    },

    #[error("{table}: row {row} repeats an earlier row")]
    DuplicateRow { table: String, row: usize },

    #[error("{table}: natural key ({key}) appears {count} times")]
    DuplicateNaturalKey { table: String, key: String, count: usize },

    #[error("fact is missing foreign key column {0}")]
    MissingForeignKey(String),

    #[error("fact row {row}: {column} = {value} has no row in {table}")]
    DanglingForeignKey {
        column: String,
        value: String,
        table: String,
        row: usize,
    },

    #[error("{count} fact rows have no {column}")]
    UnresolvedForeignKey { column: String, count: usize },

    #[error("silver still has bronze column '{0}'")]
    UnrenamedColumn(String),

    #[error("{column} row {row}: '{value}' is not a YYYY-MM-DD date")]
    BadDate { column: String, row: usize, value: String },
}

impl ValidationError {
    /// Findings the star schema tolerates by construction.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ValidationError::DuplicateNaturalKey { .. } | ValidationError::UnresolvedForeignKey { .. }
        )
    }
}

/// Load one gold file, recording why it could not be loaded.
fn load(path: &Path, errors: &mut Vec<ValidationError>) -> Option<Table> {
    if !path.exists() {
        errors.push(ValidationError::MissingFile(path.display().to_string()));
        return None;
    }
    match read_parquet(path) {
        Ok(table) => Some(table),
        Err(e) => {
            errors.push(ValidationError::Unreadable {
                file: path.display().to_string(),
                reason: e.to_string(),
            });
            None
        }
    }
}

/// Validate the five gold files for internal and referential consistency.
pub fn validate_gold(gold_dir: &Path) -> Result<Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut heights: HashMap<&'static str, usize> = HashMap::new();
    for spec in &DIMENSIONS {
        if let Some(table) = load(&gold_dir.join(spec.file_name()), &mut errors) {
            validate_dimension(spec, &table, &mut errors);
            heights.insert(spec.pk, table.height());
        }
    }

    if let Some(fact) = load(&gold_dir.join(FACT_FILE), &mut errors) {
        validate_fact(&fact, &heights, &mut errors);
        tracing::info!(rows = fact.height(), columns = fact.width(), "Checked fact");
    }

    for e in &errors {
        if e.is_warning() {
            tracing::info!("{e}");
        } else {
            tracing::warn!("{e}");
        }
    }
    Ok(errors)
}

/// Check one dimension table: pk placement and sequence, duplicate rows and
/// repeated natural keys.
pub fn validate_dimension(spec: &DimensionSpec, table: &Table, errors: &mut Vec<ValidationError>) {
    let name = spec.name.to_string();

    match table.columns().first() {
        Some(first) if first == spec.pk => {}
        first => errors.push(ValidationError::PkNotFirst {
            table: name.clone(),
            pk: spec.pk.into(),
            found: first.cloned().unwrap_or_default(),
        }),
    }

    if let Some(pks) = table.column(spec.pk) {
        // Only the first break is reported; everything after it is shifted.
        for (i, pk) in pks.iter().enumerate() {
            let expected = i as i64 + 1;
            if pk.and_then(|v| v.parse::<i64>().ok()) != Some(expected) {
                errors.push(ValidationError::PkSequence {
                    table: name.clone(),
                    pk: spec.pk.into(),
                    row: i,
                    expected,
                    found: pk.map(str::to_string),
                });
                break;
            }
        }
    }

    let pk_index = table.column_index(spec.pk);
    let mut seen = HashSet::new();
    for (i, row) in table.rows().iter().enumerate() {
        let attributes: Vec<&Option<String>> = row
            .iter()
            .enumerate()
            .filter(|(col, _)| Some(*col) != pk_index)
            .map(|(_, cell)| cell)
            .collect();
        if !seen.insert(attributes) {
            errors.push(ValidationError::DuplicateRow { table: name.clone(), row: i });
        }
    }

    let key_columns: Vec<&str> = spec
        .attributes
        .iter()
        .filter(|(src, _)| spec.key.contains(src))
        .map(|(_, dst)| *dst)
        .filter(|dst| table.has_column(dst))
        .collect();
    if key_columns.is_empty() {
        return;
    }
    let indices: Vec<usize> = key_columns.iter().filter_map(|c| table.column_index(c)).collect();
    let mut counts: HashMap<Vec<&str>, usize> = HashMap::new();
    let mut order = Vec::new();
    for row in table.rows() {
        let key: Vec<&str> = indices.iter().map(|&i| row[i].as_deref().unwrap_or("")).collect();
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    for key in order {
        let count = counts[&key];
        if count > 1 {
            errors.push(ValidationError::DuplicateNaturalKey {
                table: name.clone(),
                key: key.join(" / "),
                count,
            });
        }
    }
}

/// Check the fact's foreign keys against the dimension heights (pk → rows).
pub fn validate_fact(fact: &Table, heights: &HashMap<&'static str, usize>, errors: &mut Vec<ValidationError>) {
    for spec in &DIMENSIONS {
        let Some(values) = fact.column(spec.pk) else {
            errors.push(ValidationError::MissingForeignKey(spec.pk.into()));
            continue;
        };

        let mut unresolved = 0;
        for (row, value) in values.iter().enumerate() {
            let Some(value) = value else {
                unresolved += 1;
                continue;
            };
            let Some(&height) = heights.get(spec.pk) else {
                continue;
            };
            let in_range = value
                .parse::<i64>()
                .is_ok_and(|pk| pk >= 1 && pk <= height as i64);
            if !in_range {
                errors.push(ValidationError::DanglingForeignKey {
                    column: spec.pk.into(),
                    value: value.to_string(),
                    table: spec.name.into(),
                    row,
                });
            }
        }
        if unresolved > 0 {
            errors.push(ValidationError::UnresolvedForeignKey {
                column: spec.pk.into(),
                count: unresolved,
            });
        }
    }
}

/// Validate a silver file: no bronze names left behind and every date
/// column in `YYYY-MM-DD` form.
pub fn validate_silver(path: &Path, profile: Profile) -> Result<Vec<ValidationError>> {
    let table = read_parquet(path).with_context(|| format!("Failed to read silver file {}", path.display()))?;
    let mut errors = Vec::new();

    for name in profile.retired_names() {
        if table.has_column(name) {
            errors.push(ValidationError::UnrenamedColumn(name.into()));
        }
    }

    for column in DATE_COLUMNS {
        let Some(values) = table.column(column) else {
            continue;
        };
        for (row, value) in values.iter().enumerate() {
            if let Some(value) = value {
                if !is_iso_date(value) {
                    errors.push(ValidationError::BadDate {
                        column: column.to_string(),
                        row,
                        value: value.to_string(),
                    });
                }
            }
        }
    }

    tracing::info!(
        path = %path.display(),
        profile = %profile,
        rows = table.height(),
        problems = errors.len(),
        "Checked silver"
    );
    for e in &errors {
        tracing::warn!("{e}");
    }
    Ok(errors)
}

fn is_iso_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Objects the pipeline publishes: the leads silver file and every gold file.
pub fn remote_objects() -> Vec<String> {
    let mut objects = vec![REMOTE_SILVER_OBJECT.to_string()];
    objects.extend(DIMENSIONS.iter().map(|d| format!("gold/{}", d.file_name())));
    objects.push(format!("gold/{FACT_FILE}"));
    objects
}

/// Check that every published object exists in `bucket`.
pub async fn verify_remote(gcs: &Gcs, bucket: &str) -> Result<Vec<(String, bool)>> {
    let mut results = Vec::new();
    for object in remote_objects() {
        let found = gcs
            .exists(bucket, &object)
            .await
            .with_context(|| format!("Failed to check gs://{bucket}/{object}"))?;
        if found {
            tracing::info!(uri = %format!("gs://{bucket}/{object}"), "Found");
        } else {
            tracing::warn!(uri = %format!("gs://{bucket}/{object}"), "Missing");
        }
        results.push((object, found));
    }
    Ok(results)
}
