// Build the gold star schema (four dimensions + one fact) from the silver table.
//
// Each dimension is a deduplicated projection of silver columns with a
// positional surrogate key. The fact keeps the remaining silver columns and
// resolves each row to one surrogate key per dimension, using the same
// standardized natural key the dimension was built from.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::clean;
use crate::parquet::{write_parquet, ColumnKind};
use crate::table::Table;
use crate::ModelError;

/// Prefix of the sentinel value that stands in for a missing attribute.
pub const UNKNOWN_PREFIX: &str = "DESCONHECIDO_";

/// File name of the fact table inside the gold directory.
pub const FACT_FILE: &str = "fato_clint_digital.parquet";

/// Silver columns that only describe a dimension and never reach the fact.
const FACT_EXCLUDED: &[&str] = &["ddi", "fone", "fone_completo", "usuario_fone", "usuario_link"];

/// Fact date columns, stored as Parquet dates.
pub const FACT_DATE_COLUMNS: &[&str] = &["dt_ganho", "dt_criacao", "dt_perda"];

/// Fact numeric columns, stored as doubles.
pub const FACT_DECIMAL_COLUMNS: &[&str] = &["valor"];

/// When a dimension row counts as "unknown" and gets every null attribute
/// replaced by its sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownRule {
    /// Any attribute is null.
    AnyNull,
    /// Every natural-key attribute is null.
    AllKeysNull,
}

/// Static description of one dimension.
#[derive(Debug, Clone)]
pub struct DimensionSpec {
    pub name: &'static str,
    pub pk: &'static str,
    /// `(silver column, dimension column)` in output order.
    pub attributes: &'static [(&'static str, &'static str)],
    /// Silver columns that form the natural key the fact joins on.
    pub key: &'static [&'static str],
    pub unknown_rule: UnknownRule,
}

impl DimensionSpec {
    pub fn file_name(&self) -> String {
        format!("{}.parquet", self.name)
    }
}

pub const DIM_CLIENTE: DimensionSpec = DimensionSpec {
    name: "dim_cliente",
    pk: "pk_cliente",
    attributes: &[
        ("nome", "nome"),
        ("email", "email"),
        ("ddi", "ddi"),
        ("fone", "fone"),
        ("fone_completo", "fone_completo"),
    ],
    key: &["nome", "email"],
    unknown_rule: UnknownRule::AnyNull,
};

pub const DIM_VENDEDORES: DimensionSpec = DimensionSpec {
    name: "dim_vendedores",
    pk: "pk_vendedor",
    attributes: &[
        ("usuario_email", "vendedor_email"),
        ("usuario_nome", "vendedor_nome"),
        ("usuario_fone", "vendedor_fone"),
        ("usuario_link", "vendedor_link"),
    ],
    key: &["usuario_email", "usuario_nome"],
    unknown_rule: UnknownRule::AllKeysNull,
};

pub const DIM_PIPELINE: DimensionSpec = DimensionSpec {
    name: "dim_pipeline",
    pk: "pk_pipeline",
    attributes: &[("de_origem", "de_pipeline")],
    key: &["de_origem"],
    unknown_rule: UnknownRule::AnyNull,
};

pub const DIM_ESTAGIO: DimensionSpec = DimensionSpec {
    name: "dim_estagio",
    pk: "pk_estagio",
    attributes: &[("estagio", "de_estagio")],
    key: &["estagio"],
    unknown_rule: UnknownRule::AnyNull,
};

/// All dimensions, in build order. The fact's foreign keys follow this order.
pub const DIMENSIONS: [DimensionSpec; 4] = [DIM_CLIENTE, DIM_VENDEDORES, DIM_PIPELINE, DIM_ESTAGIO];

/// Sentinel for a null value of `source_column`, e.g. `DESCONHECIDO_DE_ORIGEM`.
pub fn unknown_sentinel(source_column: &str) -> String {
    format!("{UNKNOWN_PREFIX}{}", source_column.to_uppercase())
}

/// A built dimension: its table plus the lookup the fact joins through.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub spec: DimensionSpec,
    pub table: Table,
    /// Natural-key columns actually available in silver.
    pub key_columns: Vec<&'static str>,
    /// Standardized natural key → surrogate key. First row wins.
    pub lookup: HashMap<Vec<String>, i64>,
    pub known_rows: usize,
    pub unknown_rows: usize,
}

impl Dimension {
    pub fn height(&self) -> usize {
        self.table.height()
    }
}

/// Compute the standardized natural key of one silver row.
///
/// Nulls are replaced by the column sentinel, so a row with a missing
/// attribute still resolves to the dimension's unknown member.
fn natural_key(row: &[Option<String>], indices: &[(usize, &str)]) -> Vec<String> {
    indices
        .iter()
        .map(|&(idx, col)| {
            clean::standardize(row[idx].as_deref()).unwrap_or_else(|| unknown_sentinel(col))
        })
        .collect()
}

/// Build one dimension from the silver table.
pub fn build_dimension(
    silver: &Table,
    spec: &DimensionSpec,
    warnings: &mut Vec<String>,
) -> Result<Dimension, ModelError> {
    let present: Vec<(&'static str, &'static str)> = spec
        .attributes
        .iter()
        .copied()
        .filter(|(src, _)| silver.has_column(src))
        .collect();

    if present.len() != spec.attributes.len() {
        let missing: Vec<&str> = spec
            .attributes
            .iter()
            .map(|(src, _)| *src)
            .filter(|src| !silver.has_column(src))
            .collect();
        warnings.push(format!(
            "{}: columns not found in silver, building without them: {}",
            spec.name,
            missing.join(", ")
        ));
    }

    let key_columns: Vec<&'static str> = spec
        .key
        .iter()
        .copied()
        .filter(|k| silver.has_column(k))
        .collect();
    // Position of each key column within the dimension row.
    let key_positions: Vec<usize> = key_columns
        .iter()
        .filter_map(|k| present.iter().position(|(src, _)| src == k))
        .collect();

    let mut known: Vec<Vec<Option<String>>> = Vec::new();
    let mut unknown: Vec<Vec<Option<String>>> = Vec::new();
    let mut seen_known = HashSet::new();
    let mut seen_unknown = HashSet::new();

    let sources: Vec<&str> = present.iter().map(|(src, _)| *src).collect();
    let mut attributes = silver.select(&sources)?;
    attributes.map_cells(|cell| clean::standardize(cell.as_deref()));

    let source_rows = if present.is_empty() { &[][..] } else { attributes.rows() };
    for row in source_rows {
        let mut values = row.clone();

        let is_unknown = match spec.unknown_rule {
            UnknownRule::AnyNull => values.iter().any(Option::is_none),
            UnknownRule::AllKeysNull => {
                !key_positions.is_empty() && key_positions.iter().all(|&p| values[p].is_none())
            }
        };

        if is_unknown {
            for (value, (src, _)) in values.iter_mut().zip(&present) {
                if value.is_none() {
                    *value = Some(unknown_sentinel(src));
                }
            }
            if seen_unknown.insert(values.clone()) {
                unknown.push(values);
            }
        } else {
            for &p in &key_positions {
                if values[p].is_none() {
                    values[p] = Some(unknown_sentinel(present[p].0));
                }
            }
            if seen_known.insert(values.clone()) {
                known.push(values);
            }
        }
    }

    let known_rows = known.len();
    let unknown_rows = unknown.len();

    let mut columns = vec![spec.pk.to_string()];
    columns.extend(present.iter().map(|(_, dst)| dst.to_string()));
    let mut table = Table::new(columns);
    let mut lookup = HashMap::new();

    for (i, values) in known.into_iter().chain(unknown).enumerate() {
        let pk = i as i64 + 1;
        let key: Vec<String> = key_positions
            .iter()
            .map(|&p| values[p].clone().unwrap_or_default())
            .collect();
        lookup.entry(key).or_insert(pk);

        let mut row = Vec::with_capacity(values.len() + 1);
        row.push(Some(pk.to_string()));
        row.extend(values);
        table.push_row(row)?;
    }

    tracing::info!(
        dimension = spec.name,
        known = known_rows,
        unknown = unknown_rows,
        total = table.height(),
        "Built dimension"
    );

    Ok(Dimension {
        spec: spec.clone(),
        table,
        key_columns,
        lookup,
        known_rows,
        unknown_rows,
    })
}

/// Build the fact table: silver minus dimension-only and natural-key
/// columns, plus one surrogate key per dimension.
pub fn build_fact(
    silver: &Table,
    dims: &[Dimension],
    warnings: &mut Vec<String>,
) -> Result<(Table, Vec<usize>), ModelError> {
    let mut fk_values: Vec<Vec<Option<String>>> = Vec::with_capacity(dims.len());
    let mut unmatched = Vec::with_capacity(dims.len());

    for dim in dims {
        let indices: Vec<(usize, &str)> = dim
            .key_columns
            .iter()
            .filter_map(|k| silver.column_index(k).map(|i| (i, *k)))
            .collect();

        let values: Vec<Option<String>> = silver
            .rows()
            .iter()
            .map(|row| {
                if indices.is_empty() {
                    return None;
                }
                dim.lookup
                    .get(&natural_key(row, &indices))
                    .map(|pk| pk.to_string())
            })
            .collect();

        let missing = values.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            warnings.push(format!(
                "{missing} fact rows have no match in {}",
                dim.spec.name
            ));
        } else {
            tracing::info!(dimension = dim.spec.name, "Every fact row matched");
        }
        unmatched.push(missing);
        fk_values.push(values);
    }

    let mut fact = silver.clone();
    fact.drop_columns(FACT_EXCLUDED);
    let natural_keys: Vec<&str> = dims
        .iter()
        .flat_map(|d| d.spec.attributes.iter().map(|(src, _)| *src))
        .collect();
    fact.drop_columns(&natural_keys);

    for (dim, values) in dims.iter().zip(fk_values) {
        if fact.has_column(dim.spec.pk) {
            fact.drop_columns(&[dim.spec.pk]);
        }
        fact.append_column(dim.spec.pk, values)?;
    }

    Ok((fact, unmatched))
}

/// The whole gold layer.
#[derive(Debug, Clone)]
pub struct StarSchema {
    pub dimensions: Vec<Dimension>,
    pub fact: Table,
    pub stats: StarStats,
    pub warnings: Vec<String>,
}

/// Counts reported after a build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StarStats {
    pub silver_rows: usize,
    /// `(dimension name, rows)` in build order.
    pub dimension_rows: Vec<(&'static str, usize)>,
    pub fact_rows: usize,
    /// `(dimension name, fact rows without a key)` in build order.
    pub unmatched: Vec<(&'static str, usize)>,
}

/// Build every dimension, then the fact.
pub fn build_star(silver: &Table) -> Result<StarSchema, ModelError> {
    let mut warnings = Vec::new();

    let mut cleaned = silver.clone();
    let replaced = clean::null_tokens_to_null(&mut cleaned);
    tracing::info!(
        rows = cleaned.height(),
        null_tokens = replaced,
        nulls = cleaned.null_count(),
        "Cleaned silver null tokens"
    );

    let dimensions: Vec<Dimension> = DIMENSIONS
        .iter()
        .map(|spec| build_dimension(&cleaned, spec, &mut warnings))
        .collect::<Result<_, _>>()?;

    let (fact, unmatched) = build_fact(&cleaned, &dimensions, &mut warnings)?;

    let stats = StarStats {
        silver_rows: silver.height(),
        dimension_rows: dimensions.iter().map(|d| (d.spec.name, d.height())).collect(),
        fact_rows: fact.height(),
        unmatched: dimensions
            .iter()
            .zip(&unmatched)
            .map(|(d, n)| (d.spec.name, *n))
            .collect(),
    };

    Ok(StarSchema {
        dimensions,
        fact,
        stats,
        warnings,
    })
}

/// Column kinds for the fact table.
pub fn fact_column_kinds() -> HashMap<&'static str, ColumnKind> {
    let mut kinds: HashMap<&'static str, ColumnKind> =
        DIMENSIONS.iter().map(|d| (d.pk, ColumnKind::Int64)).collect();
    kinds.extend(FACT_DATE_COLUMNS.iter().map(|c| (*c, ColumnKind::Date)));
    kinds.extend(FACT_DECIMAL_COLUMNS.iter().map(|c| (*c, ColumnKind::Float64)));
    kinds
}

/// Write every table of the star schema into `gold_dir`. Returns the
/// written paths, dimensions first and the fact last.
pub fn write_star(star: &StarSchema, gold_dir: &Path) -> Result<Vec<PathBuf>, ModelError> {
    let mut written = Vec::with_capacity(star.dimensions.len() + 1);

    for dim in &star.dimensions {
        let path = gold_dir.join(dim.spec.file_name());
        let kinds = HashMap::from([(dim.spec.pk, ColumnKind::Int64)]);
        write_parquet(&dim.table, &kinds, &path)?;
        tracing::info!(path = %path.display(), rows = dim.height(), "Wrote dimension");
        written.push(path);
    }

    let path = gold_dir.join(FACT_FILE);
    write_parquet(&star.fact, &fact_column_kinds(), &path)?;
    tracing::info!(path = %path.display(), rows = star.fact.height(), "Wrote fact");
    written.push(path);

    Ok(written)
}
