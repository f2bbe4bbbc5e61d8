pub mod clean;
pub mod parquet;
pub mod star;
pub mod table;

pub use parquet::{read_parquet, write_parquet, ColumnKind};
pub use star::{build_star, write_star, Dimension, DimensionSpec, StarSchema, StarStats, DIMENSIONS};
pub use table::{RenameOutcome, Table};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("row has {found} cells, table has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("i/o error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(String),
}
