use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use accelera_model::clean;
use accelera_model::parquet::write_parquet;
use accelera_model::table::Table;
use accelera_model::ModelError;

pub mod profile;

pub use profile::{Profile, DATE_COLUMNS};

/// What a refine pass did to a bronze table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefineReport {
    pub rows: usize,
    pub columns: usize,
    /// `(bronze, silver)` column renames applied.
    pub renamed: Vec<(String, String)>,
    /// Bronze columns dropped because their silver name was already taken.
    pub dropped_duplicates: Vec<String>,
    /// Cells that held a textual null (`nan`, `None`, ...) and are now null.
    pub null_tokens: usize,
    /// Non-empty date cells that could not be parsed and became null.
    pub dates_coerced: usize,
    pub extra_columns_added: Vec<String>,
}

/// Refine a bronze table in place: rename columns, clear textual nulls,
/// normalize dates and apply the profile's extra cleanup.
pub fn refine_table(table: &mut Table, profile: Profile) -> Result<RefineReport, ModelError> {
    let mut report = RefineReport::default();

    let outcome = table.rename_columns(profile.column_map());
    for dropped in &outcome.dropped {
        tracing::warn!(column = %dropped, "Dropped column whose silver name was already taken");
    }
    report.renamed = outcome.renamed;
    report.dropped_duplicates = outcome.dropped;

    report.null_tokens = clean::null_tokens_to_null(table);

    for column in DATE_COLUMNS {
        if !table.has_column(column) {
            continue;
        }
        let mut coerced = 0;
        table.map_column(column, |cell| {
            let raw = cell?;
            let normalized = clean::normalize_date(&raw);
            if normalized.is_none() {
                coerced += 1;
            }
            normalized
        })?;
        report.dates_coerced += coerced;
    }

    if profile.strips_line_breaks() {
        table.map_cells(|cell| cell.map(|v| clean::strip_line_breaks(&v)).filter(|v| !v.is_empty()));
    }

    for column in profile.extra_columns() {
        if table.ensure_column(column) {
            report.extra_columns_added.push(column.to_string());
        }
    }

    report.rows = table.height();
    report.columns = table.width();
    Ok(report)
}

/// Read a bronze CSV, refine it and write the silver Parquet file.
///
/// Silver is written all-text; typing happens in the gold stage.
pub fn refine(input: &Path, output: &Path, profile: Profile) -> Result<RefineReport> {
    let started = Instant::now();
    tracing::info!(path = %input.display(), %profile, "Reading bronze CSV");

    let mut table = Table::read_csv(input)
        .with_context(|| format!("Failed to read bronze file {}", input.display()))?;

    let report = refine_table(&mut table, profile)
        .with_context(|| format!("Failed to refine {}", input.display()))?;
    tracing::info!(
        renamed = report.renamed.len(),
        null_tokens = report.null_tokens,
        dates_coerced = report.dates_coerced,
        extra_columns = report.extra_columns_added.len(),
        "Refined bronze table"
    );

    write_parquet(&table, &HashMap::new(), output)
        .with_context(|| format!("Failed to write silver file {}", output.display()))?;

    tracing::info!(
        path = %output.display(),
        rows = report.rows,
        columns = report.columns,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Wrote silver Parquet"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelera_model::parquet::read_parquet;

    const LEADS_CSV: &str = "\
id,created_at,name,email,stage,value,origin,won_at,lost_at,principais_desafios,user_id
1,03/02/2024 14:33,Ana,ana@x.com,Lead,1500,Forms,,nan,\"vender\nmais\",u1
2,15/03/2024,Bia,bia@x.com,Ganho,97,Forms,20/03/2024 10:00,,  escalar  ,u2
3,ontem,Caio,caio@x.com,Lead,,Forms,,,,u3
";

    fn leads_table() -> Table {
        Table::from_csv_reader(LEADS_CSV.as_bytes()).unwrap()
    }

    #[test]
    fn test_refine_leads_renames_and_normalizes() {
        let mut table = leads_table();
        let report = refine_table(&mut table, Profile::Leads).unwrap();

        assert_eq!(
            table.columns(),
            &[
                "id", "dt_criacao", "nome", "email", "estagio", "valor", "de_origem", "dt_ganho",
                "dt_perda", "principais_desafios", "userId"
            ]
        );
        assert_eq!(report.rows, 3);
        assert_eq!(report.columns, 11);
        assert!(report.renamed.contains(&("created_at".into(), "dt_criacao".into())));
        // identity mappings are not reported
        assert!(!report.renamed.iter().any(|(from, _)| from == "id"));

        assert_eq!(table.column("dt_criacao").unwrap(), vec![Some("2024-02-03"), Some("2024-03-15"), None]);
        assert_eq!(table.column("dt_ganho").unwrap(), vec![None, Some("2024-03-20"), None]);
        assert_eq!(report.dates_coerced, 1);
        assert_eq!(report.null_tokens, 1);
    }

    #[test]
    fn test_refine_leads_strips_line_breaks() {
        let mut table = leads_table();
        refine_table(&mut table, Profile::Leads).unwrap();
        assert_eq!(
            table.column("principais_desafios").unwrap(),
            vec![Some("vender mais"), Some("escalar"), None]
        );
    }

    #[test]
    fn test_refine_closer_adds_extra_columns_and_dedups_user_id() {
        let csv = "id,name,userId,userid,user,created_at,documento\n7,Davi,a,b,c,01/01/2024,123\n";
        let mut table = Table::from_csv_reader(csv.as_bytes()).unwrap();
        let report = refine_table(&mut table, Profile::Closer).unwrap();

        assert_eq!(report.dropped_duplicates, vec!["userid".to_string()]);
        assert_eq!(table.column("userid").unwrap(), vec![Some("a")]);
        assert_eq!(table.column("usuario").unwrap(), vec![Some("c")]);
        // documento already existed, so eight of the nine extras were added
        assert_eq!(report.extra_columns_added.len(), 8);
        assert!(!report.extra_columns_added.contains(&"documento".to_string()));
        assert_eq!(table.column("campanha_nome").unwrap(), vec![None]);
        assert_eq!(table.column("documento").unwrap(), vec![Some("123")]);
    }

    #[test]
    fn test_closer_keeps_line_breaks() {
        let csv = "id,deal_notes\n1,\"a\nb\"\n";
        let mut table = Table::from_csv_reader(csv.as_bytes()).unwrap();
        refine_table(&mut table, Profile::Closer).unwrap();
        assert_eq!(table.column("notas_negociacao").unwrap(), vec![Some("a\nb")]);
    }

    #[test]
    fn test_refine_writes_silver_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bronze.csv");
        std::fs::write(&input, LEADS_CSV).unwrap();
        let output = dir.path().join("silver").join("leads-forms-accelera.parquet");

        let report = refine(&input, &output, Profile::Leads).unwrap();
        assert_eq!(report.rows, 3);

        let silver = read_parquet(&output).unwrap();
        assert_eq!(silver.height(), 3);
        assert_eq!(silver.column("nome").unwrap(), vec![Some("Ana"), Some("Bia"), Some("Caio")]);
        assert_eq!(silver.column("dt_perda").unwrap(), vec![None, None, None]);
    }

    #[test]
    fn test_missing_bronze_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = refine(
            &dir.path().join("missing.csv"),
            &dir.path().join("out.parquet"),
            Profile::Leads,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read bronze file"));
    }

    #[test]
    fn test_scraped_page_refines_through_leads_rename() {
        let html = r#"<main>
            <div class="deal-item"><p>Ana Lima</p><p>Ganho</p><p>R$ 1.500,00</p></div>
            <div class="deal-item"><p>Bruno Reis</p><p>Em negociação</p></div>
        </main>"#;
        let csv = accelera_acquire::fallback::scrape_leads(html, "https://app.clint.digital/origin/1").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("leads-forms-accelera.csv");
        std::fs::write(&input, csv).unwrap();
        let output = dir.path().join("leads-forms-accelera.parquet");

        let report = refine(&input, &output, Profile::Leads).unwrap();
        assert_eq!(report.rows, 2);
        assert!(report.dropped_duplicates.is_empty());

        let silver = read_parquet(&output).unwrap();
        assert_eq!(silver.columns(), &["id", "nome", "status_atual", "valor", "origin_url"]);
        assert_eq!(silver.column("nome").unwrap(), vec![Some("Ana Lima"), Some("Bruno Reis")]);
        assert_eq!(silver.column("status_atual").unwrap(), vec![Some("Ganho"), Some("Aberto")]);
        assert_eq!(silver.column("valor").unwrap(), vec![Some("R$ 1.500,00"), None]);
        assert_eq!(
            silver.column("origin_url").unwrap(),
            vec![Some("https://app.clint.digital/origin/1"); 2]
        );
    }
}
