//! DOM scrape used when the native CSV export fails.
//!
//! Produces a much thinner CSV than the export (one row per deal card),
//! built only from what is visible in the page source.

use scraper::{ElementRef, Html, Selector};

/// Card selectors tried in order; the first one with matches wins.
const CARD_SELECTORS: &[&str] = &[
    "[data-cy*='deal']",
    "[data-cy*='lead']",
    ".lead-item",
    ".deal-item",
    ".business-item",
    ".opportunity-item",
    ".card",
    ".item",
];

const HEADER: [&str; 5] = ["id", "name", "status", "value", "origin_url"];
const MAX_NAME_CHARS: usize = 50;
/// Cards with this little text are layout chrome, not deals.
const MIN_CARD_CHARS: usize = 6;

/// One deal card read from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedLead {
    pub name: String,
    pub status: &'static str,
    pub value: Option<String>,
}

fn card_lines(card: ElementRef<'_>) -> Vec<String> {
    card.text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn classify(lines: &[String]) -> ScrapedLead {
    let lower: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
    let status = if lower.iter().any(|l| l.contains("ganho") || l.contains("won")) {
        "Ganho"
    } else if lower.iter().any(|l| l.contains("perdido") || l.contains("lost")) {
        "Perdido"
    } else {
        "Aberto"
    };
    let value = lines
        .iter()
        .zip(&lower)
        .find(|(_, l)| l.contains("r$"))
        .map(|(line, _)| line.clone());
    let name = lines
        .first()
        .map(|l| l.chars().take(MAX_NAME_CHARS).collect())
        .unwrap_or_default();

    ScrapedLead { name, status, value }
}

/// Read deal cards from the page source.
pub fn scrape_cards(html: &str) -> Vec<ScrapedLead> {
    let document = Html::parse_document(html);

    for css in CARD_SELECTORS {
        let selector = Selector::parse(css).expect("valid selector");
        let cards: Vec<ElementRef<'_>> = document.select(&selector).collect();
        if cards.is_empty() {
            continue;
        }

        tracing::info!(selector = css, cards = cards.len(), "Found deal cards");
        return cards
            .into_iter()
            .map(card_lines)
            .filter(|lines| lines.iter().map(String::len).sum::<usize>() >= MIN_CARD_CHARS)
            .map(|lines| classify(&lines))
            .collect();
    }
    Vec::new()
}

/// Scrape the page into a CSV with columns `id,name,status,value,origin_url`.
/// Returns `None` when no cards were found.
pub fn scrape_leads(html: &str, page_url: &str) -> Option<String> {
    let leads = scrape_cards(html);
    if leads.is_empty() {
        tracing::warn!(url = page_url, "No deal cards found in the page");
        return None;
    }

    let mut wtr = csv::Writer::from_writer(Vec::new());
    let mut rows = vec![HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
    rows.extend(leads.iter().enumerate().map(|(i, lead)| {
        vec![
            (i + 1).to_string(),
            lead.name.clone(),
            lead.status.to_string(),
            lead.value.clone().unwrap_or_default(),
            page_url.to_string(),
        ]
    }));
    for row in &rows {
        if let Err(e) = wtr.write_record(row) {
            tracing::warn!("Failed to encode scraped row: {e}");
            return None;
        }
    }

    let bytes = wtr.into_inner().ok()?;
    tracing::info!(rows = leads.len(), "Built CSV from page cards");
    String::from_utf8(bytes).ok()
}
