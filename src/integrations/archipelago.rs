//! Scraper for the Archipelago web tracker.
//!
//! Reads `{base}/tracker/{room}/0/{slot}` and extracts the rows of the
//! `received-table` (item, amount, last order received).

use super::RemoteStateFetcher;
use crate::data::{RemoteItem, Tracker};
use crate::error::TrackerError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_BASE_URL: &str = "https://archipelago.gg";

static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<table\b[^>]*\bid\s*=\s*["']received-table["'][^>]*>(.*?)</table>"#)
        .expect("valid table regex")
});
static TBODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tbody\b[^>]*>(.*?)</tbody>").expect("valid tbody regex"));
static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid row regex"));
static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("valid cell regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Fetches tracker pages over HTTP
pub struct ArchipelagoFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ArchipelagoFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn tracker_url(&self, tracker: &Tracker) -> String {
        tracker_url(&self.base_url, tracker)
    }
}

/// Page URL for a tracker, with room and slot path-encoded
pub fn tracker_url(base_url: &str, tracker: &Tracker) -> String {
    format!(
        "{}/tracker/{}/0/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&tracker.room),
        urlencoding::encode(&tracker.slot)
    )
}

#[async_trait]
impl RemoteStateFetcher for ArchipelagoFetcher {
    async fn fetch(&self, tracker: &Tracker) -> Result<Vec<RemoteItem>, TrackerError> {
        let url = self.tracker_url(tracker);
        let fetch_err = |e: reqwest::Error| TrackerError::Fetch {
            tracker: tracker.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(fetch_err)?;

        if !response.status().is_success() {
            tracing::warn!("Tracker page {} returned status {}", url, response.status());
            return Ok(Vec::new());
        }

        let body = response.text().await.map_err(fetch_err)?;
        let items = parse_received_table(&body);
        if items.is_empty() {
            tracing::debug!("No received items found at {}", url);
        }
        Ok(items)
    }
}

/// Extract `(item, sequence)` rows from a tracker page.
///
/// Returns an empty list when the table is missing. Rows with fewer than
/// three cells or a non-numeric sequence are skipped.
pub fn parse_received_table(html: &str) -> Vec<RemoteItem> {
    let Some(table) = TABLE_RE.captures(html).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    let table = table.as_str();

    let body = TBODY_RE
        .captures(table)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(table);

    ROW_RE
        .captures_iter(body)
        .filter_map(|row| {
            let row = row.get(1)?.as_str();
            let cells: Vec<String> = CELL_RE
                .captures_iter(row)
                .filter_map(|c| c.get(1).map(|m| cell_text(m.as_str())))
                .collect();

            if cells.len() < 3 {
                return None;
            }

            match cells[2].parse::<u64>() {
                Ok(sequence) => Some(RemoteItem::new(cells[0].clone(), sequence)),
                Err(_) => {
                    tracing::debug!("Skipping row with unreadable order {:?}", cells[2]);
                    None
                }
            }
        })
        .collect()
}

fn cell_text(raw: &str) -> String {
    let stripped = TAG_RE.replace_all(raw, " ");
    let collapsed = WS_RE.replace_all(stripped.trim(), " ");
    decode_entities(&collapsed)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_url_encodes_segments() {
        let url = tracker_url("https://archipelago.gg/", &Tracker::new("abc DEF", "P1/2"));
        assert_eq!(url, "https://archipelago.gg/tracker/abc%20DEF/0/P1%2F2");
    }

    #[test]
    fn test_decode_entities_ampersand_last() {
        assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }
}
