//! In-memory bill list: load the aggregates, project them for display, and
//! search, filter and sort the result.

use crate::db;
use crate::ingest::{batch_key, parse_loose_date};
use crate::schema::{AggregateDocument, BillRecord, BillSummary, FetchParams, LastAction, SummarySponsor};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::debug;

/// Concatenate `aggregate_1`, `aggregate_2`, ... stopping at the first gap.
pub fn load_catalog(conn: &Connection, collection: &str) -> Result<Vec<BillRecord>> {
    let mut bills = Vec::new();
    let mut index = 1;
    loop {
        let key = batch_key(index);
        let Some(raw) = db::get_document(conn, collection, &key)? else {
            break;
        };
        let doc: AggregateDocument =
            serde_json::from_value(raw).with_context(|| format!("reading {collection}/{key}"))?;
        bills.extend(doc.bills);
        index += 1;
    }
    debug!("loaded {} bills from {} aggregates", bills.len(), index - 1);
    Ok(bills)
}

/// Split an id like "118-HR 1234" into API parameters.
pub fn fetch_params_from_id(id: &str) -> FetchParams {
    let (congress, raw_number) = id.split_once('-').unwrap_or((id, ""));
    let cleaned: String = raw_number
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let mut parts = cleaned.split_whitespace();
    FetchParams {
        congress: congress.to_string(),
        bill_type: parts.next().unwrap_or_default().to_lowercase(),
        number: parts.next().unwrap_or_default().to_string(),
    }
}

fn or_na(value: Option<&str>) -> String {
    value.unwrap_or("N/A").to_string()
}

impl BillSummary {
    pub fn from_record(bill: &BillRecord) -> BillSummary {
        let fetch_params = fetch_params_from_id(&bill.id);
        BillSummary {
            id: bill.id.clone(),
            identifier: bill.legislation_number.clone().unwrap_or_default(),
            congress: format!("{}th Congress", fetch_params.congress),
            title: bill.title.clone().unwrap_or_default(),
            sponsor: SummarySponsor {
                name: or_na(bill.sponsor.name.as_deref()),
                party: or_na(bill.sponsor.party.as_deref()),
            },
            introduced_date: bill
                .date_introduced
                .map(|date| date.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            last_action: LastAction {
                date: bill
                    .latest_action
                    .date
                    .map(|date| date.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                description: bill
                    .latest_action
                    .text
                    .clone()
                    .unwrap_or_else(|| "No recent action".to_string()),
            },
            cosponsor_count: bill.number_of_cosponsors,
            fetch_params,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillFilter {
    pub congress: Option<String>,
    pub sponsor: Option<String>,
}

impl BillFilter {
    pub fn is_active(&self) -> bool {
        self.active_count() > 0
    }

    pub fn active_count(&self) -> usize {
        [&self.congress, &self.sponsor]
            .iter()
            .filter(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
            .count()
    }

    pub fn matches(&self, bill: &BillSummary) -> bool {
        let congress_ok = match self.congress.as_deref() {
            Some(congress) if !congress.is_empty() => bill.congress == congress,
            _ => true,
        };
        let sponsor_ok = match self.sponsor.as_deref() {
            Some(sponsor) if !sponsor.is_empty() => bill.sponsor.name == sponsor,
            _ => true,
        };
        congress_ok && sponsor_ok
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Best,
    Alphabetical,
    Date,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best" => Ok(SortOrder::Best),
            "alphabetical" | "title" => Ok(SortOrder::Alphabetical),
            "date" => Ok(SortOrder::Date),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Case-insensitive substring match on title or identifier. A blank query
/// matches everything.
pub fn search<'a>(bills: &'a [BillSummary], query: &str) -> Vec<&'a BillSummary> {
    let query = query.trim().to_lowercase();
    bills
        .iter()
        .filter(|bill| {
            query.is_empty()
                || bill.title.to_lowercase().contains(&query)
                || bill.identifier.to_lowercase().contains(&query)
        })
        .collect()
}

/// Stable sort. `Date` is newest first with unknown dates last.
pub fn sort_bills(bills: &mut [&BillSummary], order: SortOrder) {
    match order {
        SortOrder::Best => {}
        SortOrder::Alphabetical => bills.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.title.cmp(&b.title))
        }),
        SortOrder::Date => bills.sort_by(|a, b| {
            let da = parse_loose_date(&a.introduced_date);
            let db = parse_loose_date(&b.introduced_date);
            match (da, db) {
                (Some(da), Some(db)) => db.cmp(&da),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub text: String,
    pub filter: BillFilter,
    pub sort: SortOrder,
}

/// Search, then filter, then sort.
pub fn run_query<'a>(bills: &'a [BillSummary], query: &CatalogQuery) -> Vec<&'a BillSummary> {
    let mut hits: Vec<&BillSummary> = search(bills, &query.text)
        .into_iter()
        .filter(|bill| query.filter.matches(bill))
        .collect();
    sort_bills(&mut hits, query.sort);
    hits
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub congresses: Vec<String>,
    pub sponsors: Vec<String>,
}

/// Distinct filter values in first-seen order.
pub fn filter_options(bills: &[BillSummary]) -> FilterOptions {
    let mut options = FilterOptions::default();
    for bill in bills {
        if !bill.congress.is_empty() && !options.congresses.contains(&bill.congress) {
            options.congresses.push(bill.congress.clone());
        }
        let name = &bill.sponsor.name;
        if !name.is_empty() && name != "N/A" && !options.sponsors.contains(name) {
            options.sponsors.push(name.clone());
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Sponsor;
    use time::macros::date;

    fn record(id: &str, title: &str, sponsor: &str, introduced: Option<time::Date>) -> BillRecord {
        BillRecord {
            id: id.to_string(),
            legislation_number: Some(id.split_once('-').unwrap().1.to_string()),
            title: Some(title.to_string()),
            sponsor: Sponsor {
                name: Some(sponsor.to_string()),
                party: None,
            },
            date_introduced: introduced,
            ..BillRecord::default()
        }
    }

    fn summaries() -> Vec<BillSummary> {
        [
            record("118-HR 10", "water rights", "Rep. A", Some(date!(2023 - 02 - 01))),
            record("117-S 20", "Clean Energy", "Sen. B", None),
            record("118-HRES 3", "Airport Safety", "Rep. A", Some(date!(2023 - 06 - 15))),
        ]
        .iter()
        .map(BillSummary::from_record)
        .collect()
    }

    #[test]
    fn summary_projection_defaults() {
        let bill = BillRecord {
            id: "118-HJRES 7".to_string(),
            ..BillRecord::default()
        };
        let summary = BillSummary::from_record(&bill);
        assert_eq!(summary.congress, "118th Congress");
        assert_eq!(summary.sponsor.name, "N/A");
        assert_eq!(summary.introduced_date, "N/A");
        assert_eq!(summary.last_action.description, "No recent action");
        assert_eq!(summary.fetch_params.bill_type, "hjres");
        assert_eq!(summary.fetch_params.number, "7");
    }

    #[test]
    fn fetch_params_strip_punctuation() {
        let params = fetch_params_from_id("118-H.Con.Res. 12");
        assert_eq!(params.congress, "118");
        assert_eq!(params.bill_type, "hconres");
        assert_eq!(params.number, "12");
    }

    #[test]
    fn search_matches_title_or_identifier() {
        let bills = summaries();
        let ids: Vec<&str> = search(&bills, "  ENERGY ").iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["117-S 20"]);

        let ids: Vec<&str> = search(&bills, "hres").iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["118-HRES 3"]);

        assert_eq!(search(&bills, "").len(), 3);
    }

    #[test]
    fn filters_combine() {
        let bills = summaries();
        let query = CatalogQuery {
            filter: BillFilter {
                congress: Some("118th Congress".to_string()),
                sponsor: Some("Rep. A".to_string()),
            },
            ..CatalogQuery::default()
        };
        assert_eq!(query.filter.active_count(), 2);
        assert_eq!(run_query(&bills, &query).len(), 2);

        let query = CatalogQuery {
            filter: BillFilter {
                congress: Some("117th Congress".to_string()),
                sponsor: Some("Rep. A".to_string()),
            },
            ..CatalogQuery::default()
        };
        assert!(run_query(&bills, &query).is_empty());
    }

    #[test]
    fn sort_orders() {
        let bills = summaries();
        let mut hits = search(&bills, "");
        sort_bills(&mut hits, SortOrder::Alphabetical);
        let titles: Vec<&str> = hits.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Airport Safety", "Clean Energy", "water rights"]);

        sort_bills(&mut hits, SortOrder::Date);
        let ids: Vec<&str> = hits.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["118-HRES 3", "118-HR 10", "117-S 20"]);

        let hits = run_query(&bills, &CatalogQuery::default());
        assert_eq!(hits[0].id, "118-HR 10");
        assert_eq!("Date".parse::<SortOrder>(), Ok(SortOrder::Date));
        assert!("newest".parse::<SortOrder>().is_err());
    }

    #[test]
    fn filter_options_first_seen_distinct() {
        let options = filter_options(&summaries());
        assert_eq!(options.congresses, vec!["118th Congress", "117th Congress"]);
        assert_eq!(options.sponsors, vec!["Rep. A", "Sen. B"]);
    }

    #[test]
    fn catalog_stops_at_first_missing_aggregate() {
        let conn = db::open_in_memory().unwrap();
        for (key, id) in [("aggregate_1", "118-HR 1"), ("aggregate_2", "118-HR 2"), ("aggregate_4", "118-HR 4")] {
            let doc = AggregateDocument {
                bills: vec![record(id, "t", "s", None)],
                written_at: "2024-01-01T00:00:00Z".to_string(),
            };
            db::put_document(&conn, "bills", key, &serde_json::to_value(&doc).unwrap()).unwrap();
        }
        let bills = load_catalog(&conn, "bills").unwrap();
        let ids: Vec<&str> = bills.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["118-HR 1", "118-HR 2"]);
    }
}
