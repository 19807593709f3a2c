//! CSV bill ingestion.
//!
//! Rows from a bulk legislation export are normalized into [`BillRecord`]s,
//! collected in memory, then written as fixed-size aggregate documents
//! `aggregate_1`, `aggregate_2`, ... Batches are independent writes: a failure
//! part way through leaves earlier batches in place.

use crate::config::IngestConfig;
use crate::db;
use crate::schema::{AggregateDocument, BillRecord, LatestAction, Sponsor};
use csv::{ReaderBuilder, StringRecord, Trim};
use rusqlite::Connection;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, UtcOffset};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read CSV stream: {0}")]
    Stream(#[from] csv::Error),

    #[error("failed to write batch {key}: {source}")]
    Persist {
        batch: usize,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to format write timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Why a row did not become a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSkip {
    MissingLegislationNumber,
    MissingCongress,
    EmptyIdentifier,
    Malformed(String),
}

impl std::fmt::Display for RowSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowSkip::MissingLegislationNumber => write!(f, "missing Legislation Number"),
            RowSkip::MissingCongress => write!(f, "missing Congress"),
            RowSkip::EmptyIdentifier => write!(f, "identifier empty after normalization"),
            RowSkip::Malformed(reason) => write!(f, "malformed row: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub records: usize,
    pub batches_written: usize,
}

#[derive(Debug, Default)]
pub struct ParsedRows {
    pub records: Vec<BillRecord>,
    pub rows_read: usize,
    pub rows_skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListField {
    RelatedBillRelationships,
    RelatedBillLatestActions,
    RelatedBills,
    Cosponsors,
    Subjects,
}

/// Repeating-column prefixes, most specific first. A column lands in the
/// first bucket whose prefix it starts with.
const LIST_PREFIXES: &[(&str, ListField)] = &[
    ("Related Bill Relationships Identified by", ListField::RelatedBillRelationships),
    ("Related Bill Latest Action", ListField::RelatedBillLatestActions),
    ("Related Bill", ListField::RelatedBills),
    ("Cosponsor", ListField::Cosponsors),
    ("Subject", ListField::Subjects),
];

fn list_field_for(column: &str) -> Option<ListField> {
    LIST_PREFIXES
        .iter()
        .find(|(prefix, _)| column.starts_with(prefix))
        .map(|(_, field)| *field)
}

/// A data row addressed by header name.
struct Row<'a> {
    headers: &'a [String],
    record: &'a StringRecord,
}

impl Row<'_> {
    /// First non-empty value under `column`. Ragged rows simply lack trailing cells.
    fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| header.as_str() == column)
            .filter_map(|(idx, _)| self.record.get(idx))
            .find(|value| !value.is_empty())
    }

    fn text(&self, column: &str) -> Option<String> {
        self.get(column).map(str::to_string)
    }

    fn cells(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .zip(self.record.iter())
            .map(|(header, value)| (header.as_str(), value))
    }
}

impl BillRecord {
    fn from_row(row: &Row<'_>) -> Result<BillRecord, RowSkip> {
        let legislation_number = row
            .get("Legislation Number")
            .ok_or(RowSkip::MissingLegislationNumber)?;
        let congress_raw = row.get("Congress").ok_or(RowSkip::MissingCongress)?;

        let leg_num = normalize_legislation_number(legislation_number);
        let congress_num = congress_digits(congress_raw);
        if leg_num.is_empty() || congress_num.is_empty() {
            return Err(RowSkip::EmptyIdentifier);
        }

        let mut cosponsors = Vec::new();
        let mut subjects = Vec::new();
        let mut related_bills = Vec::new();
        let mut related_bill_relationships = Vec::new();
        let mut related_bill_latest_actions = Vec::new();
        for (column, value) in row.cells() {
            if value.is_empty() {
                continue;
            }
            let bucket = match list_field_for(column) {
                Some(ListField::Cosponsors) => &mut cosponsors,
                Some(ListField::Subjects) => &mut subjects,
                Some(ListField::RelatedBills) => &mut related_bills,
                Some(ListField::RelatedBillRelationships) => &mut related_bill_relationships,
                Some(ListField::RelatedBillLatestActions) => &mut related_bill_latest_actions,
                None => continue,
            };
            bucket.push(value.to_string());
        }

        let number_of_related_bills = row
            .get("Number of Related Bills")
            .and_then(leading_int)
            .filter(|count| *count > 0)
            .unwrap_or(related_bills.len() as u32);

        Ok(BillRecord {
            id: format!("{congress_num}-{leg_num}"),
            legislation_number: Some(legislation_number.to_string()),
            url: row.text("URL"),
            congress: congress_num.parse().ok(),
            title: row.text("Title"),
            sponsor: Sponsor {
                name: row.text("Sponsor"),
                party: row.text("Party of Sponsor"),
            },
            date_introduced: row.get("Date of Introduction").and_then(parse_loose_date),
            committees: row.text("Committees"),
            latest_action: LatestAction {
                text: row.text("Latest Action"),
                date: row.get("Latest Action Date").and_then(parse_loose_date),
            },
            number_of_cosponsors: row
                .get("Number of Cosponsors")
                .and_then(leading_int)
                .unwrap_or(0),
            cosponsors,
            subjects,
            number_of_related_bills,
            related_bills,
            related_bill_relationships,
            related_bill_latest_actions,
            latest_summary: row.text("Latest Summary"),
            amends_bill: row.text("Amends Bill"),
            date_offered: row.get("Date Offered").and_then(parse_loose_date),
            date_submitted: row.get("Date Submitted").and_then(parse_loose_date),
            date_proposed: row.get("Date Proposed").and_then(parse_loose_date),
            amendment_text_latest: row.text("Amendment Text Latest"),
            amends_amendment: row.text("Amends Amendment"),
        })
    }
}

/// "H.R. 1234" -> "HR 1234"
pub fn normalize_legislation_number(raw: &str) -> String {
    raw.replace('.', "").trim().to_string()
}

/// First run of ASCII digits: "118th Congress (2023-2024)" -> "118".
pub fn congress_digits(raw: &str) -> &str {
    let Some(start) = raw.find(|c: char| c.is_ascii_digit()) else {
        return "";
    };
    let rest = &raw[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Leading-digit integer parse: "12 cosponsors" -> 12, "n/a" -> None.
pub fn leading_int(raw: &str) -> Option<u32> {
    let trimmed = raw.trim_start();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Parse the date shapes seen in legislation exports. Unknown shapes yield `None`.
pub fn parse_loose_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = Date::parse(raw, format_description!("[year]-[month]-[day]")) {
        return Some(date);
    }
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts.to_offset(UtcOffset::UTC).date());
    }
    parse_slash_date(raw).or_else(|| parse_month_name_date(raw))
}

// MM/DD/YYYY with optional trailing time
fn parse_slash_date(raw: &str) -> Option<Date> {
    let head = raw.split_whitespace().next()?;
    let mut parts = head.split('/');
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    let year_str = parts.next()?;
    if parts.next().is_some() || year_str.len() != 4 {
        return None;
    }
    let year: i32 = year_str.parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

// "January 3, 2023" or "Jan 3 2023"
fn parse_month_name_date(raw: &str) -> Option<Date> {
    let mut parts = raw.split_whitespace();
    let month = month_from_name(parts.next()?)?;
    let day: u8 = parts.next()?.trim_end_matches(',').parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Date::from_calendar_date(year, month, day).ok()
}

fn month_from_name(name: &str) -> Option<Month> {
    let lowered = name.trim_end_matches('.').to_lowercase();
    const NAMES: [(&str, Month); 12] = [
        ("january", Month::January),
        ("february", Month::February),
        ("march", Month::March),
        ("april", Month::April),
        ("may", Month::May),
        ("june", Month::June),
        ("july", Month::July),
        ("august", Month::August),
        ("september", Month::September),
        ("october", Month::October),
        ("november", Month::November),
        ("december", Month::December),
    ];
    NAMES
        .iter()
        .find(|(full, _)| lowered.len() >= 3 && full.starts_with(lowered.as_str()))
        .map(|(_, month)| *month)
}

fn is_row_level(err: &csv::Error) -> bool {
    matches!(
        err.kind(),
        csv::ErrorKind::Utf8 { .. } | csv::ErrorKind::UnequalLengths { .. }
    )
}

/// Stream rows from `reader` into records. Bad rows are logged and skipped;
/// a stream-level failure aborts with `IngestError::Stream`.
pub fn parse_records<R: Read>(reader: R) -> Result<ParsedRows, IngestError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            if idx == 0 {
                header.trim_start_matches('\u{feff}').trim().to_string()
            } else {
                header.to_string()
            }
        })
        .collect();

    let mut parsed = ParsedRows::default();
    for (idx, result) in csv_reader.records().enumerate() {
        // header is line 1
        let line = idx + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) if is_row_level(&err) => {
                parsed.rows_read += 1;
                parsed.rows_skipped += 1;
                warn!("skipping row {line}: {}", RowSkip::Malformed(err.to_string()));
                continue;
            }
            Err(err) => return Err(IngestError::Stream(err)),
        };
        parsed.rows_read += 1;

        let row = Row {
            headers: &headers,
            record: &record,
        };
        match BillRecord::from_row(&row) {
            Ok(bill) => parsed.records.push(bill),
            Err(reason) => {
                parsed.rows_skipped += 1;
                debug!("skipping row {line}: {reason}");
            }
        }
    }

    Ok(parsed)
}

pub fn batch_key(index: usize) -> String {
    format!("aggregate_{index}")
}

/// Contiguous chunks of at most `batch_size` records.
pub fn split_batches(records: Vec<BillRecord>, batch_size: usize) -> Vec<Vec<BillRecord>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut iter = records.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

/// Destination for aggregate documents.
pub trait BatchWriter {
    fn write_batch(&mut self, key: &str, document: &AggregateDocument) -> anyhow::Result<()>;
}

/// Writes aggregates into one collection of the SQLite document store.
pub struct SqliteBatchWriter<'a> {
    conn: &'a Connection,
    collection: String,
}

impl<'a> SqliteBatchWriter<'a> {
    pub fn new(conn: &'a Connection, collection: impl Into<String>) -> Self {
        Self {
            conn,
            collection: collection.into(),
        }
    }
}

impl BatchWriter for SqliteBatchWriter<'_> {
    fn write_batch(&mut self, key: &str, document: &AggregateDocument) -> anyhow::Result<()> {
        let body = serde_json::to_value(document)?;
        db::put_document(self.conn, &self.collection, key, &body)
    }
}

/// Write batches in order, each finished before the next starts. Returns the
/// number of batches written.
pub fn write_batches<W: BatchWriter>(
    writer: &mut W,
    records: Vec<BillRecord>,
    batch_size: usize,
    written_at: OffsetDateTime,
) -> Result<usize, IngestError> {
    let written_at = written_at.format(&Rfc3339)?;
    let mut written = 0;

    for (offset, bills) in split_batches(records, batch_size).into_iter().enumerate() {
        let batch = offset + 1;
        let key = batch_key(batch);
        let count = bills.len();
        let document = AggregateDocument {
            bills,
            written_at: written_at.clone(),
        };
        writer
            .write_batch(&key, &document)
            .map_err(|source| IngestError::Persist {
                batch,
                key: key.clone(),
                source,
            })?;
        debug!("wrote {key} with {count} bills");
        written += 1;
    }

    Ok(written)
}

/// Full pipeline: parse everything, then persist in batches.
pub fn ingest<R: Read, W: BatchWriter>(
    reader: R,
    writer: &mut W,
    batch_size: usize,
    written_at: OffsetDateTime,
) -> Result<IngestReport, IngestError> {
    let parsed = parse_records(reader)?;
    let records = parsed.records.len();
    if parsed.rows_skipped > 0 {
        warn!("skipped {} of {} rows", parsed.rows_skipped, parsed.rows_read);
    }

    let batches_written = write_batches(writer, parsed.records, batch_size, written_at)?;
    info!("stored {records} bills in {batches_written} aggregate documents");

    Ok(IngestReport {
        rows_read: parsed.rows_read,
        rows_skipped: parsed.rows_skipped,
        records,
        batches_written,
    })
}

/// Upload filter: `None` means the object should be processed, otherwise the
/// reason it is ignored.
pub fn skip_reason(object_path: &str, config: &IngestConfig) -> Option<&'static str> {
    if object_path.is_empty() {
        return Some("no object path");
    }
    if !object_path.starts_with(&config.upload_prefix) {
        return Some("not in upload folder");
    }
    if !object_path.to_lowercase().ends_with(".csv") {
        return Some("not a CSV file");
    }
    let file_name = Path::new(object_path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if file_name.starts_with(&config.processed_prefix) {
        return Some("already processed");
    }
    None
}

pub fn should_process(object_path: &str, config: &IngestConfig) -> bool {
    skip_reason(object_path, config).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(csv: &str) -> ParsedRows {
        parse_records(csv.as_bytes()).unwrap()
    }

    #[test]
    fn identifier_drops_dots_and_keeps_congress_digits() {
        let parsed = parse(
            "Legislation Number,Congress,Title\n\
             H.R. 1234,118th Congress (2023-2024),A bill\n",
        );
        assert_eq!(parsed.records.len(), 1);
        let bill = &parsed.records[0];
        assert_eq!(bill.id, "118-HR 1234");
        assert_eq!(bill.congress, Some(118));
        assert_eq!(bill.legislation_number.as_deref(), Some("H.R. 1234"));
        assert_eq!(bill.title.as_deref(), Some("A bill"));
    }

    #[test]
    fn rows_missing_key_fields_are_skipped() {
        let parsed = parse(
            "Legislation Number,Congress,Title\n\
             ,118th Congress,no number\n\
             S. 5,,no congress\n\
             S. 6,117th Congress,kept\n",
        );
        assert_eq!(parsed.rows_read, 3);
        assert_eq!(parsed.rows_skipped, 2);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].id, "117-S 6");
    }

    #[test]
    fn empty_identifier_after_normalization_is_skipped() {
        let parsed = parse(
            "Legislation Number,Congress\n\
             ...,118th Congress\n\
             H.R. 1,Congress\n",
        );
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.rows_skipped, 2);
    }

    #[test]
    fn specific_related_bill_prefixes_do_not_double_bucket() {
        let parsed = parse(
            "Legislation Number,Congress,Related Bill,Related Bill Relationships Identified by,Related Bill Latest Action,Related Bill\n\
             H.R. 1,118th Congress,S. 9,CRS,Passed Senate,H.R. 77\n",
        );
        let bill = &parsed.records[0];
        assert_eq!(bill.related_bills, vec!["S. 9", "H.R. 77"]);
        assert_eq!(bill.related_bill_relationships, vec!["CRS"]);
        assert_eq!(bill.related_bill_latest_actions, vec!["Passed Senate"]);
        assert_eq!(bill.number_of_related_bills, 2);
    }

    #[test]
    fn explicit_related_bill_count_wins_when_valid() {
        let parsed = parse(
            "Legislation Number,Congress,Number of Related Bills,Related Bill\n\
             H.R. 1,118,7,S. 9\n\
             H.R. 2,118,n/a,S. 9\n",
        );
        assert_eq!(parsed.records[0].number_of_related_bills, 7);
        assert_eq!(parsed.records[1].number_of_related_bills, 1);
    }

    #[test]
    fn cosponsors_and_subjects_collected_by_prefix() {
        let parsed = parse(
            "Legislation Number,Congress,Number of Cosponsors,Cosponsor,Cosponsor,Subject,Subject\n\
             S. 2,118,2,Rep. A,Rep. B,Health,\n",
        );
        let bill = &parsed.records[0];
        assert_eq!(bill.number_of_cosponsors, 2);
        assert_eq!(bill.cosponsors, vec!["Rep. A", "Rep. B"]);
        assert_eq!(bill.subjects, vec!["Health"]);
    }

    #[test]
    fn unparseable_numbers_default_to_zero() {
        let parsed = parse(
            "Legislation Number,Congress,Number of Cosponsors\n\
             S. 2,118,lots\n",
        );
        assert_eq!(parsed.records[0].number_of_cosponsors, 0);
        assert_eq!(parsed.records[0].number_of_related_bills, 0);
    }

    #[test]
    fn bad_dates_become_absent_without_dropping_the_row() {
        let parsed = parse(
            "Legislation Number,Congress,Date of Introduction,Latest Action Date\n\
             S. 2,118,sometime in spring,01/09/2023\n",
        );
        let bill = &parsed.records[0];
        assert_eq!(bill.date_introduced, None);
        assert_eq!(
            bill.latest_action.date,
            Some(Date::from_calendar_date(2023, Month::January, 9).unwrap())
        );
    }

    #[test]
    fn loose_date_shapes() {
        let jan3 = Date::from_calendar_date(2023, Month::January, 3).unwrap();
        assert_eq!(parse_loose_date("2023-01-03"), Some(jan3));
        assert_eq!(parse_loose_date("1/3/2023"), Some(jan3));
        assert_eq!(parse_loose_date("01/03/2023 12:00"), Some(jan3));
        assert_eq!(parse_loose_date("January 3, 2023"), Some(jan3));
        assert_eq!(parse_loose_date("Jan 3 2023"), Some(jan3));
        assert_eq!(parse_loose_date("2023-01-03T10:00:00Z"), Some(jan3));
        assert_eq!(parse_loose_date("13/45/2023"), None);
        assert_eq!(parse_loose_date("03/01/23"), None);
        assert_eq!(parse_loose_date(""), None);
    }

    #[test]
    fn leading_int_mimics_prefix_parse() {
        assert_eq!(leading_int("12"), Some(12));
        assert_eq!(leading_int(" 12 cosponsors"), Some(12));
        assert_eq!(leading_int("none"), None);
        assert_eq!(leading_int("-4"), None);
    }

    #[test]
    fn bom_and_ragged_rows_are_tolerated() {
        let parsed = parse(
            "\u{feff}Legislation Number,Congress,Title,Sponsor\n\
             H.R. 3,118\n\
             H.R. 4,118,Full,Rep. Z,extra\n",
        );
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].title, None);
        assert_eq!(parsed.records[1].sponsor.name.as_deref(), Some("Rep. Z"));
    }

    #[test]
    fn invalid_utf8_row_is_skipped_not_fatal() {
        let mut bytes = b"Legislation Number,Congress,Title\nH.R. 1,118,ok\nH.R. 2,118,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"H.R. 3,118,also ok\n");

        let parsed = parse_records(bytes.as_slice()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.rows_skipped, 1);
    }

    #[test]
    fn split_batches_sizes() {
        let records: Vec<BillRecord> = (0..850)
            .map(|i| BillRecord {
                id: format!("118-HR {i}"),
                ..BillRecord::default()
            })
            .collect();
        let sizes: Vec<usize> = split_batches(records, 400).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![400, 400, 50]);
        assert!(split_batches(Vec::new(), 400).is_empty());
    }

    #[test]
    fn upload_filter() {
        let config = IngestConfig::default();
        assert!(should_process("bill_csv_uploads/2024.csv", &config));
        assert!(should_process("bill_csv_uploads/nested/2024.CSV", &config));
        assert_eq!(skip_reason("other/2024.csv", &config), Some("not in upload folder"));
        assert_eq!(skip_reason("bill_csv_uploads/2024.json", &config), Some("not a CSV file"));
        assert_eq!(
            skip_reason("bill_csv_uploads/processed_2024.csv", &config),
            Some("already processed")
        );
        assert_eq!(skip_reason("", &config), Some("no object path"));
    }
}
