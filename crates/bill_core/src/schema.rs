use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::Date;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sponsor {
    pub name: Option<String>,
    pub party: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LatestAction {
    pub text: Option<String>,
    #[serde(default, with = "iso_date::option")]
    #[schemars(with = "Option<String>")]
    pub date: Option<Date>, // YYYY-MM-DD
}

/// One bill as produced by CSV ingestion. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillRecord {
    pub id: String, // "<congress>-<legislation number without dots>"
    pub legislation_number: Option<String>,
    pub url: Option<String>,
    pub congress: Option<u32>,
    pub title: Option<String>,
    pub sponsor: Sponsor,
    #[serde(default, with = "iso_date::option")]
    #[schemars(with = "Option<String>")]
    pub date_introduced: Option<Date>,
    pub committees: Option<String>,
    pub latest_action: LatestAction,
    pub number_of_cosponsors: u32,
    pub cosponsors: Vec<String>,
    pub subjects: Vec<String>,
    pub number_of_related_bills: u32,
    pub related_bills: Vec<String>,
    pub related_bill_relationships: Vec<String>,
    pub related_bill_latest_actions: Vec<String>,
    pub latest_summary: Option<String>,
    pub amends_bill: Option<String>,
    #[serde(default, with = "iso_date::option")]
    #[schemars(with = "Option<String>")]
    pub date_offered: Option<Date>,
    #[serde(default, with = "iso_date::option")]
    #[schemars(with = "Option<String>")]
    pub date_submitted: Option<Date>,
    #[serde(default, with = "iso_date::option")]
    #[schemars(with = "Option<String>")]
    pub date_proposed: Option<Date>,
    pub amendment_text_latest: Option<String>,
    pub amends_amendment: Option<String>,
}

/// A persisted batch of up to `batch_size` records, stored as `aggregate_<n>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDocument {
    pub bills: Vec<BillRecord>,
    pub written_at: String, // RFC 3339, UTC
}

/// Parameters addressing a single bill in the legislation API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FetchParams {
    pub congress: String,
    #[serde(rename = "type")]
    pub bill_type: String, // e.g. "hr", "s", "hjres"
    pub number: String,
}

impl FetchParams {
    pub fn cache_key(&self) -> String {
        format!("{}-{}-{}", self.congress, self.bill_type, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SummarySponsor {
    pub name: String,
    pub party: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LastAction {
    pub date: String,
    pub description: String,
}

/// List-view projection of a `BillRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillSummary {
    pub id: String,
    pub identifier: String,
    pub congress: String, // "118th Congress"
    pub title: String,
    pub sponsor: SummarySponsor,
    pub introduced_date: String,
    pub last_action: LastAction,
    pub cosponsor_count: u32,
    pub fetch_params: FetchParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillMeta {
    pub identifier: String,
    pub congress: String,
    pub title: String,
    pub status: String,
    pub sponsor: String,
    pub sponsor_party: String,
    pub sponsor_state: String,
    pub sponsor_district: String,
    pub introduced_date: String,
    pub last_action: LastAction,
    pub key_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Amendment {
    pub number: Option<String>,
    #[serde(rename = "type")]
    pub amendment_type: Option<String>,
    pub purpose: Option<String>,
    pub description: Option<String>,
    pub latest_action_date: String,
    pub latest_action_text: String,
    pub url: Option<String>,
}

/// Detail payload served to clients and cached per bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillDetail {
    pub text_html: String,
    pub text_plain: String,
    pub meta: BillMeta,
    pub amendment_list: Vec<Amendment>,
}
