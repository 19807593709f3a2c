//! Bill detail assembly over the legislation API, with a per-bill cache.

use crate::cache;
use crate::config::{AppConfig, CongressApiConfig};
use crate::schema::{Amendment, BillDetail, BillMeta, FetchParams, LastAction};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use regex::Regex;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};

const KEY_TEXT_CHARS: usize = 300;

static PRE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>").expect("static regex"));

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream resource not found")]
    NotFound,

    #[error("upstream request failed: {0}")]
    Request(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DetailError {
    #[error("missing required parameters")]
    BadRequest,

    #[error("bill not found")]
    NotFound,

    #[error("server configuration error: missing API key")]
    MissingApiKey,

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl DetailError {
    /// HTTP status a request handler should answer with.
    pub fn status(&self) -> u16 {
        match self {
            DetailError::BadRequest => 400,
            DetailError::NotFound => 404,
            DetailError::MissingApiKey | DetailError::Upstream(_) => 500,
        }
    }
}

impl From<SourceError> for DetailError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound => DetailError::NotFound,
            SourceError::Request(err) => DetailError::Upstream(err),
        }
    }
}

/// Read access to the legislation API.
pub trait BillSource {
    fn get_json(&self, url: &Url) -> Result<Value, SourceError>;
    fn get_text(&self, url: &Url) -> Result<String, SourceError>;
}

pub struct HttpBillSource {
    client: Client,
}

impl HttpBillSource {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }

    fn send(&self, url: &Url) -> Result<reqwest::blocking::Response, SourceError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .map_err(request_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        resp.error_for_status()
            .map_err(request_error)
    }
}

/// Request URLs carry the API key, so reqwest errors lose theirs.
fn request_error(err: reqwest::Error) -> SourceError {
    SourceError::Request(err.without_url().into())
}

impl BillSource for HttpBillSource {
    fn get_json(&self, url: &Url) -> Result<Value, SourceError> {
        self.send(url)?
            .json()
            .map_err(request_error)
    }

    fn get_text(&self, url: &Url) -> Result<String, SourceError> {
        self.send(url)?
            .text()
            .map_err(request_error)
    }
}

/// Trimmed parameters with the bill type reduced to lowercase alphanumerics.
/// `None` when any part is empty.
pub fn normalize_params(params: &FetchParams) -> Option<FetchParams> {
    let normalized = FetchParams {
        congress: params.congress.trim().to_string(),
        bill_type: params
            .bill_type
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect(),
        number: params.number.trim().to_string(),
    };
    if normalized.congress.is_empty()
        || normalized.bill_type.is_empty()
        || normalized.number.is_empty()
    {
        return None;
    }
    Some(normalized)
}

fn with_api_key(url: &str, key: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(url)?;
    url.query_pairs_mut().append_pair("api_key", key);
    Ok(url)
}

pub fn detail_url(api: &CongressApiConfig, params: &FetchParams) -> anyhow::Result<Url> {
    let mut url = Url::parse(api.base_url.trim_end_matches('/'))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("base url cannot carry a path: {}", api.base_url))?
        .extend([
            "bill",
            params.congress.as_str(),
            params.bill_type.as_str(),
            params.number.as_str(),
        ]);
    url.query_pairs_mut().append_pair("api_key", &api.api_key);
    Ok(url)
}

fn redact(url: &Url) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| *name != "api_key")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut shown = url.clone();
    if kept.is_empty() {
        shown.set_query(None);
    } else {
        shown.query_pairs_mut().clear().extend_pairs(kept);
    }
    shown.to_string()
}

/// Body of the first `<pre>` element, trimmed.
pub fn extract_pre(html: &str) -> Option<String> {
    PRE_BLOCK
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn value_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_or(value: &Value, default: &str) -> String {
    value_str(value).unwrap_or_else(|| default.to_string())
}

pub fn key_text(text_plain: &str) -> String {
    if text_plain.is_empty() {
        return "Key text not available".to_string();
    }
    if text_plain.chars().count() > KEY_TEXT_CHARS {
        let head: String = text_plain.chars().take(KEY_TEXT_CHARS).collect();
        format!("{head}...")
    } else {
        text_plain.to_string()
    }
}

/// Summary block derived from the API's `bill` object.
pub fn build_meta(bill: &Value, text_plain: &str) -> BillMeta {
    let sponsor = &bill["sponsors"][0];
    let latest = &bill["latestAction"];

    BillMeta {
        identifier: format!("{} {}", str_or(&bill["type"], "N/A"), str_or(&bill["number"], "N/A")),
        congress: value_str(&bill["congress"])
            .map(|congress| format!("{congress}th Congress"))
            .unwrap_or_else(|| "N/A".to_string()),
        title: str_or(&bill["title"], "No Title Available"),
        status: str_or(&latest["text"], "Status not available"),
        sponsor: str_or(&sponsor["name"], "N/A"),
        sponsor_party: str_or(&sponsor["party"], "N/A"),
        sponsor_state: str_or(&sponsor["state"], "N/A"),
        sponsor_district: str_or(&sponsor["district"], "N/A"),
        introduced_date: str_or(&bill["introducedDate"], "N/A"),
        last_action: LastAction {
            date: str_or(&latest["actionDate"], "N/A"),
            description: str_or(&latest["text"], "No recent action"),
        },
        key_text: key_text(text_plain),
    }
}

#[derive(Debug, Default, PartialEq)]
struct BillText {
    html: String,
    plain: String,
}

const FORMAT_PREFERENCE: [&str; 2] = ["Plain Text", "Formatted Text"];

fn fetch_text<S: BillSource>(source: &S, bill: &Value, key: &str, label: &str) -> BillText {
    let mut text = BillText::default();
    let Some(list_url) = bill["textVersions"]["url"].as_str() else {
        info!("no text versions for {label}");
        return text;
    };

    let formats = match with_api_key(list_url, key)
        .map_err(SourceError::from)
        .and_then(|url| source.get_json(&url))
    {
        Ok(list) => list["textVersions"][0]["formats"]
            .as_array()
            .cloned()
            .unwrap_or_default(),
        Err(err) => {
            error!("fetching text versions for {label}: {err}");
            return text;
        }
    };

    for format_type in FORMAT_PREFERENCE {
        let Some(format_url) = formats
            .iter()
            .filter(|format| format["type"].as_str() == Some(format_type))
            .find_map(|format| format["url"].as_str())
        else {
            continue;
        };

        let fetched = with_api_key(format_url, key)
            .map_err(SourceError::from)
            .and_then(|url| {
                info!("fetching {format_type} from {}", redact(&url));
                source.get_text(&url)
            });
        let raw = match fetched {
            Ok(raw) => raw,
            Err(err) => {
                warn!("{format_type} for {label} unavailable: {err}");
                continue;
            }
        };

        if format_type == "Formatted Text" {
            match extract_pre(&raw) {
                Some(pre) => {
                    text.plain = pre;
                    text.html.clear();
                }
                // sanitizing is left to whoever renders it
                None => {
                    text.html = raw;
                    text.plain.clear();
                }
            }
        } else {
            text.plain = raw;
            text.html.clear();
        }

        if !text.html.is_empty() || !text.plain.is_empty() {
            info!("bill text for {label} taken from {format_type}");
            break;
        }
    }

    if text.html.is_empty() && text.plain.is_empty() {
        warn!("no usable bill text for {label}");
    }
    text
}

fn fetch_amendments<S: BillSource>(source: &S, bill: &Value, key: &str, label: &str) -> Vec<Amendment> {
    let Some(list_url) = bill["amendments"]["url"].as_str() else {
        return Vec::new();
    };

    let listed = with_api_key(list_url, key)
        .map_err(SourceError::from)
        .and_then(|url| {
            info!("fetching amendments from {}", redact(&url));
            source.get_json(&url)
        });

    match listed {
        Ok(body) => {
            let amendments: Vec<Amendment> = body["amendments"]
                .as_array()
                .map(|items| items.iter().map(amendment_from_api).collect())
                .unwrap_or_default();
            info!("found {} amendments for {label}", amendments.len());
            amendments
        }
        Err(err) => {
            error!("fetching amendments for {label}: {err}");
            Vec::new()
        }
    }
}

fn amendment_from_api(item: &Value) -> Amendment {
    Amendment {
        number: value_str(&item["number"]),
        amendment_type: value_str(&item["type"]),
        purpose: value_str(&item["purpose"]),
        description: value_str(&item["description"]),
        latest_action_date: str_or(&item["latestAction"]["actionDate"], ""),
        latest_action_text: str_or(&item["latestAction"]["text"], ""),
        url: value_str(&item["url"]),
    }
}

/// Fetch one bill plus its text and amendments. Text and amendment failures
/// degrade to empty values; only the bill lookup itself can fail the call.
pub fn fetch_bill_detail<S: BillSource>(
    source: &S,
    api: &CongressApiConfig,
    params: &FetchParams,
) -> Result<BillDetail, DetailError> {
    let params = normalize_params(params).ok_or(DetailError::BadRequest)?;
    if api.api_key.trim().is_empty() {
        error!("missing legislation API key");
        return Err(DetailError::MissingApiKey);
    }
    let key = api.api_key.as_str();
    let label = params.cache_key();

    let url = detail_url(api, &params)?;
    info!("fetching bill detail from {}", redact(&url));
    let body = source.get_json(&url)?;
    let bill = &body["bill"];
    if !bill.is_object() {
        warn!("bill {label} not found upstream");
        return Err(DetailError::NotFound);
    }

    let text = fetch_text(source, bill, key, &label);
    let amendment_list = fetch_amendments(source, bill, key, &label);
    let meta = build_meta(bill, &text.plain);

    Ok(BillDetail {
        text_html: text.html,
        text_plain: text.plain,
        meta,
        amendment_list,
    })
}

/// Serve from cache while fresh, otherwise fetch and overwrite the entry.
pub fn get_bill_detail<S: BillSource>(
    conn: &Connection,
    source: &S,
    config: &AppConfig,
    params: &FetchParams,
    now: OffsetDateTime,
) -> Result<BillDetail, DetailError> {
    let params = normalize_params(params).ok_or(DetailError::BadRequest)?;
    let key = params.cache_key();

    if let Some(detail) = cache::read_fresh(conn, &config.cache, &key, now)? {
        info!("serving bill detail for {key} from cache");
        return Ok(detail);
    }

    let detail = fetch_bill_detail(source, &config.congress_api, &params)?;
    cache::write(conn, &config.cache, &key, &detail, now)?;
    info!("cached bill detail for {key}");
    Ok(detail)
}
