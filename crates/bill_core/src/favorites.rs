use crate::db;
use anyhow::anyhow;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("missing bill data or bill id")]
    BadRequest,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl UserStoreError {
    pub fn status(&self) -> u16 {
        match self {
            UserStoreError::BadRequest => 400,
            UserStoreError::Store(_) => 500,
        }
    }
}

fn bill_id(bill: &Value) -> Option<&str> {
    bill.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
}

/// Append `bill` to the user's favorites unless one with the same id is
/// already there. Returns whether it was added.
pub fn save_favorite(
    conn: &Connection,
    uid: &str,
    bill: &Value,
    now: OffsetDateTime,
) -> Result<bool, UserStoreError> {
    let id = bill_id(bill).ok_or(UserStoreError::BadRequest)?;

    let added = db::update_document(conn, USERS_COLLECTION, uid, |current| {
        let is_new = current.is_none();
        let mut doc = match current {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(anyhow!("user document {uid} is not an object")),
            None => Map::new(),
        };

        let mut favorites = doc
            .get("favorites")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if favorites.iter().any(|fav| bill_id(fav) == Some(id)) {
            return Ok((None, false));
        }
        favorites.push(bill.clone());
        doc.insert("favorites".to_string(), Value::Array(favorites));
        if is_new {
            doc.insert("createdAt".to_string(), json!(now.format(&Rfc3339)?));
        }
        Ok((Some(Value::Object(doc)), true))
    })?;

    if added {
        info!("saved favorite {id} for user {uid}");
    } else {
        info!("duplicate favorite {id} not added for user {uid}");
    }
    Ok(added)
}

/// The user's favorites; empty when the user has no document yet.
pub fn get_favorites(conn: &Connection, uid: &str) -> Result<Vec<Value>, UserStoreError> {
    let favorites = db::get_document(conn, USERS_COLLECTION, uid)?
        .and_then(|doc| doc.get("favorites").and_then(Value::as_array).cloned())
        .unwrap_or_default();
    info!("retrieved {} favorites for user {uid}", favorites.len());
    Ok(favorites)
}

/// Stored profile fields minus favorites, overlaid with the caller's identity.
pub fn get_profile(conn: &Connection, uid: &str, email: Option<&str>) -> Result<Value, UserStoreError> {
    let mut profile = match db::get_document(conn, USERS_COLLECTION, uid)? {
        Some(Value::Object(map)) => map,
        _ => {
            info!("no stored profile for {uid}, returning identity only");
            Map::new()
        }
    };
    profile.remove("favorites");
    profile.insert("uid".to_string(), json!(uid));
    if let Some(email) = email {
        profile.insert("email".to_string(), json!(email));
    }
    Ok(Value::Object(profile))
}
