//! Record gateways: request shaping and response normalization for the PKI
//! record kinds, plus the in-process store normalized records land in.

pub mod ca;
pub mod issuer;
pub mod key;
pub mod role;

use std::collections::BTreeMap;
use std::sync::Mutex;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::cert;
use crate::error::Result;
use crate::util;

pub type Fields = Map<String, Value>;

/// Top-level response keys that describe the request, not the record.
pub const RESPONSE_ENVELOPE: &[&str] = &[
    "auth",
    "lease_duration",
    "lease_id",
    "mount_type",
    "renewable",
    "request_id",
    "warnings",
    "wrap_info",
];

/// One record kind exposed by the secrets engine.
#[allow(async_fn_in_trait)]
pub trait RecordGateway {
    /// What [`submit`](Self::submit) writes.
    type Draft;

    /// Store namespace of this record kind, e.g. `pki/issuer`.
    const MODEL_NAME: &'static str;
    /// Field that identifies one record in listings.
    const PRIMARY_KEY: &'static str;

    /// Send `draft` to the server and return the normalized record, which is
    /// also pushed into the store.
    async fn submit(&self, draft: &Self::Draft) -> Result<Fields>;

    /// Flatten a `{ data: { keys, key_info } }` listing into one record per
    /// key, in `keys` order.
    fn normalize_list(&self, payload: Value) -> Vec<Fields> {
        flatten_keyed_list(payload, Self::PRIMARY_KEY)
    }

    /// Normalize a single-record read of `id`.
    fn normalize_detail(&self, payload: Value, id: &str) -> Fields {
        let mut record = lift_data(payload);
        record
            .entry(Self::PRIMARY_KEY.to_string())
            .or_insert_with(|| Value::String(id.to_string()));
        record
    }
}

/// Listing flattener shared by every gateway.
///
/// A payload whose `data` has no `keys` array is a single record: its `data`
/// fields are lifted to the top level.
pub fn flatten_keyed_list(payload: Value, primary_key: &str) -> Vec<Fields> {
    let keyed = payload
        .get("data")
        .and_then(|d| d.get("keys"))
        .is_some_and(Value::is_array);
    if !keyed {
        let record = lift_data(payload);
        return if record.is_empty() { Vec::new() } else { vec![record] };
    }

    let data = match util::object_or_empty(payload).remove("data") {
        Some(Value::Object(data)) => data,
        _ => return Vec::new(),
    };
    let Some(keys) = data.get("keys").and_then(Value::as_array) else {
        return Vec::new();
    };
    let info = data.get("key_info").and_then(Value::as_object);

    keys.iter()
        .filter_map(Value::as_str)
        .map(|id| {
            let mut record = Fields::new();
            record.insert(primary_key.to_string(), Value::String(id.to_string()));
            if let Some(fields) = info.and_then(|i| i.get(id)).and_then(Value::as_object) {
                for (k, v) in fields {
                    record.insert(k.clone(), v.clone());
                }
            }
            record
        })
        .collect()
}

/// Move `data`'s fields to the top level of the response, dropping the
/// response envelope around them.  Server warnings are logged.
pub fn lift_data(payload: Value) -> Fields {
    let mut top = util::object_or_empty(payload);
    if let Some(warnings) = top.get("warnings").and_then(Value::as_array) {
        for w in warnings.iter().filter_map(Value::as_str) {
            warn!("server warning: {w}");
        }
    }
    let data = match top.remove("data") {
        Some(Value::Object(data)) => data,
        _ => Fields::new(),
    };
    top.retain(|k, _| !RESPONSE_ENVELOPE.contains(&k.as_str()));
    util::merge_objects(top, data)
}

/// Shape a certificate-producing write response for the store.
///
/// An empty body counts as `{}`.  `id` and `modelName` are always stamped on.
/// When `data.certificate` is present its metadata is merged in at the top
/// level, overriding server fields of the same name; a certificate that does
/// not decode leaves the response as it came.
pub fn normalize_certificate_response(id: &str, model_name: &str, response: Option<Value>) -> Fields {
    let mut resp = response.map(util::object_or_empty).unwrap_or_default();
    resp.insert("id".into(), Value::String(id.to_string()));
    resp.insert("modelName".into(), Value::String(model_name.to_string()));

    let Some(data) = resp.get("data") else {
        debug!("{id}: response carries no data");
        return resp;
    };
    match cert::parse_pki_cert(data) {
        Ok(Some(meta)) => util::merge_objects(resp, meta.to_json_map()),
        Ok(None) => resp,
        Err(e) => {
            warn!("{id}: certificate in response did not parse: {e}");
            resp
        }
    }
}

// ── Record store ──────────────────────────────────────────────────────────────

/// Normalized records keyed by model name and id.
///
/// Pushing a payload for an existing record merges into it, newer fields
/// winning, the way a client-side model store updates attributes.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Mutex<BTreeMap<(String, String), Fields>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), Fields>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge `payload` into `model_name`/`id` and return the stored record.
    pub fn push_payload(&self, model_name: &str, id: &str, payload: Fields) -> Fields {
        let mut records = self.lock();
        let key = (model_name.to_string(), id.to_string());
        let merged = match records.remove(&key) {
            Some(existing) => util::merge_objects(existing, payload),
            None => payload,
        };
        records.insert(key, merged.clone());
        merged
    }

    /// Drop a record, e.g. after the server deleted it.  Returns whether it
    /// was stored.
    pub fn unload(&self, model_name: &str, id: &str) -> bool {
        self.lock()
            .remove(&(model_name.to_string(), id.to_string()))
            .is_some()
    }

    #[cfg(test)]
    pub fn peek(&self, model_name: &str, id: &str) -> Option<Fields> {
        self.lock()
            .get(&(model_name.to_string(), id.to_string()))
            .cloned()
    }
}
