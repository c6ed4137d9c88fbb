//! Issuer keys: listing and renaming.

use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};

use super::{Fields, RecordGateway, RecordStore};
use crate::client::SecretsClient;
use crate::error::{PkiError, Result};
use crate::util;

pub const MODEL_NAME: &str = "pki/key";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRecord {
    pub key_id: String,
    pub fields: Fields,
}

impl KeyRecord {
    pub fn from_fields(mut fields: Fields) -> Option<Self> {
        match fields.remove("key_id") {
            Some(Value::String(key_id)) => Some(Self { key_id, fields }),
            _ => None,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut out = Fields::new();
        out.insert("key_id".into(), Value::String(self.key_id.clone()));
        util::merge_objects(out, self.fields.clone())
    }

    pub fn key_name(&self) -> Option<&str> {
        self.fields.get("key_name").and_then(Value::as_str)
    }
}

pub struct KeyGateway {
    client: SecretsClient,
    mount:  String,
    store:  Arc<RecordStore>,
}

impl KeyGateway {
    pub fn new(client: SecretsClient, mount: &str, store: Arc<RecordStore>) -> Self {
        Self { client, mount: mount.trim_matches('/').to_string(), store }
    }

    pub async fn list(&self) -> Result<Vec<KeyRecord>> {
        let Some(payload) = self.client.list(&format!("{}/keys", self.mount)).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .normalize_list(payload)
            .into_iter()
            .filter_map(|fields| {
                let Some(key) = KeyRecord::from_fields(fields) else {
                    warn!("{}: skipping key listing entry without key_id", self.mount);
                    return None;
                };
                self.store.push_payload(MODEL_NAME, &key.key_id, key.to_fields());
                Some(key)
            })
            .collect())
    }
}

impl RecordGateway for KeyGateway {
    type Draft = KeyRecord;

    const MODEL_NAME: &'static str = MODEL_NAME;
    const PRIMARY_KEY: &'static str = "key_id";

    /// Only the name of a key is writable.
    async fn submit(&self, draft: &KeyRecord) -> Result<Fields> {
        let name = draft
            .key_name()
            .ok_or_else(|| PkiError::Protocol(format!("key {} has no key_name", draft.key_id)))?;
        let path = format!("{}/key/{}", self.mount, draft.key_id);
        let fields = match self.client.post_json(&path, &json!({ "key_name": name })).await? {
            Some(payload) => self.normalize_detail(payload, &draft.key_id),
            None => draft.to_fields(),
        };
        Ok(self.store.push_payload(MODEL_NAME, &draft.key_id, fields))
    }
}
