//! Read-time schema upgrade for the state document.
//!
//! Version 1 files have no `meta` entry and use the `vk_profile` /
//! `vk_verified` field names; pending questions keep their answers under
//! `answers`. Records may also lack timestamps or a `stand_status` map.
//! Everything is upgraded in place on the raw JSON before typed decoding, so
//! the rest of the crate only ever sees the current [`Record`] shape.

use chrono::{DateTime, Utc};
use quiz_state_types::{META_KEY, Record, RecordMap, timestamp};
use serde_json::{Map, Value, json};

pub const SCHEMA_VERSION: u64 = 2;

const LEGACY_RENAMES: &[(&str, &str)] = &[
    ("vk_profile", "profile_link"),
    ("vk_verified", "profile_verified"),
];

#[derive(Debug, Default)]
pub struct Decoded {
    pub records: RecordMap,
    /// The document was older than [`SCHEMA_VERSION`] or some record needed repair
    pub upgraded: bool,
    /// Entries that could not be decoded even after upgrade
    pub dropped: usize,
}

pub fn decode_document(doc: Value, now: DateTime<Utc>) -> Result<Decoded, String> {
    let Value::Object(entries) = doc else {
        return Err("state document is not a JSON object".to_string());
    };

    let version = entries
        .get(META_KEY)
        .and_then(|meta| meta.get("schema_version"))
        .and_then(Value::as_u64)
        .unwrap_or(1);

    let mut decoded = Decoded {
        upgraded: version < SCHEMA_VERSION,
        ..Decoded::default()
    };

    for (id, value) in entries {
        if id == META_KEY {
            continue;
        }
        let Value::Object(mut fields) = value else {
            log::error!("[STATE] Dropping record {}: not a JSON object", id);
            decoded.dropped += 1;
            continue;
        };
        if upgrade_record(&mut fields, now) {
            decoded.upgraded = true;
        }
        match serde_json::from_value::<Record>(Value::Object(fields)) {
            Ok(record) => {
                decoded.records.insert(id, record);
            }
            Err(e) => {
                log::error!("[STATE] Dropping undecodable record {}: {}", id, e);
                decoded.dropped += 1;
            }
        }
    }

    if decoded.dropped > 0 {
        decoded.upgraded = true;
    }
    Ok(decoded)
}

pub fn encode_document(records: &RecordMap) -> Result<String, serde_json::Error> {
    let mut doc = Map::new();
    doc.insert(META_KEY.to_string(), json!({ "schema_version": SCHEMA_VERSION }));
    for (id, record) in records {
        doc.insert(id.clone(), serde_json::to_value(record)?);
    }
    let mut text = serde_json::to_string_pretty(&Value::Object(doc))?;
    text.push('\n');
    Ok(text)
}

/// Bring one raw record up to the current shape. Returns true if anything changed.
fn upgrade_record(fields: &mut Map<String, Value>, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    for (legacy, current) in LEGACY_RENAMES {
        if let Some(value) = fields.remove(*legacy) {
            if !fields.contains_key(*current) {
                fields.insert(current.to_string(), value);
            }
            changed = true;
        }
    }

    for key in ["created_at", "updated_at"] {
        let valid = fields
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|raw| timestamp::parse(raw).is_some());
        if !valid {
            fields.insert(key.to_string(), Value::String(timestamp::format(&now)));
            changed = true;
        }
    }

    if !fields.get("stand_status").is_some_and(Value::is_object) {
        fields.insert("stand_status".to_string(), Value::Object(Map::new()));
        changed = true;
    }

    if let Some(Value::Object(pending)) = fields.get_mut("pending_question") {
        if let Some(answers) = pending.remove("answers") {
            if !pending.contains_key("accepted_answers") {
                pending.insert("accepted_answers".to_string(), answers);
            }
            changed = true;
        }
    }

    changed
}
