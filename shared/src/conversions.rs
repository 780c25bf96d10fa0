//! DynamoDB stream record conversions
//!
//! Stream images arrive in DynamoDB's typed attribute format. The search
//! index wants plain JSON documents, so images are converted attribute by
//! attribute: numbers become JSON numbers, sets become arrays and binary
//! values become base64 strings.

use aws_lambda_events::event::dynamodb::EventRecord;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_dynamo::{AttributeValue, Item};
use serde_json::{Map, Number, Value};

use crate::errors::{Error, Result};
use crate::models::IndexAction;

/// Primary key attribute of the asset table
pub const INVENTORY_ID_ATTRIBUTE: &str = "InventoryID";

/// Low sequence number digits kept below the second in a version
const SEQUENCE_DIGITS: usize = 9;

/// Convert a DynamoDB number string to a JSON number
fn number_to_json(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(u) = n.parse::<u64>() {
        return Value::Number(u.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_string()))
}

/// Convert one typed attribute to plain JSON
pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::B(bytes) => Value::String(STANDARD.encode(bytes)),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), attribute_to_json(v)))
                .collect(),
        ),
        AttributeValue::L(list) => Value::Array(list.iter().map(attribute_to_json).collect()),
        AttributeValue::Ss(set) => Value::Array(set.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(set) => Value::Array(set.iter().map(|n| number_to_json(n)).collect()),
        AttributeValue::Bs(set) => Value::Array(
            set.iter()
                .map(|b| Value::String(STANDARD.encode(b)))
                .collect(),
        ),
    }
}

/// Convert a stream image to a JSON document
pub fn image_to_document(image: &Item) -> Value {
    let map: Map<String, Value> = image
        .iter()
        .map(|(k, v)| (k.clone(), attribute_to_json(v)))
        .collect();
    Value::Object(map)
}

fn string_attribute<'a>(image: &'a Item, name: &str) -> Option<&'a str> {
    match image.get(name) {
        Some(AttributeValue::S(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

/// Inventory ID of a stream record, from its keys or either image
pub fn inventory_id(record: &EventRecord) -> Option<String> {
    let change = &record.change;
    string_attribute(&change.keys, INVENTORY_ID_ATTRIBUTE)
        .or_else(|| string_attribute(&change.new_image, INVENTORY_ID_ATTRIBUTE))
        .or_else(|| string_attribute(&change.old_image, INVENTORY_ID_ATTRIBUTE))
        .map(|s| s.to_string())
}

/// External version of a stream record
///
/// `ApproximateCreationDateTime` only has second precision. The low digits
/// of the shard sequence number order changes made within the same second,
/// so a later change always carries a higher version.
pub fn record_version(record: &EventRecord) -> i64 {
    let seconds = record.change.approximate_creation_date_time.timestamp();
    let sequence = record
        .change
        .sequence_number
        .as_deref()
        .map(str::trim)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits[digits.len().saturating_sub(SEQUENCE_DIGITS)..].parse::<i64>().ok())
        .unwrap_or(0);

    seconds * 10i64.pow(SEQUENCE_DIGITS as u32) + sequence
}

/// Convert a stream record to an index action
///
/// Returns `Ok(None)` for records that carry nothing to index (unknown event
/// names or records without an inventory ID).
pub fn record_to_action(record: &EventRecord, excluded_fields: &[String]) -> Result<Option<IndexAction>> {
    let Some(inventory_id) = inventory_id(record) else {
        return Ok(None);
    };
    let version = record_version(record);

    match record.event_name.as_str() {
        "INSERT" | "MODIFY" => {
            if record.change.new_image.is_empty() {
                return Err(Error::Validation(format!(
                    "{} record for {} has no new image; the stream must use NEW_IMAGE or NEW_AND_OLD_IMAGES",
                    record.event_name, inventory_id
                )));
            }
            let mut document = image_to_document(&record.change.new_image);
            if let Some(object) = document.as_object_mut() {
                for field in excluded_fields {
                    object.remove(field);
                }
            }
            Ok(Some(IndexAction::upsert(inventory_id, version, document)))
        }
        "REMOVE" => Ok(Some(IndexAction::delete(inventory_id, version))),
        _ => Ok(None),
    }
}
