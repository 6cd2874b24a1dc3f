//! Boundary checks for writes.
//!
//! Runs before any state changes: a rejected write never touches the mirror
//! and never reaches the network.

use sheetmirror_api::{Collection, CollectionSchema, Fields, Record, Result, SyncError, Value};

/// Clean and check the fields of a new record
pub(crate) fn prepare_create(
    collection: Collection,
    fields: Fields,
    existing: &[Record],
) -> Result<Fields> {
    let schema = writable_schema(collection)?;
    let fields = normalize(schema, fields)?;

    for field in schema.required_fields() {
        if fields.get(field.name).map_or(true, Value::is_blank) {
            return Err(SyncError::validation(format!("{} is required", field.name)));
        }
    }

    check_unique_name(schema, &Record::from_fields(fields.clone()), None, existing)?;
    Ok(fields)
}

/// Clean and check a patch against the record it will be merged into
pub(crate) fn prepare_update(
    collection: Collection,
    fields: Fields,
    current: &Record,
    existing: &[Record],
) -> Result<Fields> {
    let schema = writable_schema(collection)?;
    if fields.is_empty() {
        return Err(SyncError::validation("Nothing to update"));
    }
    let fields = normalize(schema, fields)?;

    for field in schema.required_fields() {
        if fields.get(field.name).is_some_and(Value::is_blank) {
            return Err(SyncError::validation(format!(
                "{} cannot be empty",
                field.name
            )));
        }
    }

    let mut merged = current.clone();
    merged.merge(&fields);
    let own_id = current.id(schema.id_field);
    check_unique_name(schema, &merged, own_id.as_deref(), existing)?;
    Ok(fields)
}

pub(crate) fn writable_schema(collection: Collection) -> Result<&'static CollectionSchema> {
    let schema = collection.schema();
    if !schema.writable {
        return Err(SyncError::validation(format!(
            "{} is read-only",
            collection
        )));
    }
    Ok(schema)
}

/// Reject unknown columns, trim text and apply upper-casing
fn normalize(schema: &CollectionSchema, fields: Fields) -> Result<Fields> {
    fields
        .into_iter()
        .map(|(name, value)| {
            if name == schema.id_field {
                return Err(SyncError::validation(format!(
                    "{} is assigned by the store and cannot be written",
                    name
                )));
            }
            if schema.field(&name).is_none() {
                return Err(SyncError::validation(format!(
                    "Unknown field '{}' for {}",
                    name, schema.key
                )));
            }
            let value = match value {
                Value::String(s) if schema.is_uppercase(&name) => {
                    Value::String(s.trim().to_uppercase())
                }
                Value::String(s) => Value::String(s.trim().to_string()),
                Value::Null => Value::String(String::new()),
                other => other,
            };
            Ok((name, value))
        })
        .collect()
}

fn check_unique_name(
    schema: &CollectionSchema,
    candidate: &Record,
    own_id: Option<&str>,
    existing: &[Record],
) -> Result<()> {
    let Some(rule) = schema.unique_name else {
        return Ok(());
    };
    let name = match candidate.get(rule.field) {
        Some(value) if !value.is_blank() => value.as_key().to_lowercase(),
        _ => return Ok(()),
    };
    let scope = rule.scope.map(|scope| candidate.get_string(scope).unwrap_or_default());

    let clash = existing.iter().any(|other| {
        if own_id.is_some() && other.id(schema.id_field).as_deref() == own_id {
            return false;
        }
        if let (Some(scope_field), Some(scope_value)) = (rule.scope, scope.as_deref()) {
            if other.get_string(scope_field).unwrap_or_default() != scope_value {
                return false;
            }
        }
        other
            .get(rule.field)
            .is_some_and(|value| value.as_key().to_lowercase() == name)
    });

    if clash {
        let message = match rule.scope {
            Some(scope) => format!(
                "{} '{}' already exists for this {}",
                rule.field,
                candidate.get_string(rule.field).unwrap_or_default(),
                scope
            ),
            None => format!(
                "{} '{}' already exists",
                rule.field,
                candidate.get_string(rule.field).unwrap_or_default()
            ),
        };
        return Err(SyncError::validation(message));
    }
    Ok(())
}
