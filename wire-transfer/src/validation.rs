//! Schema validation for inbound requests and collaborator responses.
//!
//! Transfer requests are checked field by field and every violation is
//! reported, in the flattened `{formErrors, fieldErrors}` shape callers
//! already consume. Collaborator responses are all-or-nothing: a body
//! either matches its schema or it is a contract violation.

use crate::types::{
    Currency, HoldOutcome, HoldRelease, MAX_AMOUNT_CENTS, Money, TransferId, TransferRequest,
    WireInitiationAck,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

const MAX_ID_LEN: usize = 64;
const ACCOUNT_DIGITS: std::ops::RangeInclusive<usize> = 10..=20;
const MAX_NAME_LEN: usize = 100;
const MAX_NOTE_LEN: usize = 255;

/// Every problem found in a transfer request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("invalid transfer request ({} form errors, {} fields)", .form_errors.len(), .field_errors.len())]
pub struct ValidationErrors {
    /// Problems with the payload as a whole
    pub form_errors: Vec<String>,
    /// Problems per field, keyed by wire name
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    fn form(&mut self, message: impl Into<String>) {
        self.form_errors.push(message.into());
    }

    fn field(&mut self, name: &str, message: impl Into<String>) {
        self.field_errors
            .entry(name.to_string())
            .or_default()
            .push(message.into());
    }

    /// Whether no problem was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.form_errors.is_empty() && self.field_errors.is_empty()
    }

    /// Messages recorded for `name`.
    #[must_use]
    pub fn for_field(&self, name: &str) -> &[String] {
        self.field_errors.get(name).map_or(&[], Vec::as_slice)
    }
}

/// A collaborator response that does not match its schema.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// Not JSON, or JSON of the wrong shape
    #[error("malformed body: {0}")]
    Json(#[from] serde_json::Error),
    /// Right shape, invalid content
    #[error("invalid body: {0}")]
    Invalid(&'static str),
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Present, non-null value of `name`.
fn present<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).filter(|value| !value.is_null())
}

fn required_str<'a>(
    object: &'a Map<String, Value>,
    name: &str,
    errors: &mut ValidationErrors,
) -> Option<&'a str> {
    match present(object, name) {
        None => {
            errors.field(name, "Required");
            None
        },
        Some(Value::String(value)) => Some(value),
        Some(other) => {
            errors.field(name, format!("Expected string, received {}", type_name(other)));
            None
        },
    }
}

fn bounded_text(
    object: &Map<String, Value>,
    name: &str,
    max_len: usize,
    errors: &mut ValidationErrors,
) -> Option<String> {
    let value = required_str(object, name, errors)?;
    let len = value.chars().count();
    if len == 0 {
        errors.field(name, "String must contain at least 1 character(s)");
        return None;
    }
    if len > max_len {
        errors.field(name, format!("String must contain at most {max_len} character(s)"));
        return None;
    }
    Some(value.to_string())
}

fn account_number(
    object: &Map<String, Value>,
    name: &str,
    errors: &mut ValidationErrors,
) -> Option<String> {
    let value = required_str(object, name, errors)?;
    if !ACCOUNT_DIGITS.contains(&value.len()) || !value.bytes().all(|b| b.is_ascii_digit()) {
        errors.field(
            name,
            format!(
                "Account number must be {}-{} digits",
                ACCOUNT_DIGITS.start(),
                ACCOUNT_DIGITS.end()
            ),
        );
        return None;
    }
    Some(value.to_string())
}

/// Whether `id` is an acceptable transfer identifier.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn transfer_id(
    object: &Map<String, Value>,
    fallback_id: impl FnOnce() -> TransferId,
    errors: &mut ValidationErrors,
) -> Option<TransferId> {
    match present(object, "id") {
        None => Some(fallback_id()),
        Some(Value::String(id)) if is_valid_id(id) => Some(TransferId::new(id.as_str())),
        Some(Value::String(_)) => {
            errors.field(
                "id",
                format!("Id must be 1-{MAX_ID_LEN} characters of letters, digits, '-' or '_'"),
            );
            None
        },
        Some(other) => {
            errors.field("id", format!("Expected string, received {}", type_name(other)));
            None
        },
    }
}

fn amount(object: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<Money> {
    let value = match present(object, "amount") {
        None => {
            errors.field("amount", "Required");
            return None;
        },
        Some(Value::Number(number)) => number.as_f64(),
        Some(other) => {
            errors.field("amount", format!("Expected number, received {}", type_name(other)));
            return None;
        },
    };

    let Some(value) = value.filter(|v| *v > 0.0) else {
        errors.field("amount", "Number must be greater than 0");
        return None;
    };

    match Money::from_major(value) {
        None => {
            errors.field("amount", "Amount must have at most 2 decimal places");
            None
        },
        Some(money) if money.cents() > MAX_AMOUNT_CENTS => {
            errors.field("amount", "Number must be less than or equal to 1000000");
            None
        },
        Some(money) if money.cents() == 0 => {
            errors.field("amount", "Number must be greater than 0");
            None
        },
        Some(money) => Some(money),
    }
}

fn currency(object: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<Currency> {
    let code = required_str(object, "currency", errors)?;
    let parsed = Currency::parse(code);
    if parsed.is_none() {
        errors.field(
            "currency",
            format!("Invalid enum value. Expected 'USD' | 'EUR' | 'GBP', received '{code}'"),
        );
    }
    parsed
}

fn note(object: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<Option<String>> {
    match present(object, "note") {
        None => Some(None),
        Some(Value::String(note)) if note.chars().count() <= MAX_NOTE_LEN => Some(Some(note.clone())),
        Some(Value::String(_)) => {
            errors.field("note", format!("String must contain at most {MAX_NOTE_LEN} character(s)"));
            None
        },
        Some(other) => {
            errors.field("note", format!("Expected string, received {}", type_name(other)));
            None
        },
    }
}

/// Validate an inbound transfer request.
///
/// `fallback_id` is called only when the payload carries no `id`.
///
/// # Errors
///
/// Returns every violation found when the payload is not a valid request.
pub fn parse_transfer_request(
    payload: &Value,
    fallback_id: impl FnOnce() -> TransferId,
) -> Result<TransferRequest, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let Value::Object(object) = payload else {
        errors.form(format!("Expected object, received {}", type_name(payload)));
        return Err(errors);
    };

    let id = transfer_id(object, fallback_id, &mut errors);
    let amount = amount(object, &mut errors);
    let currency = currency(object, &mut errors);
    let sender_account = account_number(object, "senderAccount", &mut errors);
    let receiver_account = account_number(object, "receiverAccount", &mut errors);
    let receiver_name = bounded_text(object, "receiverName", MAX_NAME_LEN, &mut errors);
    let receiver_bank = bounded_text(object, "receiverBank", MAX_NAME_LEN, &mut errors);
    let note = note(object, &mut errors);

    match (
        id,
        amount,
        currency,
        sender_account,
        receiver_account,
        receiver_name,
        receiver_bank,
        note,
    ) {
        (
            Some(id),
            Some(amount),
            Some(currency),
            Some(sender_account),
            Some(receiver_account),
            Some(receiver_name),
            Some(receiver_bank),
            Some(note),
        ) if errors.is_empty() => Ok(TransferRequest {
            id,
            amount,
            currency,
            sender_account,
            receiver_account,
            receiver_name,
            receiver_bank,
            note,
        }),
        _ => Err(errors),
    }
}

/// Parse a bank acknowledgment body.
///
/// # Errors
///
/// Returns [`ShapeError`] when the body is not a `SUCCESS` ack with a message.
pub fn parse_wire_ack(body: &str) -> Result<WireInitiationAck, ShapeError> {
    let ack: WireInitiationAck = serde_json::from_str(body)?;
    if ack.message.is_empty() {
        return Err(ShapeError::Invalid("message must not be empty"));
    }
    Ok(ack)
}

/// Parse a ledger hold response body.
///
/// # Errors
///
/// Returns [`ShapeError`] when the body matches none of the three outcomes.
pub fn parse_hold_response(body: &str) -> Result<HoldOutcome, ShapeError> {
    Ok(serde_json::from_str(body)?)
}

/// Parse a ledger release response body.
///
/// # Errors
///
/// Returns [`ShapeError`] when the body is malformed or a required field is empty.
pub fn parse_release_response(body: &str) -> Result<HoldRelease, ShapeError> {
    let release: HoldRelease = serde_json::from_str(body)?;
    if release.transaction_id.is_empty() {
        return Err(ShapeError::Invalid("transactionId must not be empty"));
    }
    if release.message.is_empty() {
        return Err(ShapeError::Invalid("message must not be empty"));
    }
    Ok(release)
}
