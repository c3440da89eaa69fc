//! Payloads accepted by the write operations.
//!
//! Fields are optional at the type level so that a missing field becomes a
//! validation error naming it, not a decode failure.

use std::collections::BTreeMap;

use agenda_core::BookingExtras;
use serde::Deserialize;
use serde_json::Value;

use crate::mirror::table::BASE_COLUMNS;

/// A scalar JSON value supplied for a text field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl FieldValue {
    /// Trimmed text, `None` when blank.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let text = match self {
            Self::Text(s) => s.trim().to_owned(),
            Self::Number(n) => n.to_string(),
            Self::Flag(b) => b.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    /// The value as given, for opaque labels; `None` when blank.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Text(s) if s.trim().is_empty() => None,
            Self::Text(s) => Some(s.clone()),
            other => other.text(),
        }
    }
}

/// `POST /agendar/{tenant}` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingRequest {
    #[serde(default)]
    pub name: Option<FieldValue>,
    #[serde(default)]
    pub email: Option<FieldValue>,
    #[serde(default)]
    pub phone: Option<FieldValue>,
    #[serde(default)]
    pub date: Option<FieldValue>,
    #[serde(default)]
    pub time: Option<FieldValue>,
    /// Any other field, kept as an extra column.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The five required booking fields, present and non-blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredBookingFields {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub date: String,
    pub time: String,
}

impl BookingRequest {
    /// Split into the required fields and the extras.
    ///
    /// # Errors
    ///
    /// Returns a message naming every missing field, or the first extra
    /// field that cannot be stored.
    pub fn into_parts(self) -> Result<(RequiredBookingFields, BookingExtras), String> {
        let fields = [
            ("name", &self.name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("date", &self.date),
            ("time", &self.time),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.as_ref().and_then(FieldValue::text).is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required fields: {}", missing.join(", ")));
        }

        let text = |value: Option<FieldValue>| value.and_then(|v| v.text()).unwrap_or_default();
        let required = RequiredBookingFields {
            name: text(self.name),
            email: text(self.email),
            phone: text(self.phone),
            date: text(self.date),
            time: self.time.and_then(|v| v.label()).unwrap_or_default(),
        };

        Ok((required, extras(self.extra)?))
    }
}

fn extras(raw: BTreeMap<String, Value>) -> Result<BookingExtras, String> {
    let mut extras = BookingExtras::new();
    for (key, value) in raw {
        let key = key.trim().to_owned();
        if key.is_empty() {
            return Err("field names must not be blank".to_string());
        }
        if BASE_COLUMNS.contains(&key.as_str()) {
            return Err(format!("field '{key}' is reserved"));
        }
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.trim().to_owned(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(format!("field '{key}' must be a string, number or boolean"));
            }
        };
        extras.insert(key, text);
    }
    Ok(extras)
}

/// `POST /agendamentos/{tenant}/reagendar/{id}` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RescheduleRequest {
    #[serde(default, rename = "newDate", alias = "new_date")]
    pub new_date: Option<FieldValue>,
    #[serde(default, rename = "newTime", alias = "new_time")]
    pub new_time: Option<FieldValue>,
}

impl RescheduleRequest {
    /// The target date and time, both present and non-blank.
    ///
    /// # Errors
    ///
    /// Returns a message naming every missing field.
    pub fn into_parts(self) -> Result<(String, String), String> {
        match (
            self.new_date.as_ref().and_then(FieldValue::text),
            self.new_time.as_ref().and_then(FieldValue::label),
        ) {
            (Some(date), Some(time)) => Ok((date, time)),
            (date, time) => {
                let missing: Vec<&str> = [("newDate", date.is_none()), ("newTime", time.is_none())]
                    .into_iter()
                    .filter_map(|(name, absent)| absent.then_some(name))
                    .collect();
                Err(format!("missing required fields: {}", missing.join(", ")))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn booking(json: Value) -> BookingRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_complete_booking_splits_required_and_extra() {
        let (required, extra) = booking(serde_json::json!({
            "name": " Ana ", "email": "ANA@X.com", "phone": 123,
            "date": "2024-05-01", "time": "09:00",
            "service": "cut", "returning": true, "notes": null
        }))
        .into_parts()
        .unwrap();

        assert_eq!(required.name, "Ana");
        assert_eq!(required.phone, "123");
        assert_eq!(extra.get("service").map(String::as_str), Some("cut"));
        assert_eq!(extra.get("returning").map(String::as_str), Some("true"));
        assert!(!extra.contains_key("notes"));
    }

    #[test]
    fn test_slot_label_is_kept_verbatim() {
        let (required, _) = booking(serde_json::json!({
            "name": "Ana", "email": "a@x.com", "phone": "1",
            "date": "2024-05-01", "time": " 09:00 "
        }))
        .into_parts()
        .unwrap();
        assert_eq!(required.time, " 09:00 ");

        let request: RescheduleRequest =
            serde_json::from_value(serde_json::json!({"newDate": "2024-05-02", "newTime": "Tarde "}))
                .unwrap();
        assert_eq!(request.into_parts().unwrap().1, "Tarde ");

        let request: RescheduleRequest =
            serde_json::from_value(serde_json::json!({"newDate": "2024-05-02", "newTime": "  "}))
                .unwrap();
        assert_eq!(
            request.into_parts().unwrap_err(),
            "missing required fields: newTime"
        );
    }

    #[test]
    fn test_missing_fields_are_all_named() {
        let err = booking(serde_json::json!({"name": "Ana", "email": "  ", "date": "2024-05-01"}))
            .into_parts()
            .unwrap_err();
        assert_eq!(err, "missing required fields: email, phone, time");
    }

    #[test]
    fn test_nested_extra_is_rejected() {
        let err = booking(serde_json::json!({
            "name": "Ana", "email": "a@x.com", "phone": "1", "date": "2024-05-01", "time": "9",
            "tags": ["a"]
        }))
        .into_parts()
        .unwrap_err();
        assert!(err.contains("tags"));
    }

    #[test]
    fn test_reserved_extra_is_rejected() {
        let err = booking(serde_json::json!({
            "name": "Ana", "email": "a@x.com", "phone": "1", "date": "2024-05-01", "time": "9",
            "status": "confirmed"
        }))
        .into_parts()
        .unwrap_err();
        assert_eq!(err, "field 'status' is reserved");
    }

    #[test]
    fn test_reschedule_fields() {
        let request: RescheduleRequest =
            serde_json::from_value(serde_json::json!({"newDate": "2024-05-02", "newTime": "10:00"}))
                .unwrap();
        assert_eq!(
            request.into_parts().unwrap(),
            ("2024-05-02".to_owned(), "10:00".to_owned())
        );

        let request: RescheduleRequest =
            serde_json::from_value(serde_json::json!({"newTime": "10:00"})).unwrap();
        assert_eq!(
            request.into_parts().unwrap_err(),
            "missing required fields: newDate"
        );
    }
}
