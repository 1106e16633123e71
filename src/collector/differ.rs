//! Device status change detection
//!
//! A stored status is only rewritten when one of the monitored fields moved.
//! Inputs that cannot be read as a JSON object count as a change.

use serde_json::{Map, Value};

/// Status fields whose change warrants a write
pub const MONITORED_FIELDS: [&str; 5] = [
    "ssid",
    "mac_address",
    "usb_powered",
    "ota_status",
    "ota_error_code",
];

/// A device status as handed to the differ
#[derive(Debug, Clone, Copy)]
pub enum StatusInput<'a> {
    /// Already-parsed JSON
    Structured(&'a Value),
    /// Serialized JSON text, as stored in the database
    Serialized(&'a str),
}

impl<'a> From<&'a Value> for StatusInput<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Structured(value)
    }
}

impl<'a> From<&'a str> for StatusInput<'a> {
    fn from(raw: &'a str) -> Self {
        Self::Serialized(raw)
    }
}

impl<'a> From<&'a String> for StatusInput<'a> {
    fn from(raw: &'a String) -> Self {
        Self::Serialized(raw.as_str())
    }
}

/// A device status normalized to an attribute map
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus(Map<String, Value>);

impl DeviceStatus {
    /// Normalize either input form; `None` if it is not a JSON object
    pub fn parse(input: StatusInput<'_>) -> Option<Self> {
        let value = match input {
            StatusInput::Structured(value) => value.clone(),
            StatusInput::Serialized(raw) => serde_json::from_str(raw).ok()?,
        };

        match value {
            Value::Object(map) => Some(Self(map)),
            // Some firmware double-encodes the status as a JSON string
            Value::String(inner) => match serde_json::from_str(&inner).ok()? {
                Value::Object(map) => Some(Self(map)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// Compare two status snapshots on the monitored fields
///
/// Returns `true` if any monitored field differs, or if either input fails
/// to parse.
pub fn has_significant_change<'a, 'b>(
    old: impl Into<StatusInput<'a>>,
    new: impl Into<StatusInput<'b>>,
) -> bool {
    let (Some(old), Some(new)) = (
        DeviceStatus::parse(old.into()),
        DeviceStatus::parse(new.into()),
    ) else {
        tracing::debug!("Unparseable device status, treating as changed");
        return true;
    };

    MONITORED_FIELDS
        .iter()
        .any(|field| old.field(field) != new.field(field))
}
