//! Call event types handed to publishers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::matcher::CallerId;

/// Known customer as stored in the dispatch database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub email: String,
}

/// One of the customer's recent rides
///
/// Ride entries are written by several app versions, so every field is read
/// leniently and falls back to an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideSummary {
    #[serde(default, deserialize_with = "lenient_text")]
    pub pickup: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub destination: String,
    /// Unix timestamp in milliseconds
    #[serde(default, deserialize_with = "lenient_millis")]
    pub timestamp: i64,
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f as i64)
            .unwrap_or_default(),
        _ => 0,
    })
}

/// Whether the caller is already a customer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classification {
    #[default]
    New,
    Existing {
        customer: CustomerProfile,
        #[serde(rename = "lastRides", default)]
        last_rides: Vec<RideSummary>,
    },
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Existing { .. } => "existing",
        }
    }

    pub fn customer(&self) -> Option<&CustomerProfile> {
        match self {
            Classification::New => None,
            Classification::Existing { customer, .. } => Some(customer),
        }
    }
}

/// One accepted incoming call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub caller: CallerId,
    /// The monitored line's own number
    pub called: String,
    pub timestamp: DateTime<Utc>,
    pub classification: Classification,
}

impl CallEvent {
    pub fn new(
        caller: CallerId,
        called: impl Into<String>,
        timestamp: DateTime<Utc>,
        classification: Classification,
    ) -> Self {
        Self {
            caller,
            called: called.into(),
            timestamp,
            classification,
        }
    }

    pub fn is_existing_customer(&self) -> bool {
        matches!(self.classification, Classification::Existing { .. })
    }
}
