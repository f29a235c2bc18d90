//! Record shapes written to the realtime database
//!
//! Field names follow what the taxi app's popup listener reads.

use serde::{Deserialize, Serialize};

use crate::monitor::{CallEvent, Classification, CustomerProfile, RideSummary};

/// Record stored at `callPopup`, overwritten on every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPopupRecord {
    /// "new" or "existing"
    #[serde(rename = "type")]
    pub kind: String,
    pub caller: String,
    pub called: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerProfile>,
    #[serde(rename = "lastRides", default, skip_serializing_if = "Option::is_none")]
    pub last_rides: Option<Vec<RideSummary>>,
}

impl From<&CallEvent> for CallPopupRecord {
    fn from(event: &CallEvent) -> Self {
        let (customer, last_rides) = match &event.classification {
            Classification::New => (None, None),
            Classification::Existing {
                customer,
                last_rides,
            } => (Some(customer.clone()), Some(last_rides.clone())),
        };

        Self {
            kind: event.classification.as_str().to_string(),
            caller: event.caller.to_string(),
            called: event.called.clone(),
            timestamp: event.timestamp.timestamp_millis(),
            customer,
            last_rides,
        }
    }
}

/// Record appended under `callHistory`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallHistoryRecord {
    #[serde(flatten)]
    pub popup: CallPopupRecord,
    #[serde(rename = "customerFound")]
    pub customer_found: bool,
    #[serde(rename = "customerId")]
    pub customer_id: Option<String>,
}

impl From<&CallEvent> for CallHistoryRecord {
    fn from(event: &CallEvent) -> Self {
        Self {
            popup: CallPopupRecord::from(event),
            customer_found: event.is_existing_customer(),
            customer_id: event.classification.customer().map(|c| c.id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::CallerId;
    use chrono::{TimeZone, Utc};

    fn event(classification: Classification) -> CallEvent {
        CallEvent::new(
            CallerId::normalize("+491234567890").unwrap(),
            "+4915127585179",
            Utc.timestamp_millis_opt(1_738_765_815_000).unwrap(),
            classification,
        )
    }

    #[test]
    fn test_popup_for_new_caller() {
        let record = CallPopupRecord::from(&event(Classification::New));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "new");
        assert_eq!(json["caller"], "+491234567890");
        assert_eq!(json["called"], "+4915127585179");
        assert_eq!(json["timestamp"], 1_738_765_815_000i64);
        assert!(json.get("customer").is_none());
        assert!(json.get("lastRides").is_none());
    }

    #[test]
    fn test_history_for_existing_customer() {
        let classification = Classification::Existing {
            customer: CustomerProfile {
                id: "-Nabc".to_string(),
                name: "Anna".to_string(),
                address: "Seestr. 1".to_string(),
                email: "anna@example.org".to_string(),
            },
            last_rides: vec![RideSummary {
                pickup: "Bahnhof".to_string(),
                destination: "Seebrücke".to_string(),
                timestamp: 1_738_000_000_000,
            }],
        };
        let record = CallHistoryRecord::from(&event(classification));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "existing");
        assert_eq!(json["customer"]["name"], "Anna");
        assert_eq!(json["lastRides"][0]["pickup"], "Bahnhof");
        assert_eq!(json["customerFound"], true);
        assert_eq!(json["customerId"], "-Nabc");
    }

    #[test]
    fn test_history_for_new_caller_has_null_customer_id() {
        let record = CallHistoryRecord::from(&event(Classification::New));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["customerFound"], false);
        assert!(json["customerId"].is_null());
    }
}
