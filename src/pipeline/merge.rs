//! Merge policy for the recovery pass.
//!
//! Pass 2 answers with a flat object keyed by the requested field names.
//! Only those keys are read; a value is applied when it is non-null,
//! non-empty and coercible to the field's type. Nothing is ever removed
//! from the pass-1 record.

use crate::record::{CriticalField, PropertyRecord};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Apply a pass-2 reply to `record`, returning the fields that were filled.
///
/// A reply shaped like a full record (`{"property_info": {...}}`) is
/// unwrapped first. Keys outside `requested` are ignored.
pub fn merge_recovered(
    record: &mut PropertyRecord,
    reply: &Map<String, Value>,
    requested: &[CriticalField],
) -> Vec<CriticalField> {
    let values = match reply.get("property_info") {
        Some(Value::Object(inner)) => inner,
        _ => reply,
    };

    let mut recovered = Vec::new();
    for &field in requested {
        let Some(raw) = values.get(field.as_str()) else {
            continue;
        };
        if record.property_info.set_from_json(field, raw) {
            info!("Recovered {} = {}", field, raw);
            recovered.push(field);
        } else {
            debug!("Ignoring unusable value for {}: {}", field, raw);
        }
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PropertyInfo;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn pass1() -> PropertyRecord {
        PropertyRecord {
            property_info: PropertyInfo {
                address: Some("12 Nguyễn Trãi, Quận 1".into()),
                usable_area_m2: Some(95.25),
                bedrooms: Some(3),
                furniture_status: Some(String::new()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn fills_requested_field() {
        let mut r = pass1();
        let got = merge_recovered(
            &mut r,
            &obj(json!({"furniture_status": "Cơ bản"})),
            &[CriticalField::FurnitureStatus],
        );
        assert_eq!(got, vec![CriticalField::FurnitureStatus]);
        assert_eq!(r.property_info.furniture_status.as_deref(), Some("Cơ bản"));
    }

    #[test]
    fn null_and_empty_values_change_nothing() {
        let mut r = pass1();
        let before = r.clone();
        let got = merge_recovered(
            &mut r,
            &obj(json!({"furniture_status": "", "floors": null})),
            &[CriticalField::FurnitureStatus, CriticalField::Floors],
        );
        assert!(got.is_empty());
        assert_eq!(r, before);
    }

    #[test]
    fn unrequested_keys_are_ignored() {
        let mut r = pass1();
        let got = merge_recovered(
            &mut r,
            &obj(json!({"bedrooms": 7, "address": "elsewhere", "floors": 2})),
            &[CriticalField::Floors],
        );
        assert_eq!(got, vec![CriticalField::Floors]);
        assert_eq!(r.property_info.bedrooms, Some(3));
        assert_eq!(r.property_info.address.as_deref(), Some("12 Nguyễn Trãi, Quận 1"));
        assert_eq!(r.property_info.floors, Some(2));
    }

    #[test]
    fn envelope_is_unwrapped() {
        let mut r = pass1();
        let got = merge_recovered(
            &mut r,
            &obj(json!({"property_info": {"width_m": "5,5 m"}})),
            &[CriticalField::WidthM],
        );
        assert_eq!(got, vec![CriticalField::WidthM]);
        assert_eq!(r.property_info.width_m, Some(5.5));
    }

    #[test]
    fn uncoercible_value_is_skipped() {
        let mut r = pass1();
        let got = merge_recovered(
            &mut r,
            &obj(json!({"bathrooms": "không rõ"})),
            &[CriticalField::Bathrooms],
        );
        assert!(got.is_empty());
        assert_eq!(r.property_info.bathrooms, None);
    }

    #[test]
    fn recovered_follows_request_order() {
        let mut r = PropertyRecord::default();
        let got = merge_recovered(
            &mut r,
            &obj(json!({"length_m": 20, "bedrooms": 2})),
            &[CriticalField::Bedrooms, CriticalField::LengthM],
        );
        assert_eq!(got, vec![CriticalField::Bedrooms, CriticalField::LengthM]);
    }
}
