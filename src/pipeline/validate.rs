//! Field validation: which critical fields pass 1 failed to fill.

use crate::record::{CriticalField, PropertyRecord};

/// Critical fields whose value is null, empty, or zero, in
/// [`CriticalField::ALL`] order.
pub fn missing_fields(record: &PropertyRecord) -> Vec<CriticalField> {
    CriticalField::ALL
        .into_iter()
        .filter(|f| record.property_info.value(*f).is_blank())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PropertyInfo;

    fn complete() -> PropertyRecord {
        PropertyRecord {
            property_info: PropertyInfo {
                usable_area_m2: Some(95.25),
                bedrooms: Some(3),
                bathrooms: Some(2),
                floors: Some(4),
                direction: Some("Tây - Bắc".into()),
                legal_status: Some("Sổ hồng".into()),
                furniture_status: Some("Đầy đủ".into()),
                width_m: Some(5.0),
                length_m: Some(19.05),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn complete_record_has_nothing_missing() {
        assert!(missing_fields(&complete()).is_empty());
    }

    #[test]
    fn empty_record_misses_everything_in_order() {
        assert_eq!(missing_fields(&PropertyRecord::default()), CriticalField::ALL.to_vec());
    }

    #[test]
    fn empty_furniture_status_is_missing() {
        let mut r = complete();
        r.property_info.furniture_status = Some(String::new());
        assert_eq!(missing_fields(&r), vec![CriticalField::FurnitureStatus]);
    }

    #[test]
    fn zero_counts_as_missing() {
        let mut r = complete();
        r.property_info.floors = Some(0);
        r.property_info.width_m = Some(0.0);
        assert_eq!(
            missing_fields(&r),
            vec![CriticalField::Floors, CriticalField::WidthM]
        );
    }

    #[test]
    fn non_critical_fields_are_ignored() {
        let mut r = complete();
        r.property_info.address = None;
        r.property_info.latitude = Some(0.0);
        assert!(missing_fields(&r).is_empty());
    }

    #[test]
    fn result_is_ordered_subset_and_deterministic() {
        let mut r = complete();
        r.property_info.length_m = None;
        r.property_info.bedrooms = None;
        let first = missing_fields(&r);
        assert_eq!(first, vec![CriticalField::Bedrooms, CriticalField::LengthM]);
        assert_eq!(first, missing_fields(&r));
        assert!(first.iter().all(|f| CriticalField::ALL.contains(f)));
    }
}
