//! The structured extraction result and its critical-field vocabulary.
//!
//! A [`PropertyRecord`] is what the Response Parser produces from model output
//! and what the caller finally receives. Every attribute is optional and an
//! absent attribute serialises as an explicit `null`, never by omission, so
//! downstream consumers can tell "looked for, not found" apart from "not part
//! of the schema".
//!
//! ## Lenient values
//!
//! Vision models do not reliably respect the requested JSON types. Listing
//! photos in Vietnamese write decimals with a comma (`95,25 m²`), counts come
//! back as strings (`"3"`), and lists come back as `null`. Rather than reject
//! the whole record, each field coerces what it receives:
//!
//! | Kind | Accepts | Example |
//! |------|---------|---------|
//! | decimal | number, numeric string with `,`/`.` separators and units | `"95,25 m²"` → `95.25` |
//! | count | non-negative integral number or string | `"3 phòng"` → `3` |
//! | text | string (trimmed) or number | `4` → `"4"` |
//!
//! Anything that cannot be coerced becomes `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Full structured result of an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Free-text transcript the detailed prompt asks the model to produce
    /// before extracting fields. Diagnostic only.
    #[serde(default, deserialize_with = "lenient::text")]
    pub all_visible_text: Option<String>,

    #[serde(default, deserialize_with = "lenient::group")]
    pub property_info: PropertyInfo,

    #[serde(default, deserialize_with = "lenient::group")]
    pub condition_assessment: ConditionAssessment,
}

/// Measurable and legal attributes of the property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    #[serde(default, deserialize_with = "lenient::text")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub property_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub usable_area_m2: Option<f64>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub land_area_m2: Option<f64>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub bedrooms: Option<u32>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub bathrooms: Option<u32>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub floors: Option<u32>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub direction: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub balcony_direction: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub legal_status: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub furniture_status: Option<String>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub width_m: Option<f64>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub length_m: Option<f64>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub price_per_m2_vnd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub area: Option<String>,
}

/// Visual condition of the property as judged from the photos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionAssessment {
    #[serde(default, deserialize_with = "lenient::text")]
    pub overall_condition: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub cleanliness: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub maintenance_status: Option<String>,
    /// The one field without a null marker: an empty list means no issues
    /// were found, and a `null` reply is read as `[]`.
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub major_issues: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub overall_description: Option<String>,
}

// ── Critical fields ──────────────────────────────────────────────────────

/// The `property_info` attributes whose absence triggers a recovery pass.
///
/// Declaration order is significant: [`CriticalField::ALL`] drives validation
/// order, recovery prompt order, and therefore test determinism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalField {
    UsableAreaM2,
    Bedrooms,
    Bathrooms,
    Floors,
    Direction,
    LegalStatus,
    FurnitureStatus,
    WidthM,
    LengthM,
}

/// How a field's raw JSON value is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Decimal,
    Count,
    Text,
}

impl CriticalField {
    /// Every critical field, in validation order.
    pub const ALL: [CriticalField; 9] = [
        CriticalField::UsableAreaM2,
        CriticalField::Bedrooms,
        CriticalField::Bathrooms,
        CriticalField::Floors,
        CriticalField::Direction,
        CriticalField::LegalStatus,
        CriticalField::FurnitureStatus,
        CriticalField::WidthM,
        CriticalField::LengthM,
    ];

    /// JSON key inside `property_info`.
    pub fn as_str(self) -> &'static str {
        match self {
            CriticalField::UsableAreaM2 => "usable_area_m2",
            CriticalField::Bedrooms => "bedrooms",
            CriticalField::Bathrooms => "bathrooms",
            CriticalField::Floors => "floors",
            CriticalField::Direction => "direction",
            CriticalField::LegalStatus => "legal_status",
            CriticalField::FurnitureStatus => "furniture_status",
            CriticalField::WidthM => "width_m",
            CriticalField::LengthM => "length_m",
        }
    }

    /// Label as printed on Vietnamese listings.
    pub fn label(self) -> &'static str {
        match self {
            CriticalField::UsableAreaM2 => "Diện tích sử dụng",
            CriticalField::Bedrooms => "Số phòng ngủ",
            CriticalField::Bathrooms => "Số phòng tắm",
            CriticalField::Floors => "Số tầng",
            CriticalField::Direction => "Hướng nhà",
            CriticalField::LegalStatus => "Pháp lý",
            CriticalField::FurnitureStatus => "Nội thất",
            CriticalField::WidthM => "Mặt tiền",
            CriticalField::LengthM => "Đường vào",
        }
    }

    /// Where to look for the value; used by the recovery prompt.
    pub fn hint(self) -> &'static str {
        match self {
            CriticalField::UsableAreaM2 => {
                "\"Diện tích\", \"Diện tích sử dụng\", \"DT\", or any number followed by m² / m2, anywhere on the image"
            }
            CriticalField::Bedrooms => "\"Phòng ngủ\", \"Số phòng ngủ\", or a number next to a bed icon",
            CriticalField::Bathrooms => "\"Phòng tắm\", \"Vệ sinh\", \"WC\", or a number next to a bath icon",
            CriticalField::Floors => "\"Số tầng\", \"Tầng\", or a number next to a building icon",
            CriticalField::Direction => "\"Hướng nhà\", \"Hướng\", \"Hướng chính\" (e.g. \"Tây - Bắc\")",
            CriticalField::LegalStatus => "\"Pháp lý\", \"Giấy tờ\", \"Sổ đỏ\", \"Sổ hồng\", \"Sổ\"",
            CriticalField::FurnitureStatus => {
                "\"Nội thất\", \"Tình trạng nội thất\", a chair icon, values like \"Cơ bản\" / \"Đầy đủ\" / \"Cao cấp\" (fix misreads such as \"Coban\" → \"Cơ bản\"; ignore placeholders like \"VD: Đầy đủ\")"
            }
            CriticalField::WidthM => "\"Mặt tiền\", \"Chiều rộng\", \"Ngang\", or a number followed by m",
            CriticalField::LengthM => "\"Đường vào\", \"Chiều dài\", \"Sâu\", or a number followed by m",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            CriticalField::UsableAreaM2 | CriticalField::WidthM | CriticalField::LengthM => {
                FieldKind::Decimal
            }
            CriticalField::Bedrooms | CriticalField::Bathrooms | CriticalField::Floors => {
                FieldKind::Count
            }
            CriticalField::Direction
            | CriticalField::LegalStatus
            | CriticalField::FurnitureStatus => FieldKind::Text,
        }
    }
}

impl fmt::Display for CriticalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of one critical field's current value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Null,
    Decimal(f64),
    Count(u32),
    Text(&'a str),
}

impl FieldValue<'_> {
    /// `null`, `""` and numeric zero all count as "not found".
    ///
    /// Zero is never a valid measurement or room count on a listing, and the
    /// retry trigger depends on treating it exactly like a missing value.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Decimal(n) => *n == 0.0,
            FieldValue::Count(n) => *n == 0,
            FieldValue::Text(s) => s.is_empty(),
        }
    }
}

impl PropertyInfo {
    /// Read a critical field.
    pub fn value(&self, field: CriticalField) -> FieldValue<'_> {
        fn dec(v: Option<f64>) -> FieldValue<'static> {
            v.map_or(FieldValue::Null, FieldValue::Decimal)
        }
        fn cnt(v: Option<u32>) -> FieldValue<'static> {
            v.map_or(FieldValue::Null, FieldValue::Count)
        }
        fn txt(v: &Option<String>) -> FieldValue<'_> {
            v.as_deref().map_or(FieldValue::Null, FieldValue::Text)
        }

        match field {
            CriticalField::UsableAreaM2 => dec(self.usable_area_m2),
            CriticalField::Bedrooms => cnt(self.bedrooms),
            CriticalField::Bathrooms => cnt(self.bathrooms),
            CriticalField::Floors => cnt(self.floors),
            CriticalField::Direction => txt(&self.direction),
            CriticalField::LegalStatus => txt(&self.legal_status),
            CriticalField::FurnitureStatus => txt(&self.furniture_status),
            CriticalField::WidthM => dec(self.width_m),
            CriticalField::LengthM => dec(self.length_m),
        }
    }

    /// Overwrite a critical field from a raw JSON value.
    ///
    /// Returns `false` and leaves the field untouched when the value is
    /// `null`, an empty string, or cannot be coerced to the field's kind.
    pub fn set_from_json(&mut self, field: CriticalField, raw: &Value) -> bool {
        match field.kind() {
            FieldKind::Decimal => {
                let Some(v) = lenient::decimal_from_value(raw) else {
                    return false;
                };
                let slot = match field {
                    CriticalField::UsableAreaM2 => &mut self.usable_area_m2,
                    CriticalField::WidthM => &mut self.width_m,
                    _ => &mut self.length_m,
                };
                *slot = Some(v);
            }
            FieldKind::Count => {
                let Some(v) = lenient::count_from_value(raw) else {
                    return false;
                };
                let slot = match field {
                    CriticalField::Bedrooms => &mut self.bedrooms,
                    CriticalField::Bathrooms => &mut self.bathrooms,
                    _ => &mut self.floors,
                };
                *slot = Some(v);
            }
            FieldKind::Text => {
                let v = match lenient::text_from_value(raw) {
                    Some(v) if !v.is_empty() => v,
                    _ => return false,
                };
                let slot = match field {
                    CriticalField::Direction => &mut self.direction,
                    CriticalField::LegalStatus => &mut self.legal_status,
                    _ => &mut self.furniture_status,
                };
                *slot = Some(v);
            }
        }
        true
    }
}

// ── Lenient coercion ─────────────────────────────────────────────────────

pub(crate) mod lenient {
    use super::*;

    static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d[\d.,]*").unwrap());

    /// Coerce a JSON value into a finite decimal.
    ///
    /// Separator rules for numeric strings: when both `.` and `,` occur the
    /// last one is the decimal mark; a single separator kind repeated is a
    /// thousands mark (`12.500.000`); a lone separator is a decimal mark.
    pub fn decimal_from_value(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
            Value::String(s) => parse_decimal(s),
            _ => None,
        }
    }

    fn parse_decimal(s: &str) -> Option<f64> {
        let token = RE_NUMBER.find(s)?.as_str().trim_end_matches(['.', ',']);
        let dots = token.matches('.').count();
        let commas = token.matches(',').count();

        let normalised = match (dots, commas) {
            (0, 0) => token.to_string(),
            (_, 0) if dots > 1 => token.replace('.', ""),
            (0, _) if commas > 1 => token.replace(',', ""),
            (_, 0) => token.to_string(),
            (0, _) => token.replace(',', "."),
            _ => {
                let last_dot = token.rfind('.').unwrap_or(0);
                let last_comma = token.rfind(',').unwrap_or(0);
                if last_comma > last_dot {
                    token.replace('.', "").replace(',', ".")
                } else {
                    token.replace(',', "")
                }
            }
        };
        normalised.parse::<f64>().ok().filter(|x| x.is_finite())
    }

    /// Coerce a JSON value into a non-negative whole count.
    pub fn count_from_value(v: &Value) -> Option<u32> {
        let x = match v {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    return u32::try_from(u).ok();
                }
                n.as_f64()?
            }
            Value::String(s) => parse_decimal(s)?,
            _ => return None,
        };
        if x >= 0.0 && x.fract() == 0.0 && x <= u32::MAX as f64 {
            Some(x as u32)
        } else {
            None
        }
    }

    /// Coerce a JSON value into trimmed text.
    pub fn text_from_value(v: &Value) -> Option<String> {
        match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(decimal_from_value(&Value::deserialize(d)?))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        Ok(count_from_value(&Value::deserialize(d)?))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(text_from_value(&Value::deserialize(d)?))
    }

    pub fn text_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .iter()
                .filter_map(text_from_value)
                .filter(|s| !s.is_empty())
                .collect(),
            Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        })
    }

    /// A nested group that may be `null` in the model output.
    pub fn group<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
    }
}
