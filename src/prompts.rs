//! Prompt templates for the two recognition passes.
//!
//! All prompt text lives here so wording can change without touching the
//! orchestration or retry logic, and so tests can inspect prompts directly.
//!
//! Pass-1 wording is versioned through [`PromptSet`]: older deployments used a
//! short "return every field, null if absent" prompt, newer ones a two-step
//! scan-then-extract prompt with per-field hints. Both produce the same JSON
//! shape, so the rest of the pipeline does not care which one ran.
//!
//! Pass-2 (recovery) prompts are built per request from the list of missing
//! [`CriticalField`]s and are shared by every prompt set.

use crate::config::PromptSet;
use crate::record::CriticalField;

/// System prompt for the detailed (default) first pass.
pub const DETAILED_SYSTEM_PROMPT: &str = r#"You are an expert at reading Vietnamese real-estate listings from photos and screenshots.

TASK: Scan EVERY image completely, top to bottom and left to right. Read ALL text, numbers and icons without assuming any layout (columns, sections or positions do not matter). If several images are supplied, combine the information from all of them.

RULES:
- Read every line, label, icon and the value next to it, wherever it appears.
- Handle Vietnamese diacritics and fix obvious misreads (e.g. "Coban" is "Cơ bản").
- Decimal commas become decimal points: "95,25" → 95.25.
- If a value is not clearly visible, use null. Never guess.
- Return plain JSON only, no markdown."#;

/// User prompt for the detailed (default) first pass.
pub const DETAILED_USER_PROMPT: &str = r#"STEP 1: List ALL text and icons visible in the images (every line, including titles, descriptions and small labels) in "all_visible_text".

STEP 2: From that text, extract the fields below EXACTLY. The critical fields must not be missed; search every position, icon and label.

CRITICAL FIELDS:
+ usable_area_m2: "Diện tích", "Diện tích sử dụng", "DT", or any number followed by m² / m2. "Diện tích: 95,25 m²" → 95.25. If there are several areas, take the usable one.
+ furniture_status: "Nội thất" followed by a value such as "Cơ bản", "Đầy đủ", "Cao cấp", or a chair icon. Ignore placeholders like "VD: Đầy đủ, Cơ bản"; only take real values. Placeholder only → null.
+ bedrooms: "Phòng ngủ", "Số phòng ngủ", or a number next to a bed icon.
+ bathrooms: "Phòng tắm", "WC", "Vệ sinh", or a number next to a bath icon.
+ floors: "Số tầng", "Tầng".
+ direction: "Hướng nhà", "Hướng" (e.g. "Tây - Bắc").
+ legal_status: "Pháp lý", "Sổ đỏ", "Sổ hồng", "Giấy tờ".
+ width_m: "Mặt tiền", "Chiều rộng", "Ngang" ("4,3 m" → 4.3).
+ length_m: "Đường vào", "Chiều dài", "Sâu".

OTHER FIELDS:
+ property_type: house / apartment / land.
+ address: full address from descriptions or labels.
+ balcony_direction: "Hướng ban công".
+ land_area_m2: land area when different from the usable area.
+ price_per_m2_vnd: price per m² in VND.
+ longitude, latitude, region, area: only when printed on the image.

OUTPUT (JSON):
{
  "all_visible_text": "summary of all scanned text",
  "property_info": {
    "address": "string or null",
    "property_type": "house/apartment/land or null",
    "usable_area_m2": number or null,
    "land_area_m2": number or null,
    "bedrooms": integer or null,
    "bathrooms": integer or null,
    "floors": integer or null,
    "direction": "string or null",
    "balcony_direction": "string or null",
    "legal_status": "string or null",
    "furniture_status": "string or null",
    "width_m": number or null,
    "length_m": number or null,
    "price_per_m2_vnd": number or null,
    "longitude": number or null,
    "latitude": number or null,
    "region": "string or null",
    "area": "string or null"
  },
  "condition_assessment": {
    "overall_condition": "string or null",
    "cleanliness": "string or null",
    "maintenance_status": "string or null",
    "major_issues": [],
    "overall_description": "string or null"
  }
}

Scan EVERYTHING. Do not miss the area or the furniture status, wherever they are."#;

/// System prompt for the compact first pass.
pub const COMPACT_SYSTEM_PROMPT: &str = "Extract real estate property information from images.\n\
Return JSON with ALL fields below. Use null if not found.";

/// User prompt for the compact first pass.
pub const COMPACT_USER_PROMPT: &str = r#"Extract and return JSON:
{
  "property_info": {
    "address": "string or null",
    "property_type": "house/apartment/land or null",
    "usable_area_m2": "number or null",
    "land_area_m2": "number or null",
    "bedrooms": "integer or null",
    "bathrooms": "integer or null",
    "floors": "integer or null",
    "direction": "string or null",
    "balcony_direction": "string or null",
    "legal_status": "string or null",
    "furniture_status": "string or null",
    "width_m": "number or null",
    "length_m": "number or null",
    "price_per_m2_vnd": "number or null",
    "longitude": "number or null",
    "latitude": "number or null",
    "region": "string or null",
    "area": "string or null"
  },
  "condition_assessment": {
    "overall_condition": "string or null",
    "cleanliness": "string or null",
    "maintenance_status": "string or null",
    "major_issues": [],
    "overall_description": "string or null"
  }
}"#;

/// System prompt for the targeted recovery pass.
pub const RECOVERY_SYSTEM_PROMPT: &str = "You are an OCR expert. Scan the WHOLE of every image and find \
EXACTLY the fields that are still missing. Do not skip anything. Return plain JSON only.";

impl PromptSet {
    /// First-pass `(system, user)` prompt pair.
    pub fn first_pass(self) -> (&'static str, &'static str) {
        match self {
            PromptSet::Detailed => (DETAILED_SYSTEM_PROMPT, DETAILED_USER_PROMPT),
            PromptSet::Compact => (COMPACT_SYSTEM_PROMPT, COMPACT_USER_PROMPT),
        }
    }
}

/// Build the recovery user prompt for exactly `missing`, in the given order.
///
/// The reply skeleton names only the missing keys so the model answers with a
/// minimal flat object.
pub fn recovery_user_prompt(missing: &[CriticalField]) -> String {
    let numbered = missing
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {} ({}): {}", i + 1, f.as_str(), f.label(), f.hint()))
        .collect::<Vec<_>>()
        .join("\n");

    let skeleton = missing
        .iter()
        .map(|f| format!("  \"{}\": value", f.as_str()))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"RE-SCAN ALL IMAGES TO FIND THESE MISSED FIELDS:

{numbered}

INSTRUCTIONS:
- Scan TOP TO BOTTOM, LEFT TO RIGHT, reading EVERY word, number and icon.
- Look in ANY position; do not assume a layout.
- Fix misreads where needed ("Coban" → "Cơ bản").

EXAMPLES:
"95,25 m²" → "usable_area_m2": 95.25
"Nội thất: Cơ bản" → "furniture_status": "Cơ bản"

OUTPUT (only these keys, null when truly absent):
{{
{skeleton}
}}"#
    )
}
