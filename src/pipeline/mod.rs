//! Pipeline stages for listing-photo extraction.
//!
//! Each submodule implements exactly one step; [`crate::extract`] strings
//! them together into the two-pass protocol.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ encode ──▶ recognition ──▶ parse ──▶ validate
//! (path/URL/b64) (enhance)  (base64)   (VLM pass 1)    (JSON)    (critical)
//!                                          │                          │
//!                                          └── recognition pass 2 ◀───┘
//!                                                   │
//!                                             parse ──▶ merge
//! ```
//!
//! 1. [`input`]       — load raw bytes from a path, URL or base64 string
//! 2. [`normalize`]   — contrast/sharpness/denoise/upscale; never fails
//! 3. [`encode`]      — wrap JPEG bytes as base64 `ImageData`
//! 4. [`recognition`] — the Recognition Client seam and its VLM adapter; the
//!    only stage with network I/O
//! 5. [`parse`]       — tolerant JSON extraction from free-form model text
//! 6. [`validate`]    — which critical fields are still blank
//! 7. [`merge`]       — fold recovered values into the pass-1 record

pub mod encode;
pub mod input;
pub mod merge;
pub mod normalize;
pub mod parse;
pub mod recognition;
pub mod validate;
