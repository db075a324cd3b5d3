//! Image assets and their encoding for the VLM request body.
//!
//! An [`ImageAsset`] is the normalized, immutable payload that is sent with
//! every pass. The bytes sit behind an `Arc` so pass 2 can re-send the same
//! images without copying megabytes of JPEG.
//!
//! VLM APIs take images as base64 data embedded in the JSON body. `detail:
//! "high"` makes GPT-4-class models tile the image at full resolution; without
//! it the small print on listing screenshots (areas, room counts) is lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Container format of an [`ImageAsset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Jpeg,
    Png,
    Webp,
}

impl AssetFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            AssetFormat::Jpeg => "image/jpeg",
            AssetFormat::Png => "image/png",
            AssetFormat::Webp => "image/webp",
        }
    }

    /// Identify the container from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Jpeg => Some(AssetFormat::Jpeg),
            ImageFormat::Png => Some(AssetFormat::Png),
            ImageFormat::WebP => Some(AssetFormat::Webp),
            _ => None,
        }
    }
}

/// An immutable image ready to be sent to the Recognition Client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Arc<[u8]>,
    format: AssetFormat,
}

impl ImageAsset {
    pub fn new(bytes: impl Into<Arc<[u8]>>, format: AssetFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    /// Wrap bytes, sniffing the format. Unknown containers are labelled JPEG,
    /// which is what the normalizer produces and what providers expect.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let format = AssetFormat::sniff(&bytes).unwrap_or(AssetFormat::Jpeg);
        Self::new(bytes, format)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> AssetFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode an asset as base64 `ImageData` for a multimodal chat message.
pub fn to_image_data(asset: &ImageAsset) -> ImageData {
    let b64 = STANDARD.encode(asset.bytes());
    debug!("Encoded {} image → {} bytes base64", asset.format().mime_type(), b64.len());
    ImageData::new(b64, asset.format().mime_type()).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode");
        buf
    }

    #[test]
    fn sniff_detects_png() {
        assert_eq!(AssetFormat::sniff(&png()), Some(AssetFormat::Png));
        assert_eq!(AssetFormat::sniff(b"hello"), None);
    }

    #[test]
    fn unknown_bytes_default_to_jpeg() {
        let asset = ImageAsset::from_bytes(b"opaque".to_vec());
        assert_eq!(asset.format(), AssetFormat::Jpeg);
        assert_eq!(asset.len(), 6);
    }

    #[test]
    fn image_data_round_trips_bytes() {
        let bytes = png();
        let data = to_image_data(&ImageAsset::from_bytes(bytes.clone()));
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).expect("valid base64"), bytes);
    }

    #[test]
    fn clones_share_storage() {
        let a = ImageAsset::from_bytes(png());
        let b = a.clone();
        assert!(std::ptr::eq(a.bytes().as_ptr(), b.bytes().as_ptr()));
    }
}
