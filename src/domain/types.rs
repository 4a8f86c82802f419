//! Transient vision types shared by the localizer, extractor, recognizer and matcher

use serde::{Deserialize, Serialize};

/// Axis-aligned box in source image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// True when the box has no area (`x1 >= x2` or `y1 >= y2`, or NaN coordinates)
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        !(self.x1 < self.x2 && self.y1 < self.y2)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(b: [f32; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

/// A raw detection as reported by an object detection backend, before filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
}

/// A localized vehicle candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// One text span read by the OCR backend
#[derive(Debug, Clone, PartialEq)]
pub struct OcrCandidate {
    pub raw_text: String,
    pub digits_only: String,
    pub confidence: f32,
}

impl OcrCandidate {
    /// Build a candidate, deriving the digit-only form of the text
    pub fn new(raw_text: &str, confidence: f32) -> Self {
        Self {
            raw_text: raw_text.to_string(),
            digits_only: digits_only(raw_text),
            confidence,
        }
    }
}

/// Strip every non-digit character
pub fn digits_only(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Line identified from an image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifiedLine {
    pub line_code: String,
    pub line_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only("bus12"), "12");
        assert_eq!(digits_only(" 2 441-A "), "2441");
        assert_eq!(digits_only("BRT"), "");
    }

    #[test]
    fn test_degenerate_boxes() {
        assert!(BoundingBox::new(10.0, 0.0, 10.0, 5.0).is_degenerate());
        assert!(BoundingBox::new(0.0, 5.0, 10.0, 2.0).is_degenerate());
        assert!(BoundingBox::new(f32::NAN, 0.0, 10.0, 5.0).is_degenerate());
        assert!(!BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_degenerate());
    }
}
