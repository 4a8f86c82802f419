//! OCR candidate → registered line code
//!
//! First match wins: candidates are scanned in the order the OCR backend yields
//! them and the first one whose digits name a registered line with enough
//! confidence is returned. There is no best-of search across candidates.

use crate::domain::line::{LineRecord, LineRegistry};
use crate::domain::types::OcrCandidate;

/// Candidates must be strictly above this confidence
pub const MIN_OCR_CONFIDENCE: f32 = 0.4;

pub fn match_line<'a>(
    candidates: &[OcrCandidate],
    registry: &'a LineRegistry,
) -> Option<&'a LineRecord> {
    candidates
        .iter()
        .filter(|c| c.confidence > MIN_OCR_CONFIDENCE)
        .find_map(|c| registry.get(&c.digits_only))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LineRegistry {
        LineRegistry::from_records(vec![
            LineRecord::new("12", "Linha 12", 5.0, 2.5),
            LineRecord::new("437", "TI Caxangá (Conde da Boa Vista)", 5.0, 2.5),
        ])
        .unwrap()
    }

    #[test]
    fn test_low_confidence_candidate_is_skipped() {
        let registry = registry();
        let candidates = vec![OcrCandidate::new("bus12", 0.3), OcrCandidate::new("12", 0.5)];

        let line = match_line(&candidates, &registry).unwrap();
        assert_eq!(line.code, "12");
    }

    #[test]
    fn test_first_match_wins_over_higher_confidence() {
        let registry = registry();
        let candidates = vec![OcrCandidate::new("437", 0.45), OcrCandidate::new("12", 0.99)];

        assert_eq!(match_line(&candidates, &registry).unwrap().code, "437");
    }

    #[test]
    fn test_confidence_bound_is_strict() {
        let registry = registry();
        let candidates = vec![OcrCandidate::new("12", MIN_OCR_CONFIDENCE)];
        assert!(match_line(&candidates, &registry).is_none());
    }

    #[test]
    fn test_digits_extracted_from_noisy_text() {
        let registry = registry();
        let candidates = vec![OcrCandidate::new("BRT 4-3-7 Caxangá", 0.8)];
        assert_eq!(match_line(&candidates, &registry).unwrap().code, "437");
    }

    #[test]
    fn test_no_candidates_or_unknown_codes() {
        let registry = registry();
        assert!(match_line(&[], &registry).is_none());

        let candidates = vec![OcrCandidate::new("999", 0.9), OcrCandidate::new("BRT", 0.9)];
        assert!(match_line(&candidates, &registry).is_none());
    }
}
