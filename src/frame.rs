//! Numeric helpers over a recognizer word table.

use crate::types::WordBox;

/// Mean of the non-negative confidences, `0.0` when there are none.
pub fn average_confidence(frame: &[WordBox]) -> f64 {
    let (sum, count) = frame
        .iter()
        .filter(|word| word.confidence.is_finite() && word.has_confidence())
        .fold((0.0, 0usize), |(sum, count), word| (sum + word.confidence, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Rows whose confidence reaches `threshold`, in table order.
pub fn filter_by_confidence(frame: &[WordBox], threshold: f64) -> Vec<WordBox> {
    frame
        .iter()
        .filter(|word| word.confidence >= threshold)
        .cloned()
        .collect()
}

/// `(left, top, height)` if all three are usable numbers.
pub fn extract_coordinates(word: &WordBox) -> Option<(f64, f64, f64)> {
    let (x, y, h) = (word.left, word.top, word.height);
    if x.is_finite() && y.is_finite() && h.is_finite() {
        Some((x, y, h))
    } else {
        None
    }
}

/// Divides every box coordinate by `scale`, mapping an upscaled image back to
/// the original pixel grid.
pub fn rescale(frame: &mut [WordBox], scale: f64) {
    if scale == 1.0 || scale <= 0.0 {
        return;
    }
    for word in frame.iter_mut() {
        word.left /= scale;
        word.top /= scale;
        word.width /= scale;
        word.height /= scale;
    }
}
