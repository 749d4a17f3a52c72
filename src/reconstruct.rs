//! Plain-text layout recovered from a word table.

use crate::types::WordBox;

/// Rebuilds readable text from a table already sorted by block, paragraph,
/// line and word.
///
/// A new block or paragraph flushes the current line and inserts one blank
/// line; a new line within the same paragraph only flushes. Structural rows
/// (negative confidence) and blank words are skipped.
pub fn reconstruct_text(frame: &[WordBox]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut previous: Option<(u32, u32, u32)> = None;

    for word in frame {
        let text = word.text.trim();
        if word.confidence < 0.0 || text.is_empty() {
            continue;
        }

        let position = (word.block_num, word.par_num, word.line_num);
        if let Some((block, par, line)) = previous {
            if position.0 != block || position.1 != par {
                if !current.is_empty() {
                    lines.push(current.join(" "));
                    current.clear();
                }
                lines.push(String::new());
            } else if position.2 != line && !current.is_empty() {
                lines.push(current.join(" "));
                current.clear();
            }
        }

        current.push(text);
        previous = Some(position);
    }

    if !current.is_empty() {
        lines.push(current.join(" "));
    }

    lines.join("\n")
}
