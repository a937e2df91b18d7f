//! Markdown-safe re-segmentation of streamed text.
//!
//! Generative sources hand out fragments at arbitrary byte positions, often
//! in the middle of a heading marker or list bullet. [`Resegmenter`] buffers
//! them and only releases pieces that end right before a markdown structural
//! boundary, so a client rendering the stream never sees a half-written
//! `##` or bullet.
//!
//! A boundary is the zero-width position *before*:
//! - a newline,
//! - a `#` that starts a line (heading marker),
//! - whitespace followed by `-` and whitespace (dash bullet).
//!
//! Asterisk bullets and numbered items always follow a newline, which is
//! already a boundary. Position 0 is never a boundary, so every piece is
//! non-empty and keeps its own leading marker. Pieces are byte-exact slices
//! of the input: concatenating everything emitted by [`Resegmenter::push`]
//! and [`Resegmenter::finish`] reproduces the input.

/// Streaming splitter holding the not-yet-complete tail of the text.
#[derive(Debug, Default, Clone)]
pub struct Resegmenter {
    buffer: String,
}

impl Resegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every piece that is now complete.
    ///
    /// The trailing piece stays buffered unless it ends in a newline.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(fragment);

        let cuts = boundaries(&self.buffer);
        let mut pieces = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts {
            pieces.push(self.buffer[start..cut].to_owned());
            start = cut;
        }

        if self.buffer[start..].ends_with('\n') {
            pieces.push(self.buffer[start..].to_owned());
            self.buffer.clear();
        } else {
            self.buffer.replace_range(..start, "");
        }
        pieces
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// End of stream: release whatever is left, complete or not.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}

/// Byte offsets of every boundary in `text`, excluding 0 and `text.len()`.
///
/// Only characters inside `text` are consulted, so a position whose rule
/// needs characters past the end is not a boundary yet.
pub fn boundaries(text: &str) -> Vec<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut cuts = Vec::new();

    for i in 1..chars.len() {
        let (offset, c) = chars[i];
        let prev = chars[i - 1].1;

        let is_cut = match c {
            '\n' => true,
            '#' => prev == '\n',
            c if c.is_whitespace() => matches!(
                (chars.get(i + 1), chars.get(i + 2)),
                (Some((_, '-')), Some((_, after))) if after.is_whitespace()
            ),
            _ => false,
        };

        if is_cut {
            cuts.push(offset);
        }
    }

    cuts
}

/// Re-segment a complete text in one pass.
pub fn resegment_all(text: &str) -> Vec<String> {
    let mut seg = Resegmenter::new();
    let mut pieces = seg.push(text);
    pieces.extend(seg.finish());
    pieces
}
