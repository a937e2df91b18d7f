use indexmap::IndexMap;

use super::strip::strip_decoration;
use super::{Outline, OutlineSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line<'a> {
    Section(&'a str),
    Subsection(&'a str),
    Content(&'a str),
    Blank,
}

/// `#` repeated exactly `level` times followed by at least one whitespace.
fn heading(line: &str, level: usize) -> Option<&str> {
    let rest = line.strip_prefix("#".repeat(level).as_str())?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

fn classify(line: &str) -> Line<'_> {
    if let Some(rest) = heading(line, 1) {
        Line::Section(rest)
    } else if let Some(rest) = heading(line, 2) {
        Line::Subsection(rest)
    } else if line.trim().is_empty() {
        Line::Blank
    } else {
        Line::Content(line)
    }
}

/// Section under construction.
#[derive(Debug, Default)]
struct OpenSection {
    heading: String,
    lines: Vec<String>,
    groups: IndexMap<String, Vec<String>>,
    subheading: Option<String>,
}

impl OpenSection {
    fn new(heading: String) -> Self {
        Self {
            heading,
            ..Self::default()
        }
    }

    fn push(&mut self, line: String) {
        match &self.subheading {
            Some(sub) => self.groups.entry(sub.clone()).or_default().push(line),
            None => self.lines.push(line),
        }
    }

    fn open_group(&mut self, subheading: String) {
        self.groups.entry(subheading.clone()).or_default();
        self.subheading = Some(subheading);
    }

    /// Lines seen before the first subheading are dropped once the section
    /// turns out to be nested.
    fn close(self) -> (String, OutlineSection) {
        let section = if self.groups.is_empty() {
            OutlineSection::Flat(self.lines)
        } else {
            OutlineSection::Nested(self.groups)
        };
        (self.heading, section)
    }
}

/// Parse a completed plan into a two-level [`Outline`].
///
/// Never fails: text without any `# ` heading yields an empty outline.
/// Labels and lines are passed through [`strip_decoration`]; lines that
/// strip down to nothing are skipped.
pub fn parse_outline(plan: &str) -> Outline {
    let mut outline = Outline::default();
    let mut open: Option<OpenSection> = None;

    for line in plan.lines() {
        match classify(line) {
            Line::Section(label) => {
                if let Some(done) = open.take() {
                    let (heading, section) = done.close();
                    outline.insert(heading, section);
                }
                open = Some(OpenSection::new(strip_decoration(label)));
            }
            Line::Subsection(label) => {
                if let Some(section) = open.as_mut() {
                    section.open_group(strip_decoration(label));
                }
            }
            Line::Content(text) => {
                if let Some(section) = open.as_mut() {
                    let cleaned = strip_decoration(text);
                    if !cleaned.is_empty() {
                        section.push(cleaned);
                    }
                }
            }
            Line::Blank => {}
        }
    }

    if let Some(done) = open {
        let (heading, section) = done.close();
        outline.insert(heading, section);
    }

    outline
}
