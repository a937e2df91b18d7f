//! Two-level outline extracted from a generated plan.
//!
//! Level-1 headings (`# `) become sections in document order. A section
//! either holds its lines directly ([`OutlineSection::Flat`]) or, once a
//! level-2 heading (`## `) appears inside it, groups lines under those
//! subheadings ([`OutlineSection::Nested`]).

mod parser;
mod strip;

use indexmap::IndexMap;
use serde::Serialize;

pub use parser::parse_outline;
pub use strip::strip_decoration;

/// Content under one level-1 heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutlineSection {
    Flat(Vec<String>),
    Nested(IndexMap<String, Vec<String>>),
}

impl OutlineSection {
    /// Fold a later section with the same heading into this one.
    ///
    /// Same kinds are concatenated; a different kind replaces the earlier one.
    fn absorb(&mut self, later: OutlineSection) {
        match (self, later) {
            (Self::Flat(lines), Self::Flat(more)) => lines.extend(more),
            (Self::Nested(groups), Self::Nested(more)) => {
                for (heading, lines) in more {
                    groups.entry(heading).or_default().extend(lines);
                }
            }
            (this, later) => *this = later,
        }
    }
}

/// Ordered mapping from level-1 heading to its section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Outline {
    sections: IndexMap<String, OutlineSection>,
}

impl Outline {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn get(&self, heading: &str) -> Option<&OutlineSection> {
        self.sections.get(heading)
    }

    /// Sections in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutlineSection)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Add a section, merging into an existing one with the same heading.
    pub fn insert(&mut self, heading: String, section: OutlineSection) {
        match self.sections.get_mut(&heading) {
            Some(existing) => existing.absorb(section),
            None => {
                self.sections.insert(heading, section);
            }
        }
    }
}

impl FromIterator<(String, OutlineSection)> for Outline {
    fn from_iter<I: IntoIterator<Item = (String, OutlineSection)>>(iter: I) -> Self {
        let mut outline = Outline::default();
        for (heading, section) in iter {
            outline.insert(heading, section);
        }
        outline
    }
}
