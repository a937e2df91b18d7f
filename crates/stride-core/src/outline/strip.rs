//! Removal of inline markdown decoration from outline labels and lines.

use std::sync::LazyLock;

use regex::Regex;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("decoration pattern is valid"),
        replacement,
    }
}

/// Applied in order. Images go before links so `![alt](url)` disappears
/// entirely instead of leaving `!alt` behind.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"^#+\s*", ""),
        rule(r"\*\*(.*?)\*\*", "$1"),
        rule(r"\*(.*?)\*", "$1"),
        rule(r"~~(.*?)~~", "$1"),
        rule(r"!\[.*?\]\(.*?\)", ""),
        rule(r"\[(.*?)\]\(.*?\)", "$1"),
        rule(r"`{1,3}(.*?)`{1,3}", "$1"),
        rule(r"(?m)^\s*>+\s?", ""),
        rule(r"(?m)^-+\s?", ""),
    ]
});

fn strip_once(text: &str) -> String {
    let mut out = text.to_owned();
    for rule in RULES.iter() {
        if rule.pattern.is_match(&out) {
            out = rule
                .pattern
                .replace_all(&out, rule.replacement)
                .into_owned();
        }
    }
    out.trim().to_owned()
}

/// Strip heading markers, emphasis, strikethrough, links, images, code
/// ticks, blockquote markers and leading list dashes.
///
/// Every rule removes at least one character when it matches, so repeating
/// the pass until nothing changes terminates, and the result is a fixpoint:
/// `strip_decoration(strip_decoration(x)) == strip_decoration(x)`.
pub fn strip_decoration(text: &str) -> String {
    let mut current = strip_once(text);
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_heading_markers() {
        assert_eq!(strip_decoration("## Week 1: Basics"), "Week 1: Basics");
        assert_eq!(strip_decoration("#### deep"), "deep");
    }

    #[test]
    fn strips_emphasis_and_strikethrough() {
        assert_eq!(
            strip_decoration("Learn **ownership** and *borrowing*, not ~~GC~~"),
            "Learn ownership and borrowing, not GC"
        );
    }

    #[test]
    fn keeps_link_text_and_drops_images() {
        assert_eq!(
            strip_decoration("Read [the book](https://doc.rust-lang.org/book/)"),
            "Read the book"
        );
        assert_eq!(
            strip_decoration("Logo ![ferris](https://rustacean.net/ferris.png) here"),
            "Logo  here"
        );
    }

    #[test]
    fn strips_code_ticks() {
        assert_eq!(strip_decoration("Run `cargo new hello`"), "Run cargo new hello");
        assert_eq!(strip_decoration("```rust```"), "rust");
    }

    #[test]
    fn strips_blockquotes_and_dashes() {
        assert_eq!(strip_decoration("> quoted tip"), "quoted tip");
        assert_eq!(strip_decoration("- Install rustup"), "Install rustup");
        assert_eq!(strip_decoration("--- "), "");
    }

    #[test]
    fn plain_text_only_trimmed() {
        assert_eq!(
            strip_decoration("  Explore Rust’s concurrency model.  "),
            "Explore Rust’s concurrency model."
        );
    }

    #[test]
    fn nested_decoration_reaches_fixpoint() {
        // The heading marker only surfaces once the dash is gone.
        assert_eq!(strip_once("- # **Read**"), "# Read");
        assert_eq!(strip_decoration("- # **Read**"), "Read");
    }

    #[test]
    fn idempotent_on_samples() {
        for sample in [
            "## **Understanding** the [Basics](x)",
            "- > ~~old~~ `new`",
            "***bold italic***",
            "![a](b)[c](d)",
            "-- - - item",
            "> > nested quote",
        ] {
            let once = strip_decoration(sample);
            assert_eq!(strip_decoration(&once), once, "sample {sample:?}");
        }
    }

    proptest! {
        #[test]
        fn idempotent_on_generated_text(text in r"[#*~`\[\]()!>\- a-z]{0,40}") {
            let once = strip_decoration(&text);
            prop_assert_eq!(strip_decoration(&once), once);
        }
    }
}
