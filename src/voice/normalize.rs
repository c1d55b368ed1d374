//! Speech-friendly text normalization
//!
//! Turns assistant reply text (usually light markdown) into text a speech
//! synthesizer reads naturally. Stages run in a fixed order: markup is
//! stripped before symbols are expanded, so a `*` or `#` used as markup is
//! never read out as a word.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\n?(.*?)```").expect("valid fenced code regex")
});

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").expect("valid heading regex"));

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+").expect("valid bullet regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]\([^)\n]*\)").expect("valid link regex"));

static BOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*([^*\n]+?)\*\*|__([^_\n]+?)__").expect("valid bold regex")
});

static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\s][^*\n]*?)\*").expect("valid italic regex"));

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]*)`").expect("valid inline code regex"));

static DOLLAR_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$[ \t]?(\d[\d,]*(?:\.\d+)?)").expect("valid dollar amount regex")
});

static ACRONYM: LazyLock<Regex> = LazyLock::new(|| {
    let words = ACRONYMS
        .iter()
        .map(|(word, _)| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{words})\b")).expect("valid acronym regex")
});

static ABBREVIATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:e\.g\.|i\.e\.|etc\.|vs\.)").expect("valid abbreviation regex")
});

static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([.,:;!?])").expect("valid punctuation regex"));

static CLAUSE_JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([,:;])(\p{L})").expect("valid clause regex"));

static SENTENCE_JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])(\p{Lu})").expect("valid sentence regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Acronyms and their spoken forms
const ACRONYMS: &[(&str, &str)] = &[
    ("API", "A P I"),
    ("APIs", "A P Is"),
    ("UI", "user interface"),
    ("UX", "user experience"),
    ("AI", "A I"),
    ("URL", "U R L"),
    ("HTML", "H T M L"),
    ("CSS", "C S S"),
    ("JSON", "jason"),
    ("SQL", "sequel"),
    ("CPU", "C P U"),
    ("GPU", "G P U"),
    ("FAQ", "F A Q"),
    ("ETA", "E T A"),
    ("PDF", "P D F"),
    ("USB", "U S B"),
];

/// Upper bound on normalization passes
const MAX_PASSES: usize = 8;

/// Normalize assistant text for speech synthesis
///
/// Pure and idempotent: `normalize(&normalize(x)) == normalize(x)`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut current = normalize_once(text);

    // Unwrapping code or emphasis, or joining lines, can expose markup that
    // only a later pass recognizes
    for _ in 1..MAX_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(text: &str) -> String {
    let text = strip_markup(text);
    let text = expand_symbols(&text);
    let text = expand_acronyms(&text);
    normalize_spacing(&text)
}

fn strip_markup(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = BOLD.replace_all(&text, |caps: &Captures<'_>| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map_or_else(String::new, |m| m.as_str().to_string())
    });
    let text = ITALIC.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    BULLET.replace_all(&text, "").into_owned()
}

fn expand_symbols(text: &str) -> String {
    let text = DOLLAR_AMOUNT.replace_all(text, "$1 dollars");

    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str(" and "),
            '@' => out.push_str(" at "),
            '#' => out.push_str(" hashtag "),
            '$' => out.push_str(" dollars "),
            '%' => out.push_str(" percent "),
            '+' => out.push_str(" plus "),
            '=' => out.push_str(" equals "),
            _ => out.push(c),
        }
    }
    out
}

fn expand_acronyms(text: &str) -> String {
    let text = ACRONYM.replace_all(text, |caps: &Captures<'_>| {
        let word = &caps[0];
        ACRONYMS
            .iter()
            .find(|(acronym, _)| *acronym == word)
            .map_or_else(|| word.to_string(), |(_, spoken)| (*spoken).to_string())
    });

    ABBREVIATION
        .replace_all(&text, |caps: &Captures<'_>| {
            match caps[0].to_lowercase().as_str() {
                "e.g." => "for example",
                "i.e." => "that is",
                "etc." => "et cetera.",
                _ => "versus",
            }
            .to_string()
        })
        .into_owned()
}

fn normalize_spacing(text: &str) -> String {
    let text = WHITESPACE.replace_all(text, " ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = CLAUSE_JOIN.replace_all(&text, "$1 $2");
    let text = SENTENCE_JOIN.replace_all(&text, "$1 $2");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_sentence() {
        assert_eq!(
            normalize("**Hi** there, 50% done"),
            "Hi there, 50 percent done"
        );
    }

    #[test]
    fn test_markup_stripped_before_symbols() {
        assert_eq!(normalize("# Heading"), "Heading");
        assert_eq!(normalize("Use `cargo` *now*"), "Use cargo now");
        assert_eq!(normalize("## Tags: #rust"), "Tags: hashtag rust");
        assert_eq!(normalize("- first\n- second"), "first second");
        assert_eq!(normalize("__strong__ words"), "strong words");
    }

    #[test]
    fn test_links_keep_label() {
        assert_eq!(
            normalize("See [the docs](https://example.com/docs) today"),
            "See the docs today"
        );
    }

    #[test]
    fn test_fenced_code_keeps_body() {
        assert_eq!(normalize("Run:\n```sh\nls\n```"), "Run: ls");
    }

    #[test]
    fn test_symbols() {
        assert_eq!(normalize("Tom & Jerry"), "Tom and Jerry");
        assert_eq!(normalize("me@home"), "me at home");
        assert_eq!(normalize("2+2=4"), "2 plus 2 equals 4");
        assert_eq!(normalize("It costs $5"), "It costs 5 dollars");
        assert_eq!(normalize("$ signs"), "dollars signs");
    }

    #[test]
    fn test_acronyms() {
        assert_eq!(normalize("The API and UI"), "The A P I and user interface");
        assert_eq!(normalize("Ask the AI"), "Ask the A I");
        // substrings are left alone
        assert_eq!(normalize("QUIT"), "QUIT");
    }

    #[test]
    fn test_abbreviations() {
        assert_eq!(
            normalize("fruit, e.g. apples"),
            "fruit, for example apples"
        );
        assert_eq!(normalize("cats vs. dogs"), "cats versus dogs");
    }

    #[test]
    fn test_spacing() {
        assert_eq!(normalize("Hello , world"), "Hello, world");
        assert_eq!(normalize("one,two"), "one, two");
        assert_eq!(normalize("Done.Next step"), "Done. Next step");
        assert_eq!(normalize("It is 10:30 now"), "It is 10:30 now");
        assert_eq!(normalize("Pi is 3.14"), "Pi is 3.14");
        assert_eq!(normalize("  lots   of\n\nspace  "), "lots of space");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("**  **"), "");
    }

    #[test]
    fn test_unwrapped_markup_is_stripped() {
        assert_eq!(normalize("`- x`"), "x");
        assert_eq!(normalize("**split\nbold**"), "split bold");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "**Hi** there, 50% done",
            "# Plan\n- Call @bob & *Alice*\n- Budget: $1,200 (+10%)",
            "The API/UI e.g. `x = y` etc. Next",
            "Tags: #one #two, ok?Yes",
            "5 * 3 = 15",
            "`- x`",
            "`* item`",
            "**- bold bullet**",
            "**split\nbold**",
            "`# not a heading`",
        ];

        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }
}
