//! Document filename derivation.
//!
//! Settings are keyed by a filename derived from the document name. The
//! derivation follows Android resource naming so the same document always
//! maps to the same key regardless of decoration in its title.

use regex::Regex;
use std::sync::LazyLock;

/// Latin letters folded to ASCII. Earlier entries win.
const LATIN_TO_ASCII: &[(&str, &str)] = &[
    ("ae", "äæǽ"),
    ("oe", "öœ"),
    ("ue", "ü"),
    ("Ae", "Ä"),
    ("Ue", "Ü"),
    ("Oe", "Ö"),
    ("A", "ÀÁÂÃÅǺĀĂĄǍ"),
    ("a", "àáâãåǻāăąǎª"),
    ("C", "ÇĆĈĊČ"),
    ("c", "çćĉċč"),
    ("D", "ÐĎĐ"),
    ("d", "ðďđ"),
    ("E", "ÈÉÊËĒĔĖĘĚ"),
    ("e", "èéêëēĕėęě"),
    ("G", "ĜĞĠĢ"),
    ("g", "ĝğġģ"),
    ("H", "ĤĦ"),
    ("h", "ĥħ"),
    ("I", "ÌÍÎÏĨĪĬǏĮİ"),
    ("i", "ìíîïĩīĭǐįı"),
    ("J", "Ĵ"),
    ("j", "ĵ"),
    ("K", "Ķ"),
    ("k", "ķ"),
    ("L", "ĹĻĽĿŁ"),
    ("l", "ĺļľŀł"),
    ("N", "ÑŃŅŇ"),
    ("n", "ñńņňŉ"),
    ("O", "ÒÓÔÕŌŎǑŐƠØǾ"),
    ("o", "òóôõōŏǒőơøǿº"),
    ("R", "ŔŖŘ"),
    ("r", "ŕŗř"),
    ("S", "ŚŜŞŠ"),
    ("s", "śŝşšſ"),
    ("T", "ŢŤŦ"),
    ("t", "ţťŧ"),
    ("U", "ÙÚÛŨŪŬŮŰŲƯǓǕǗǙǛ"),
    ("u", "ùúûũūŭůűųưǔǖǘǚǜ"),
    ("Y", "ÝŸŶ"),
    ("y", "ýÿŷ"),
    ("W", "Ŵ"),
    ("w", "ŵ"),
    ("Z", "ŹŻŽ"),
    ("z", "źżž"),
    ("AE", "ÆǼ"),
    ("ss", "ß"),
    ("IJ", "Ĳ"),
    ("ij", "ĳ"),
    ("OE", "Œ"),
    ("f", "ƒ"),
];

/// Anything outside printable ASCII.
static NON_PRINTABLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\x20-\x7E]").unwrap());

/// Punctuation that is dropped outright.
static UNSUPPORTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x21-\x2B\x3A-\x40\x5B-\x5E\x60\x7B-\x7E]").unwrap());

static LEADING_DOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\.").unwrap());

static LEADING_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+").unwrap());

/// `,` `-` `.` and `_` all become underscores.
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\-._]").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn fold_latin(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match LATIN_TO_ASCII
            .iter()
            .find(|(_, variants)| variants.contains(c))
        {
            Some((ascii, _)) => out.push_str(ascii),
            None => out.push(c),
        }
    }
    out
}

/// Derive the settings filename for a document name.
///
/// # Examples
///
/// ```
/// use labeler_core::naming::to_resource_name;
///
/// assert_eq!(to_resource_name("Team/Home Screen v2.1"), "home_screen_v2_1");
/// assert_eq!(to_resource_name("Übersicht"), "uebersicht");
/// assert_eq!(to_resource_name("???"), "untitled");
/// ```
pub fn to_resource_name(name: &str) -> String {
    let base = match name.rfind('/') {
        Some(pos) => &name[pos + 1..],
        None => name,
    };

    let mut result = fold_latin(base);
    result = NON_PRINTABLE.replace_all(&result, "").into_owned();
    result = UNSUPPORTED.replace_all(&result, "").into_owned();
    result = LEADING_DOT.replace(&result, "").into_owned();
    result = LEADING_DIGITS.replace(&result, "").into_owned();
    result = SEPARATORS.replace_all(&result, "_").into_owned();
    result = WHITESPACE
        .replace_all(result.trim(), "_")
        .to_lowercase();

    if result.is_empty() {
        "untitled".to_string()
    } else {
        result
    }
}
