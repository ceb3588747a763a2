//! Canonical key derivation.

use std::sync::LazyLock;

use regex::Regex;

use crate::kind::EntityKind;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static slug pattern"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

/// Default bound on derived key length, in characters.
pub const DEFAULT_MAX_KEY_LEN: usize = 64;

/// Comparison form of a name: lowercase, trimmed, inner whitespace collapsed.
#[must_use]
pub fn normalize(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").to_lowercase()
}

/// Derives a key from free text: lowercase, runs of non-alphanumerics become
/// `_`, truncated to `max_len` characters.
///
/// Text with no alphanumerics at all still yields a stable key, built from
/// the kind and a digest of the text.
///
/// ```
/// use factfold::identity::slugify;
/// use factfold::EntityKind;
///
/// assert_eq!(slugify(EntityKind::Person, "Dan Blankenship", 64), "dan_blankenship");
/// assert_eq!(slugify(EntityKind::Location, "  Money Pit (1795) ", 64), "money_pit_1795");
/// assert_eq!(slugify(EntityKind::Borehole, "H-8", 64), "h_8");
/// ```
#[must_use]
pub fn slugify(kind: EntityKind, raw: &str, max_len: usize) -> String {
    let lowered = raw.to_lowercase();
    let replaced = NON_ALNUM.replace_all(&lowered, "_");
    let trimmed = replaced.trim_matches('_');
    let truncated: String = trimmed.chars().take(max_len.max(1)).collect();
    let slug = truncated.trim_end_matches('_');
    if slug.is_empty() {
        let digest = blake3::hash(raw.as_bytes()).to_hex();
        return format!("{}_{}", kind.as_str(), &digest.as_str()[..12]);
    }
    slug.to_string()
}

/// Episode key, `s01e02`.
#[must_use]
pub fn episode_key(season: u32, episode: u32) -> String {
    format!("s{season:02}e{episode:02}")
}

/// Interval key, `<borehole>_<from>_<to>` with decimal points written as `p`.
///
/// ```
/// use factfold::identity::interval_key;
///
/// assert_eq!(interval_key("10X", 30.0, 32.5), "10x_30p0_32p5");
/// ```
#[must_use]
pub fn interval_key(borehole: &str, from_m: f64, to_m: f64) -> String {
    let bh = slugify(EntityKind::Borehole, borehole, usize::MAX);
    format!("{bh}_{}_{}", depth_token(from_m), depth_token(to_m))
}

fn depth_token(depth: f64) -> String {
    let rendered = if depth.fract() == 0.0 {
        format!("{depth:.1}")
    } else {
        depth.to_string()
    };
    rendered.replace('.', "p").replace('-', "m")
}

/// Display form of a key: `rick_lagina` becomes `Rick Lagina`.
#[must_use]
pub fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
