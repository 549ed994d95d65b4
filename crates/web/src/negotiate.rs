//! `Accept` header negotiation.
//!
//! Parses the header into media ranges with fixed-point q-values (0..=1000,
//! malformed entries skipped) and picks the best of a set of registered
//! concrete types. `*/*` winning is reported as [`Preference::Any`] so the
//! router can fall back to a type-agnostic handler.

use mime::Mime;

const DEFAULT_QUALITY: u16 = 1000;

/// One parsed entry of an `Accept` header.
#[derive(Debug, Clone)]
pub struct MediaRange {
    mime: Mime,
    /// fixed-point q-value, `0.8` is 800
    quality: u16,
}

impl MediaRange {
    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    pub fn quality(&self) -> u16 {
        self.quality
    }

    /// exact > subtype wildcard > `*/*`
    fn specificity(&self) -> u8 {
        if self.mime.type_() == mime::STAR {
            0
        } else if self.mime.subtype() == mime::STAR {
            1
        } else {
            2
        }
    }

    fn accepts(&self, concrete: &Mime) -> bool {
        if self.mime.type_() == mime::STAR {
            return true;
        }
        if self.mime.type_() != concrete.type_() {
            return false;
        }
        self.mime.subtype() == mime::STAR || self.mime.subtype() == concrete.subtype()
    }
}

/// Outcome of negotiation over a set of registered types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference {
    /// A registered concrete type won.
    Concrete(Mime),
    /// `*/*` (or an absent `Accept` header) won: the client takes anything.
    Any,
}

/// Parses an `Accept` header value, skipping entries that do not parse.
pub fn parse_accept(value: &str) -> Vec<MediaRange> {
    value
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let mime: Mime = entry.parse().ok()?;
            let quality = match mime.get_param("q") {
                Some(q) => parse_quality(q.as_str())?,
                None => DEFAULT_QUALITY,
            };
            Some(MediaRange { mime, quality })
        })
        .collect()
}

/// Parses a q-value like `1`, `0.8` or `0.85` into 0..=1000 fixed point.
fn parse_quality(value: &str) -> Option<u16> {
    let (integer, fraction) = match value.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (value, ""),
    };

    let whole: u16 = match integer {
        "0" => 0,
        "1" => 1000,
        _ => return None,
    };

    if fraction.len() > 3 || fraction.chars().any(|c| !c.is_ascii_digit()) {
        return None;
    }
    if fraction.is_empty() {
        return Some(whole);
    }

    let mut milli: u16 = fraction.parse().ok()?;
    for _ in fraction.len()..3 {
        milli *= 10;
    }

    let quality = whole + milli;
    (quality <= 1000).then_some(quality)
}

/// Picks the best of `available` for the given `Accept` header value.
///
/// An absent header counts as `*/*`. Returns `None` when nothing registered
/// is acceptable.
pub fn best_match(accept: Option<&str>, available: &[Mime]) -> Option<Preference> {
    let Some(accept) = accept else {
        return Some(Preference::Any);
    };

    let mut ranges = parse_accept(accept);
    if ranges.is_empty() {
        // nothing parseable: behave as if the header were absent
        return Some(Preference::Any);
    }
    // q=0 is an explicit refusal, not an absent preference
    ranges.retain(|range| range.quality > 0);
    if ranges.is_empty() {
        return None;
    }

    // stable sort keeps header order among equal (q, specificity) entries
    ranges.sort_by(|a, b| (b.quality, b.specificity()).cmp(&(a.quality, a.specificity())));

    for range in &ranges {
        if range.specificity() == 0 {
            return Some(Preference::Any);
        }
        if let Some(hit) = available.iter().find(|concrete| range.accepts(concrete)) {
            return Some(Preference::Concrete(hit.clone()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quality_values() {
        assert_eq!(parse_quality("1"), Some(1000));
        assert_eq!(parse_quality("1.0"), Some(1000));
        assert_eq!(parse_quality("0.8"), Some(800));
        assert_eq!(parse_quality("0.85"), Some(850));
        assert_eq!(parse_quality("0"), Some(0));
        assert_eq!(parse_quality("2"), None);
        assert_eq!(parse_quality("1.5"), None);
        assert_eq!(parse_quality("0.8x"), None);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let ranges = parse_accept("text/html, not a mime, application/json;q=0.5");
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].mime().essence_str(), "text/html");
        assert_eq!(ranges[1].quality(), 500);
    }

    #[test]
    fn exact_type_wins_over_wildcard() {
        let available = [mime::APPLICATION_JSON, mime::TEXT_HTML];
        let preference = best_match(Some("text/html, */*;q=0.1"), &available).unwrap();
        assert_eq!(preference, Preference::Concrete(mime::TEXT_HTML));
    }

    #[test]
    fn quality_orders_candidates() {
        let available = [mime::APPLICATION_JSON, mime::TEXT_HTML];
        let preference = best_match(Some("text/html;q=0.3, application/json;q=0.9"), &available).unwrap();
        assert_eq!(preference, Preference::Concrete(mime::APPLICATION_JSON));
    }

    #[test]
    fn subtype_wildcard_matches_registered_type() {
        let available = [mime::APPLICATION_JSON];
        let preference = best_match(Some("application/*"), &available).unwrap();
        assert_eq!(preference, Preference::Concrete(mime::APPLICATION_JSON));
    }

    #[test]
    fn star_star_reports_any() {
        let available = [mime::APPLICATION_JSON];
        assert_eq!(best_match(Some("*/*"), &available), Some(Preference::Any));
        assert_eq!(best_match(None, &available), Some(Preference::Any));
    }

    #[test]
    fn unacceptable_yields_none() {
        let available = [mime::APPLICATION_JSON];
        assert_eq!(best_match(Some("text/html"), &available), None);
    }

    #[test]
    fn zero_quality_is_a_refusal() {
        let available = [mime::TEXT_HTML];
        assert_eq!(best_match(Some("text/html;q=0"), &available), None);
    }
}
