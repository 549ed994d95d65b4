//! URL templates: literal segments plus `{name}` parameters.
//!
//! A template is compiled once at registration into a segment list with a
//! precomputed rank; matching a request path walks the segments without
//! allocating unless captures exist.

use crate::router::RegisterError;
use crate::PathParams;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled URL template such as `/users/{id}/posts`.
///
/// Specificity is the number of literal segments; the rank
/// `100 * specificity + parameter_count` orders candidates so that literal,
/// longer templates win over generic, parameterized ones.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Segment>,
    specificity: u32,
    param_count: u32,
}

impl UrlTemplate {
    /// Compiles a template. Trailing slashes are not significant:
    /// `/users/` and `/users` compile to the same matcher.
    pub fn parse(template: &str) -> Result<Self, RegisterError> {
        if !template.starts_with('/') {
            return Err(RegisterError::invalid_template(template, "template must start with '/'"));
        }

        let mut segments = Vec::new();
        let mut specificity = 0u32;
        let mut param_count = 0u32;

        for piece in template.split('/').filter(|piece| !piece.is_empty()) {
            if let Some(name) = piece.strip_prefix('{') {
                let Some(name) = name.strip_suffix('}') else {
                    return Err(RegisterError::invalid_template(template, "unterminated '{' parameter"));
                };
                if name.is_empty() {
                    return Err(RegisterError::invalid_template(template, "empty parameter name"));
                }
                param_count += 1;
                segments.push(Segment::Param(name.to_string()));
            } else if piece.contains(['{', '}']) {
                return Err(RegisterError::invalid_template(template, "braces must span a whole segment"));
            } else {
                specificity += 1;
                segments.push(Segment::Literal(piece.to_string()));
            }
        }

        Ok(Self { raw: template.to_string(), segments, specificity, param_count })
    }

    pub fn rank(&self) -> u32 {
        100 * self.specificity + self.param_count
    }

    pub fn specificity(&self) -> u32 {
        self.specificity
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches a request path against this template, producing captures in
    /// template order. The match is anchored: segment counts must agree.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::empty();
        let mut segments = self.segments.iter();

        for piece in path.split('/').filter(|piece| !piece.is_empty()) {
            match segments.next()? {
                Segment::Literal(literal) => {
                    if literal != piece {
                        return None;
                    }
                }
                Segment::Param(name) => params.push(name.clone(), piece),
            }
        }

        // fewer path segments than template segments is no match either
        if segments.next().is_some() {
            return None;
        }

        Some(params)
    }

    /// Shape equality for duplicate detection: parameter names do not
    /// distinguish templates, `/users/{id}` and `/users/{key}` collide.
    pub(crate) fn same_shape(&self, other: &UrlTemplate) -> bool {
        self.segments.len() == other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| match (a, b) {
                (Segment::Literal(x), Segment::Literal(y)) => x == y,
                (Segment::Param(_), Segment::Param(_)) => true,
                _ => false,
            })
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals_and_params() {
        let template = UrlTemplate::parse("/users/{id}/posts").unwrap();
        assert_eq!(template.specificity(), 2);
        assert_eq!(template.param_count(), 1);
        assert_eq!(template.rank(), 201);
    }

    #[test]
    fn root_template_matches_only_root() {
        let template = UrlTemplate::parse("/").unwrap();
        assert_eq!(template.rank(), 0);
        assert!(template.matches("/").is_some());
        assert!(template.matches("/x").is_none());
    }

    #[test]
    fn match_captures_in_template_order() {
        let template = UrlTemplate::parse("/users/{user}/posts/{post}").unwrap();
        let params = template.matches("/users/alice/posts/7").unwrap();
        let captured: Vec<_> = params.iter().collect();
        assert_eq!(captured, vec![("user", "alice"), ("post", "7")]);
    }

    #[test]
    fn match_is_anchored() {
        let template = UrlTemplate::parse("/users/{id}").unwrap();
        assert!(template.matches("/users").is_none());
        assert!(template.matches("/users/42/extra").is_none());
        assert!(template.matches("/users/42").is_some());
    }

    #[test]
    fn trailing_slash_is_not_significant() {
        let template = UrlTemplate::parse("/users/").unwrap();
        assert!(template.matches("/users").is_some());
        assert!(template.matches("/users/").is_some());
    }

    #[test]
    fn literal_beats_param_in_rank() {
        let literal = UrlTemplate::parse("/users/me").unwrap();
        let param = UrlTemplate::parse("/users/{id}").unwrap();
        assert!(literal.rank() > param.rank());
    }

    #[test]
    fn parameterized_ranks_above_shorter_generic() {
        // two literals beat one literal plus one param
        let a = UrlTemplate::parse("/a/{x}").unwrap();
        let b = UrlTemplate::parse("/a/b").unwrap();
        assert!(b.rank() > a.rank());
        // with equal specificity, more params rank higher
        let c = UrlTemplate::parse("/a/{x}/{y}").unwrap();
        assert!(c.rank() > a.rank());
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(UrlTemplate::parse("users").is_err());
        assert!(UrlTemplate::parse("/users/{id").is_err());
        assert!(UrlTemplate::parse("/users/{}").is_err());
        assert!(UrlTemplate::parse("/users/x{id}").is_err());
    }

    #[test]
    fn shape_equality_ignores_param_names() {
        let a = UrlTemplate::parse("/users/{id}").unwrap();
        let b = UrlTemplate::parse("/users/{key}").unwrap();
        let c = UrlTemplate::parse("/users/me").unwrap();
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }
}
