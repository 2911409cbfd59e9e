//! Path pattern compilation and matching.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::{Result, RouterError};
use crate::request::{percent_decode, PathParams};

/// The parameter key under which a trailing wildcard capture is stored.
pub const WILDCARD_KEY: &str = "*";

/// A segment in a compiled path pattern.
#[derive(Debug, Clone)]
pub enum Segment {
    /// A literal segment, matched by exact equality.
    Static(String),
    /// A named parameter (`:id` or `{id}`), matching one non-empty segment.
    Param(String),
    /// A named parameter constrained by an anchored regex (`{id:[0-9]+}`).
    Constrained {
        /// Parameter name.
        name: String,
        /// The compiled, fully-anchored constraint.
        regex: Regex,
    },
    /// A trailing wildcard consuming the remainder of the path.
    Wildcard,
}

impl Segment {
    fn param_name(&self) -> Option<&str> {
        match self {
            Self::Param(name) | Self::Constrained { name, .. } => Some(name),
            Self::Static(_) => None,
            Self::Wildcard => Some(WILDCARD_KEY),
        }
    }
}

/// A compiled route pattern.
///
/// Compiled once at registration time and immutable afterward, so matching
/// never constructs a regex per request.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// The original pattern string.
    source: String,
    /// Parsed segments; a wildcard can only appear last.
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles a route pattern string.
    ///
    /// Pattern syntax:
    /// - `/users` - literal path
    /// - `/users/:id` or `/users/{id}` - named parameter
    /// - `/users/{id:[0-9]+}` - regex-constrained parameter
    /// - `/files*` - trailing wildcard, captured under [`WILDCARD_KEY`]
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::MalformedPattern`] for unbalanced braces,
    /// invalid regexes, a wildcard anywhere but the trailing position, or
    /// duplicate parameter names.
    ///
    /// # Example
    ///
    /// ```
    /// use trellis_router::Pattern;
    ///
    /// let pattern = Pattern::parse("/posts/:id/comments/{cid:[0-9]+}").unwrap();
    /// let params = pattern.match_path("/posts/abc/comments/7").unwrap();
    /// assert_eq!(params.get("id"), Some("abc"));
    /// assert_eq!(params.get("cid"), Some("7"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self> {
        let malformed = |reason: &str| RouterError::MalformedPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let (body, wildcard) = match pattern.strip_suffix('*') {
            Some(body) => (body, true),
            None => (pattern, false),
        };
        if body.contains('*') {
            return Err(malformed("wildcard is only allowed in trailing position"));
        }

        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        for part in body.split('/').filter(|s| !s.is_empty()) {
            let segment = Self::parse_segment(part, pattern)?;
            if let Some(name) = segment.param_name() {
                if !seen.insert(name.to_string()) {
                    return Err(malformed(&format!("duplicate parameter name `{name}`")));
                }
            }
            segments.push(segment);
        }
        if wildcard {
            segments.push(Segment::Wildcard);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    fn parse_segment(part: &str, pattern: &str) -> Result<Segment> {
        let malformed = |reason: String| RouterError::MalformedPattern {
            pattern: pattern.to_string(),
            reason,
        };

        if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(malformed("empty parameter name".to_string()));
            }
            return Ok(Segment::Param(name.to_string()));
        }

        if let Some(inner) = part.strip_prefix('{') {
            let Some(inner) = inner.strip_suffix('}') else {
                return Err(malformed(format!("unbalanced braces in `{part}`")));
            };
            let (name, constraint) = match inner.split_once(':') {
                Some((name, constraint)) => (name, Some(constraint)),
                None => (inner, None),
            };
            if name.is_empty() {
                return Err(malformed("empty parameter name".to_string()));
            }
            return match constraint {
                Some(constraint) => {
                    let regex = Regex::new(&format!("^(?:{constraint})$"))
                        .map_err(|e| malformed(format!("invalid regex: {e}")))?;
                    Ok(Segment::Constrained {
                        name: name.to_string(),
                        regex,
                    })
                }
                None => Ok(Segment::Param(name.to_string())),
            };
        }

        if part.contains(['{', '}']) {
            return Err(malformed(format!("unbalanced braces in `{part}`")));
        }

        Ok(Segment::Static(part.to_string()))
    }

    /// Attempts to match a path against this pattern.
    ///
    /// The path is tokenized on `/` with empty segments dropped; every
    /// pattern segment must match its path segment and the counts must align,
    /// the trailing wildcard being the only segment allowed to absorb extra
    /// length. Captured parameter values are percent-decoded; constraint
    /// regexes run against the raw segment text.
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (fixed, wildcard) = match self.segments.split_last() {
            Some((Segment::Wildcard, fixed)) => (fixed, true),
            _ => (self.segments.as_slice(), false),
        };

        if wildcard {
            if parts.len() < fixed.len() {
                return None;
            }
        } else if parts.len() != fixed.len() {
            return None;
        }

        let mut params = PathParams::new();
        for (segment, part) in fixed.iter().zip(&parts) {
            match segment {
                Segment::Static(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), percent_decode(part, false));
                }
                Segment::Constrained { name, regex } => {
                    if !regex.is_match(part) {
                        return None;
                    }
                    params.insert(name.clone(), percent_decode(part, false));
                }
                Segment::Wildcard => return None,
            }
        }

        if wildcard {
            // the raw suffix of the path, not the rejoined segments, so
            // consecutive and trailing slashes inside the capture survive
            let remainder = parts.get(fixed.len()).map_or("", |first| {
                let offset = first.as_ptr() as usize - path.as_ptr() as usize;
                &path[offset..]
            });
            params.insert(WILDCARD_KEY, remainder);
        }

        Some(params)
    }

    /// Returns the original pattern string.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the parameter names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(Segment::param_name)
    }

    /// Generates a path from parameters, for reverse URL lookup.
    ///
    /// Returns `None` if any named parameter is missing from `params`.
    pub fn reverse(&self, params: &HashMap<String, String>) -> Option<String> {
        let mut path = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Static(literal) => {
                    path.push('/');
                    path.push_str(literal);
                }
                Segment::Param(name) | Segment::Constrained { name, .. } => {
                    path.push('/');
                    path.push_str(params.get(name)?);
                }
                Segment::Wildcard => {
                    path.push('/');
                    path.push_str(params.get(WILDCARD_KEY)?);
                }
            }
        }

        if path.is_empty() {
            path.push('/');
        }

        Some(path)
    }
}
