use crate::error::TemplateError;

/// One piece of a parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Placeholder(String),
}

/// Parsed `{name}` path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathTemplate {
    /// Parse `raw` into literal and placeholder segments.
    ///
    /// # Errors
    /// Returns [`TemplateError::MalformedPath`] for unbalanced braces, nested
    /// braces or an empty placeholder name.
    pub fn parse(method: &str, raw: &str) -> Result<Self, TemplateError> {
        let malformed = |reason: &str| TemplateError::MalformedPath {
            method: method.to_owned(),
            path: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(malformed("nested `{`")),
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(malformed("unclosed `{`"));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(malformed("empty placeholder"));
                    }
                    if !literal.is_empty() {
                        segments.push(PathSegment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(PathSegment::Placeholder(name.to_owned()));
                }
                '}' => return Err(malformed("unmatched `}`")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(PathSegment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            PathSegment::Placeholder(name) => Some(name.as_str()),
            PathSegment::Literal(_) => None,
        })
    }
}

/// Join two path or URL parts with exactly one `/` between them.
#[must_use]
pub fn join_slash(left: &str, right: &str) -> String {
    let left = left.trim_end_matches('/');
    let right = right.trim_start_matches('/');
    match (left.is_empty(), right.is_empty()) {
        (true, true) => "/".to_owned(),
        (true, false) => format!("/{right}"),
        (false, true) => left.to_owned(),
        (false, false) => format!("{left}/{right}"),
    }
}
