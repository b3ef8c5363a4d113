//! Path pattern compilation and matching.
//!
//! # Syntax
//! - Literal text matches itself (`.` and `-` included)
//! - `:name` captures one segment, `:name?` makes the segment optional,
//!   `:name(\d+)` constrains what the segment may contain
//! - `*` captures zero or more characters, stored under "0", "1", ...
//! - `?` and `+` apply to the preceding character or `( )` group
//!
//! # Design Decisions
//! - Every pattern compiles to one `Regex` at registration time
//! - Routes anchor to the whole path, middleware to a prefix that ends
//!   at a segment boundary
//! - Raw regular expressions are searched unanchored, as given
//! - Captures are kept percent-encoded until the router decodes them

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};

/// Capture group holding the unmatched remainder of a prefix match.
const REST_GROUP: &str = "__rest";

/// How much of the path a pattern must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The whole path (routes).
    Full,
    /// A leading run of whole segments (middleware, mounts).
    Prefix,
}

/// Matching behaviour shared by every pattern of one router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// `/Users` and `/users` are different paths.
    pub case_sensitive: bool,
    /// `/about/` does not match a route registered as `/about`.
    pub strict: bool,
}

/// Registration-time pattern errors.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("parameter `{name}` appears more than once in `{pattern}`")]
    DuplicateParam { pattern: String, name: String },

    #[error("missing parameter name after `:` in `{0}`")]
    EmptyParamName(String),

    #[error("unbalanced parentheses in `{0}`")]
    Unbalanced(String),

    #[error("`{quantifier}` has nothing to repeat in `{pattern}`")]
    DanglingQuantifier { pattern: String, quantifier: char },

    #[error("`{pattern}` is not a valid pattern: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A captured segment that is not valid percent-encoded UTF-8.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode parameter `{name}` from `{raw}`")]
pub struct ParamDecodeError {
    pub name: String,
    pub raw: String,
}

/// A path pattern as supplied at registration.
#[derive(Debug, Clone)]
pub enum PathSpec {
    /// String pattern using the syntax described in the module docs.
    Template(String),
    /// Regular expression used verbatim.
    Regex(Regex),
}

impl From<&str> for PathSpec {
    fn from(value: &str) -> Self {
        PathSpec::Template(value.to_string())
    }
}

impl From<String> for PathSpec {
    fn from(value: String) -> Self {
        PathSpec::Template(value)
    }
}

impl From<Regex> for PathSpec {
    fn from(value: Regex) -> Self {
        PathSpec::Regex(value)
    }
}

/// Result of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Captures in pattern order, still percent-encoded.
    pub params: Vec<(String, String)>,
    /// Length of the path consumed by the pattern.
    pub matched_len: usize,
}

impl PathMatch {
    /// Percent-decode every captured value.
    pub fn decode(&self) -> Result<Vec<(String, String)>, ParamDecodeError> {
        self.params
            .iter()
            .map(|(name, raw)| {
                percent_decode_str(raw)
                    .decode_utf8()
                    .map(|value| (name.clone(), value.into_owned()))
                    .map_err(|_| ParamDecodeError {
                        name: name.clone(),
                        raw: raw.clone(),
                    })
            })
            .collect()
    }
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    anchor: Anchor,
    raw: bool,
}

impl PathPattern {
    /// Compile a pattern for the given anchoring.
    pub fn compile(
        spec: impl Into<PathSpec>,
        anchor: Anchor,
        options: MatchOptions,
    ) -> Result<Self, PatternError> {
        match spec.into() {
            PathSpec::Regex(regex) => Ok(Self {
                source: regex.as_str().to_string(),
                regex,
                anchor,
                raw: true,
            }),
            PathSpec::Template(template) => {
                let body = translate(&template, anchor)?;
                let tail = match anchor {
                    Anchor::Prefix => format!("(?P<{REST_GROUP}>/.*)?$"),
                    Anchor::Full if options.strict => "$".to_string(),
                    Anchor::Full if body.ends_with('/') => "?$".to_string(),
                    Anchor::Full => "/?$".to_string(),
                };
                let regex = RegexBuilder::new(&format!("^{body}{tail}"))
                    .case_insensitive(!options.case_sensitive)
                    .build()
                    .map_err(|source| PatternError::Regex {
                        pattern: template.clone(),
                        source,
                    })?;

                Ok(Self {
                    source: template,
                    regex,
                    anchor,
                    raw: false,
                })
            }
        }
    }

    /// The pattern as it was registered.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Match a request path, returning raw captures and the consumed length.
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let captures = self.regex.captures(path)?;
        let whole = captures.get(0)?;

        let matched_len = match self.anchor {
            Anchor::Full => path.len(),
            Anchor::Prefix if self.raw => {
                let at_boundary = whole.end() == path.len()
                    || path[whole.end()..].starts_with('/')
                    || whole.as_str().ends_with('/');
                if whole.start() != 0 || !at_boundary {
                    return None;
                }
                whole.end()
            }
            Anchor::Prefix => captures
                .name(REST_GROUP)
                .map(|rest| rest.start())
                .unwrap_or(path.len()),
        };

        let mut params = Vec::new();
        let mut unnamed = 0usize;
        for (index, name) in self.regex.capture_names().enumerate().skip(1) {
            let key = match name {
                Some(REST_GROUP) => continue,
                Some(name) => name.to_string(),
                None => {
                    unnamed += 1;
                    (unnamed - 1).to_string()
                }
            };
            if let Some(value) = captures.get(index) {
                params.push((key, value.as_str().to_string()));
            }
        }

        Some(PathMatch {
            params,
            matched_len,
        })
    }
}

/// Translate a string pattern into a regex body (without anchors).
fn translate(pattern: &str, anchor: Anchor) -> Result<String, PatternError> {
    let trimmed = match anchor {
        Anchor::Prefix => pattern.trim_end_matches('/'),
        Anchor::Full if pattern.is_empty() => "/",
        Anchor::Full => pattern,
    };
    let chars: Vec<char> = trimmed.chars().collect();

    let mut out = String::with_capacity(trimmed.len() * 2);
    let mut seen = HashSet::new();
    let mut depth = 0usize;
    let mut can_repeat = false;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ':' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                if end == start {
                    return Err(PatternError::EmptyParamName(pattern.to_string()));
                }
                let name: String = chars[start..end].iter().collect();
                if !seen.insert(name.clone()) {
                    return Err(PatternError::DuplicateParam {
                        pattern: pattern.to_string(),
                        name,
                    });
                }
                i = end;

                let mut capture = "[^/]+?".to_string();
                if i < chars.len() && chars[i] == '(' {
                    let close = closing_paren(&chars, i)
                        .ok_or_else(|| PatternError::Unbalanced(pattern.to_string()))?;
                    capture = chars[i + 1..close].iter().collect();
                    i = close + 1;
                }

                if i < chars.len() && chars[i] == '?' {
                    i += 1;
                    if out.ends_with('/') {
                        out.pop();
                        out.push_str(&format!("(?:/(?P<{name}>{capture}))?"));
                    } else {
                        out.push_str(&format!("(?P<{name}>{capture})?"));
                    }
                    can_repeat = false;
                } else {
                    out.push_str(&format!("(?P<{name}>{capture})"));
                    can_repeat = true;
                }
                continue;
            }
            '*' => {
                out.push_str("(.*)");
                can_repeat = false;
            }
            '(' => {
                depth += 1;
                out.push_str("(?:");
                can_repeat = false;
            }
            ')' => {
                if depth == 0 {
                    return Err(PatternError::Unbalanced(pattern.to_string()));
                }
                depth -= 1;
                out.push(')');
                can_repeat = true;
            }
            quantifier @ ('?' | '+') => {
                if !can_repeat {
                    return Err(PatternError::DanglingQuantifier {
                        pattern: pattern.to_string(),
                        quantifier,
                    });
                }
                out.push(quantifier);
                can_repeat = false;
            }
            literal => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(literal.encode_utf8(&mut buf)));
                can_repeat = true;
            }
        }
        i += 1;
    }

    if depth != 0 {
        return Err(PatternError::Unbalanced(pattern.to_string()));
    }
    Ok(out)
}

/// Index of the `)` closing the `(` at `open`.
fn closing_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in chars[open..].iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}
