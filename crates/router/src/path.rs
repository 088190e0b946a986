//! Path pattern compilation and matching.
//!
//! Two kinds of matchers are provided:
//! - [`PathMatcher`] tests a whole (remaining) request path against a route pattern
//!   and extracts named parameters.
//! - [`PrefixMatcher`] tests whether a router's mount prefix applies to a path and
//!   computes the path left for the router's own routes.
//!
//! # Pattern syntax
//!
//! | pattern            | meaning                                              |
//! |--------------------|------------------------------------------------------|
//! | `/users`           | literal, compared by equality                        |
//! | `/users/:id`       | named parameter, one segment                         |
//! | `/users/:id?/feed` | optional parameter                                   |
//! | `/files/:path*`    | zero or more segments                                |
//! | `/files/:path+`    | one or more segments                                 |
//! | `/users/:id(\d+)`  | parameter restricted by a custom regular expression  |
//! | `/files/*`         | zero or more trailing segments bound to `_`          |
//! | `/files/+`         | one or more trailing segments bound to `_`           |
//!
//! Parameter values are percent-decoded. Repeated parameters bind their decoded
//! segments joined by `/`. A path whose captures do not decode to UTF-8 does not match.

use crate::request::PathParams;
use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

const DEFAULT_SEGMENT_PATTERN: &str = "[^/#?]+?";
const WILDCARD_PARAM: &str = "_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("missing parameter name at {pos} in pattern '{pattern}'")]
    MissingName { pattern: String, pos: usize },

    #[error("unbalanced group at {pos} in pattern '{pattern}'")]
    UnbalancedGroup { pattern: String, pos: usize },

    #[error("empty group at {pos} in pattern '{pattern}'")]
    EmptyGroup { pattern: String, pos: usize },

    #[error("invalid regular expression for pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// Adds a leading `/` if absent and removes a trailing `/`, `/?`, `/#`, `?` or `#`.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let trimmed = if let Some(stripped) = path.strip_suffix('/') {
        stripped
    } else if let Some(stripped) = path.strip_suffix('?').or_else(|| path.strip_suffix('#')) {
        stripped.strip_suffix('/').unwrap_or(stripped)
    } else {
        path
    };

    if trimmed.starts_with('/') { trimmed.to_string() } else { format!("/{trimmed}") }
}

fn is_literal(pattern: &str) -> bool {
    !pattern.contains(':') && !pattern.contains('(')
}

fn decode(raw: &str) -> Option<String> {
    percent_decode_str(raw).decode_utf8().ok().map(Cow::into_owned)
}

/// Matches a full path against a route pattern.
#[derive(Clone)]
pub enum PathMatcher {
    Literal(String),
    Pattern(CompiledPattern),
}

impl PathMatcher {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let pattern = normalize_path(pattern);
        if let Some(base) = pattern.strip_suffix("/*") {
            CompiledPattern::compile(&format!("{base}/:{WILDCARD_PARAM}*")).map(Self::Pattern)
        } else if let Some(base) = pattern.strip_suffix("/+") {
            CompiledPattern::compile(&format!("{base}/:{WILDCARD_PARAM}+")).map(Self::Pattern)
        } else if is_literal(&pattern) {
            Ok(Self::Literal(pattern))
        } else {
            CompiledPattern::compile(&pattern).map(Self::Pattern)
        }
    }

    /// Returns the bindings on success. Literal patterns produce no bindings.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        match self {
            Self::Literal(literal) => (literal == path).then(PathParams::empty),
            Self::Pattern(pattern) => pattern.exec(path).and_then(Bindings::into_params),
        }
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => f.debug_tuple("Literal").field(literal).finish(),
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.source).finish(),
        }
    }
}

/// Outcome of a successful prefix match.
#[derive(Debug, Default)]
pub struct PrefixMatch {
    /// The path left for the mounted router, `None` when nothing was consumed.
    pub rest: Option<String>,
    pub params: PathParams,
}

/// Decides whether a mount prefix applies to a path.
#[derive(Clone)]
pub enum PrefixMatcher {
    Root,
    Literal(String),
    Pattern(CompiledPattern),
}

impl PrefixMatcher {
    pub fn compile(prefix: &str) -> Result<Self, PatternError> {
        let prefix = normalize_path(prefix);
        if is_literal(&prefix) {
            Ok(Self::literal(&prefix))
        } else {
            let pattern = if prefix == "/" { format!("/:{WILDCARD_PARAM}*") } else { format!("{prefix}/:{WILDCARD_PARAM}*") };
            CompiledPattern::compile(&pattern).map(Self::Pattern)
        }
    }

    /// A prefix compared segment-wise, even if it contains pattern characters.
    pub fn literal(prefix: &str) -> Self {
        let prefix = normalize_path(prefix);
        if prefix == "/" { Self::Root } else { Self::Literal(prefix) }
    }

    pub fn matches(&self, path: &str) -> Option<PrefixMatch> {
        match self {
            Self::Root => Some(PrefixMatch::default()),
            Self::Literal(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if rest.is_empty() {
                    Some(PrefixMatch { rest: Some("/".to_string()), params: PathParams::empty() })
                } else if rest.starts_with('/') {
                    Some(PrefixMatch { rest: Some(rest.to_string()), params: PathParams::empty() })
                } else {
                    None
                }
            }
            Self::Pattern(pattern) => {
                let bindings = pattern.exec(path)?;
                let rest = match bindings.raw(WILDCARD_PARAM) {
                    Some(raw) => format!("/{raw}"),
                    None => "/".to_string(),
                };
                let mut params = bindings.into_params()?;
                params.remove(WILDCARD_PARAM);
                Some(PrefixMatch { rest: Some(rest), params })
            }
        }
    }
}

impl fmt::Debug for PrefixMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("Root"),
            Self::Literal(prefix) => f.debug_tuple("Literal").field(prefix).finish(),
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.source).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Modifier {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '?' => Some(Self::Optional),
            '*' => Some(Self::ZeroOrMore),
            '+' => Some(Self::OneOrMore),
            _ => None,
        }
    }

    fn is_repeated(self) -> bool {
        matches!(self, Self::ZeroOrMore | Self::OneOrMore)
    }

    fn as_regex(self) -> &'static str {
        match self {
            Self::Optional | Self::ZeroOrMore => "?",
            Self::OneOrMore => "",
        }
    }
}

#[derive(Debug)]
enum Token {
    Literal(String),
    Param { name: String, prefix: String, pattern: String, modifier: Option<Modifier> },
}

/// Splits a pattern into literal runs and parameters.
fn tokenize(source: &str) -> Result<Vec<Token>, PatternError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut unnamed = 0usize;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                literal.push(chars[i + 1]);
                i += 2;
            }
            ':' | '(' => {
                let start = i;
                let name = if chars[i] == ':' {
                    i += 1;
                    let name: String =
                        chars[i..].iter().take_while(|c| c.is_ascii_alphanumeric() || **c == '_').collect();
                    if name.is_empty() {
                        return Err(PatternError::MissingName { pattern: source.to_string(), pos: start });
                    }
                    i += name.chars().count();
                    name
                } else {
                    let name = unnamed.to_string();
                    unnamed += 1;
                    name
                };

                let pattern = if i < chars.len() && chars[i] == '(' {
                    let (group, next) = read_group(source, &chars, i)?;
                    i = next;
                    group
                } else {
                    DEFAULT_SEGMENT_PATTERN.to_string()
                };

                let modifier = chars.get(i).copied().and_then(Modifier::from_char);
                if modifier.is_some() {
                    i += 1;
                }

                let prefix = match literal.chars().last() {
                    Some(c @ ('/' | '.')) => {
                        literal.pop();
                        c.to_string()
                    }
                    _ => String::new(),
                };
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Param { name, prefix, pattern, modifier });
            }
            ')' => return Err(PatternError::UnbalancedGroup { pattern: source.to_string(), pos: i }),
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// Reads a balanced `( ... )` group starting at `start`, returns its body and the next index.
fn read_group(source: &str, chars: &[char], start: usize) -> Result<(String, usize), PatternError> {
    let mut depth = 1usize;
    let mut body = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                body.push('\\');
                body.push(chars[i + 1]);
                i += 2;
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if body.is_empty() {
                        return Err(PatternError::EmptyGroup { pattern: source.to_string(), pos: start });
                    }
                    return Ok((body, i + 1));
                }
            }
            _ => {}
        }
        body.push(chars[i]);
        i += 1;
    }

    Err(PatternError::UnbalancedGroup { pattern: source.to_string(), pos: start })
}

#[derive(Debug, Clone)]
struct ParamSlot {
    name: String,
    group: String,
    repeat_delimiter: Option<String>,
}

/// A pattern compiled to an anchored, case-insensitive regular expression.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
    slots: Vec<ParamSlot>,
}

impl CompiledPattern {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        let tokens = tokenize(source)?;
        let mut expr = String::from("^");
        let mut slots = Vec::new();

        for token in tokens {
            match token {
                Token::Literal(text) => expr.push_str(&regex::escape(&text)),
                Token::Param { name, prefix, pattern, modifier } => {
                    let group = format!("p{}", slots.len());
                    let prefix_expr = regex::escape(&prefix);
                    match modifier {
                        Some(modifier) if modifier.is_repeated() => {
                            expr.push_str(&format!(
                                "(?:{prefix_expr}(?P<{group}>(?:{pattern})(?:{delim}(?:{pattern}))*)){opt}",
                                delim = if prefix.is_empty() { String::new() } else { prefix_expr.clone() },
                                opt = modifier.as_regex(),
                            ));
                        }
                        Some(modifier) => {
                            expr.push_str(&format!("(?:{prefix_expr}(?P<{group}>{pattern})){}", modifier.as_regex()));
                        }
                        None if prefix.is_empty() => expr.push_str(&format!("(?P<{group}>{pattern})")),
                        None => expr.push_str(&format!("{prefix_expr}(?P<{group}>{pattern})")),
                    }
                    let repeat_delimiter = modifier.filter(|m| m.is_repeated()).map(|_| prefix.clone());
                    slots.push(ParamSlot { name, group, repeat_delimiter });
                }
            }
        }
        expr.push_str("[/#?]?$");

        let regex = RegexBuilder::new(&expr)
            .case_insensitive(true)
            .build()
            .map_err(|e| PatternError::InvalidRegex { pattern: source.to_string(), reason: e.to_string() })?;

        Ok(Self { source: source.to_string(), regex, slots })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn exec<'p>(&self, path: &'p str) -> Option<Bindings<'_, 'p>> {
        let captures = self.regex.captures(path)?;
        let values = self
            .slots
            .iter()
            .filter_map(|slot| captures.name(&slot.group).map(|m| (slot, m.as_str())))
            .collect();
        Some(Bindings { values })
    }
}

/// Raw (still percent-encoded) captures of one match.
struct Bindings<'m, 'p> {
    values: Vec<(&'m ParamSlot, &'p str)>,
}

impl Bindings<'_, '_> {
    fn raw(&self, name: &str) -> Option<&str> {
        self.values.iter().find(|(slot, _)| slot.name == name).map(|(_, raw)| *raw)
    }

    /// Decodes every capture, `None` when one of them is not valid percent-encoded UTF-8.
    fn into_params(self) -> Option<PathParams> {
        let mut params = PathParams::empty();
        for (slot, raw) in self.values {
            let value = match &slot.repeat_delimiter {
                Some(delimiter) if !delimiter.is_empty() => {
                    raw.split(delimiter.as_str()).map(decode).collect::<Option<Vec<_>>>()?.join("/")
                }
                _ => decode(raw)?,
            };
            params.insert(slot.name.clone(), value);
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_path, PathMatcher, PatternError, PrefixMatcher};

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("api"), "/api");
        assert_eq!(normalize_path("/api/"), "/api");
        assert_eq!(normalize_path("/api/?"), "/api");
        assert_eq!(normalize_path("/api/#"), "/api");
        assert_eq!(normalize_path("/api?"), "/api");
        assert_eq!(normalize_path("/api#"), "/api");
        assert_eq!(normalize_path("?"), "/");
    }

    #[test]
    fn test_literal_matcher() {
        let matcher = PathMatcher::compile("/hello/").unwrap();
        assert!(matches!(matcher, PathMatcher::Literal(_)));

        assert!(matcher.matches("/hello").is_some());
        assert!(matcher.matches("/hello/world").is_none());
        assert!(matcher.matches("/Hello").is_none());
    }

    #[test]
    fn test_root_matcher() {
        let matcher = PathMatcher::compile("").unwrap();
        assert!(matcher.matches("/").is_some());
        assert!(matcher.matches("/a").is_none());
    }

    #[test]
    fn test_param_matcher() {
        let matcher = PathMatcher::compile("/users/:id").unwrap();

        let params = matcher.matches("/users/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));

        assert!(matcher.matches("/users").is_none());
        assert!(matcher.matches("/users/42/posts").is_none());
    }

    #[test]
    fn test_param_is_decoded() {
        let matcher = PathMatcher::compile("/users/:id").unwrap();

        let params = matcher.matches("/users/%20").unwrap();
        assert_eq!(params.get("id"), Some(" "));

        let params = matcher.matches("/users/caf%C3%A9").unwrap();
        assert_eq!(params.get("id"), Some("café"));
    }

    #[test]
    fn test_invalid_utf8_param_does_not_match() {
        let matcher = PathMatcher::compile("/users/:id").unwrap();
        assert!(matcher.matches("/users/%FF").is_none());
        assert!(matcher.matches("/users/ok%C3").is_none());

        let matcher = PathMatcher::compile("/files/*").unwrap();
        assert!(matcher.matches("/files/a/%FF/b").is_none());
        assert_eq!(matcher.matches("/files/a/%20/b").unwrap().get("_"), Some("a/ /b"));

        let prefix = PrefixMatcher::compile("/tenants/:tenant").unwrap();
        assert!(prefix.matches("/tenants/%FF/orders").is_none());
    }

    #[test]
    fn test_multiple_params() {
        let matcher = PathMatcher::compile("/users/:user/posts/:post").unwrap();
        let params = matcher.matches("/users/bob/posts/7").unwrap();
        assert_eq!(params.get("user"), Some("bob"));
        assert_eq!(params.get("post"), Some("7"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_optional_param() {
        // a trailing `?` is stripped by normalization, so optional params live mid-pattern
        let matcher = PathMatcher::compile("/users/:id?/profile").unwrap();
        assert_eq!(matcher.matches("/users/1/profile").unwrap().get("id"), Some("1"));

        let params = matcher.matches("/users/profile").unwrap();
        assert!(params.get("id").is_none());
    }

    #[test]
    fn test_custom_group() {
        let matcher = PathMatcher::compile(r"/users/:id(\d+)").unwrap();
        assert_eq!(matcher.matches("/users/12").unwrap().get("id"), Some("12"));
        assert!(matcher.matches("/users/abc").is_none());
    }

    #[test]
    fn test_unnamed_group() {
        let matcher = PathMatcher::compile("/files/(json|xml)").unwrap();
        assert_eq!(matcher.matches("/files/xml").unwrap().get("0"), Some("xml"));
        assert!(matcher.matches("/files/txt").is_none());
    }

    #[test]
    fn test_trailing_zero_or_more_wildcard() {
        let matcher = PathMatcher::compile("/files/*").unwrap();

        assert!(matcher.matches("/files").unwrap().get("_").is_none());
        assert_eq!(matcher.matches("/files/a").unwrap().get("_"), Some("a"));
        assert_eq!(matcher.matches("/files/a/b%20c").unwrap().get("_"), Some("a/b c"));
        assert!(matcher.matches("/other").is_none());
    }

    #[test]
    fn test_trailing_one_or_more_wildcard() {
        let matcher = PathMatcher::compile("/files/+").unwrap();

        assert!(matcher.matches("/files").is_none());
        assert_eq!(matcher.matches("/files/a/b").unwrap().get("_"), Some("a/b"));
    }

    #[test]
    fn test_pattern_is_case_insensitive_and_tolerates_trailing_slash() {
        let matcher = PathMatcher::compile("/users/:id").unwrap();
        assert_eq!(matcher.matches("/USERS/1").unwrap().get("id"), Some("1"));
        assert_eq!(matcher.matches("/users/1/").unwrap().get("id"), Some("1"));
    }

    #[test]
    fn test_escaped_colon_is_literal() {
        let matcher = PathMatcher::compile(r"/time/10\:30/:zone").unwrap();
        assert_eq!(matcher.matches("/time/10:30/utc").unwrap().get("zone"), Some("utc"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(PathMatcher::compile("/users/:"), Err(PatternError::MissingName { .. })));
        assert!(matches!(PathMatcher::compile("/users/:id(\\d+"), Err(PatternError::UnbalancedGroup { .. })));
        assert!(matches!(PathMatcher::compile("/users/:id()"), Err(PatternError::EmptyGroup { .. })));
        assert!(matches!(PathMatcher::compile("/users/:id([)"), Err(PatternError::InvalidRegex { .. })));
    }

    #[test]
    fn test_literal_prefix() {
        let matcher = PrefixMatcher::compile("/api").unwrap();

        let exact = matcher.matches("/api").unwrap();
        assert_eq!(exact.rest.as_deref(), Some("/"));

        let nested = matcher.matches("/api/users/1").unwrap();
        assert_eq!(nested.rest.as_deref(), Some("/users/1"));

        assert!(matcher.matches("/apiextra").is_none());
        assert!(matcher.matches("/ap").is_none());
        assert!(matcher.matches("/other/api").is_none());
    }

    #[test]
    fn test_root_prefix_consumes_nothing() {
        let matcher = PrefixMatcher::compile("/").unwrap();
        let matched = matcher.matches("/anything/here").unwrap();
        assert!(matched.rest.is_none());
        assert!(matched.params.is_empty());
    }

    #[test]
    fn test_pattern_prefix() {
        let matcher = PrefixMatcher::compile("/tenants/:tenant").unwrap();

        let matched = matcher.matches("/tenants/acme/users/a%2Fb").unwrap();
        assert_eq!(matched.rest.as_deref(), Some("/users/a%2Fb"));
        assert_eq!(matched.params.get("tenant"), Some("acme"));
        assert!(matched.params.get("_").is_none());

        let exact = matcher.matches("/tenants/acme").unwrap();
        assert_eq!(exact.rest.as_deref(), Some("/"));

        assert!(matcher.matches("/tenants").is_none());
    }
}
