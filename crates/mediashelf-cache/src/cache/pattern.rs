//! Redis-style glob patterns for key invalidation.
//!
//! Supports `*`, `?` and `[...]` classes with the same meaning as `SCAN MATCH`,
//! so a pattern behaves identically against L1 and L2.

use regex::Regex;

/// Appends a trailing `*` unless the pattern already ends with one.
pub fn ensure_wildcard(pattern: &str) -> String {
    if pattern.ends_with('*') {
        pattern.to_string()
    } else {
        format!("{pattern}*")
    }
}

/// Compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    /// Compiles `glob`. Returns `None` for patterns that cannot be translated
    /// (an unterminated `[` class).
    pub fn new(glob: &str) -> Option<Self> {
        let mut out = String::with_capacity(glob.len() + 8);
        out.push('^');

        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '\\' => {
                    let escaped = chars.next()?;
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
                '[' => {
                    out.push('[');
                    if chars.peek() == Some(&'^') {
                        chars.next();
                        out.push('^');
                    }
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            closed = true;
                            break;
                        }
                        if matches!(inner, '\\' | '[' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(inner);
                    }
                    if !closed {
                        return None;
                    }
                    out.push(']');
                }
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }

        out.push('$');
        Regex::new(&out).ok().map(|regex| Self { regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}
