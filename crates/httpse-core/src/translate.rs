//! Rule dialect translation
//!
//! Ruleset sources are written for a JavaScript-flavoured regex engine with
//! `$1`-style replacement templates. The `regex` crate differs in a few places:
//!
//! | construct            | source       | translated        |
//! |----------------------|--------------|-------------------|
//! | escaped slash        | `\/`         | `/`               |
//! | named group          | `(?<n>...)`  | `(?P<n>...)`      |
//! | look-around          | `(?=` `(?!`  | rejected          |
//! | back-reference       | `\1`         | rejected          |
//! | template group       | `$1` or `\1` | `${1}`            |
//! | template named group | `$<n>`       | `${n}`            |
//! | template whole match | `$&`         | `${0}`            |
//! | literal dollar       | `$`, `$$`    | `$$`              |
//!
//! Everything here is pure; nothing touches the store.

use regex::{Regex, RegexBuilder};

/// Compiled program size cap per pattern.
pub const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// A stored rule that cannot be used by this engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("unsupported {construct} in pattern '{pattern}'")]
    Unsupported {
        pattern: String,
        construct: &'static str,
    },
}

/// Translate a source-dialect pattern into `regex` syntax.
pub fn translate_pattern(pattern: &str) -> Result<String, RuleParseError> {
    let unsupported = |construct| RuleParseError::Unsupported {
        pattern: pattern.to_string(),
        construct,
    };

    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('/') => out.push('/'),
                Some('1'..='9') if !in_class => return Err(unsupported("back-reference")),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => {
                    return Err(RuleParseError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "trailing backslash".to_string(),
                    })
                }
            },
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                // A leading ']' (optionally after '^') is literal.
                if chars.peek() == Some(&'^') {
                    out.push('^');
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    out.push_str("\\]");
                    chars.next();
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            '(' if !in_class && chars.peek() == Some(&'?') => {
                chars.next();
                let rest: String = chars.clone().take(2).collect();
                if rest.starts_with('=') || rest.starts_with('!') {
                    return Err(unsupported("look-ahead"));
                }
                if rest == "<=" || rest == "<!" {
                    return Err(unsupported("look-behind"));
                }
                if rest.starts_with('<') {
                    chars.next();
                    out.push_str("(?P<");
                } else {
                    out.push_str("(?");
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Translate and compile a source-dialect pattern.
pub fn compile_pattern(pattern: &str) -> Result<Regex, RuleParseError> {
    let translated = translate_pattern(pattern)?;
    RegexBuilder::new(&translated)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| RuleParseError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Translate a source-dialect replacement template into `regex` expansion
/// syntax for `pattern`.
///
/// Group references resolve against the groups `pattern` actually has:
/// `$10` is group 10 when it exists and otherwise group 1 followed by `0`,
/// and a reference to a missing group stays literal. `$<name>` expands a
/// named group, or nothing if the pattern names other groups but not this
/// one. `` $` `` and `$'` have no `regex` counterpart and stay literal.
pub fn translate_replacement(template: &str, pattern: &Regex) -> String {
    let groups = pattern.captures_len().saturating_sub(1);
    let mut names = pattern.capture_names().flatten().peekable();
    let has_names = names.peek().is_some();
    let names: Vec<&str> = names.collect();

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match (c, chars.get(i + 1).copied()) {
            ('$' | '\\', Some(d)) if d.is_ascii_digit() => {
                match group_reference(&chars[i + 1..], groups) {
                    Some((group, len)) => {
                        out.push_str(&format!("${{{group}}}"));
                        i += 1 + len;
                        continue;
                    }
                    None if c == '$' => out.push_str("$$"),
                    None => out.push(c),
                }
            }
            ('$', Some('&')) => {
                out.push_str("${0}");
                i += 1;
            }
            ('$', Some('<')) if has_names => {
                let close = chars[i + 2..].iter().position(|&ch| ch == '>');
                match close {
                    Some(len) => {
                        let name: String = chars[i + 2..i + 2 + len].iter().collect();
                        if names.contains(&name.as_str()) {
                            out.push_str(&format!("${{{name}}}"));
                        }
                        i += 2 + len;
                    }
                    None => out.push_str("$$"),
                }
            }
            ('$', Some('$')) => {
                out.push_str("$$");
                i += 1;
            }
            ('$', _) => out.push_str("$$"),
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

/// Resolve the digits after `$` to a group index and the digits consumed.
fn group_reference(digits: &[char], groups: usize) -> Option<(usize, usize)> {
    let digit = |idx: usize| digits.get(idx).and_then(|c| c.to_digit(10)).map(|d| d as usize);
    let first = digit(0)?;
    if let Some(second) = digit(1) {
        let two = first * 10 + second;
        if (1..=groups).contains(&two) {
            return Some((two, 2));
        }
    }
    (1..=groups).contains(&first).then_some((first, 1))
}
