//! Glob patterns over logical cache keys.
//!
//! Both backends accept the Redis `MATCH` grammar: `*`, `?`, `[abc]`,
//! `[a-z]`, `[^a]` or `[!a]`, and `\` to escape the next character. Braces
//! are literal; there is no alternation.

use crate::error::{CacheError, CacheResult};
use globset::{GlobBuilder, GlobMatcher};

/// Characters with meaning in a Redis glob.
const META: &[char] = &['*', '?', '[', ']', '\\'];

/// A validated, compiled key pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    matcher: GlobMatcher,
}

impl KeyPattern {
    /// Validate and compile `pattern`.
    pub fn new(pattern: &str) -> CacheResult<Self> {
        let translated = translate(pattern)?;
        let matcher = GlobBuilder::new(&translated)
            .literal_separator(false)
            .backslash_escape(true)
            .build()?
            .compile_matcher();
        Ok(Self {
            raw: pattern.to_string(),
            matcher,
        })
    }

    /// The pattern as written, in Redis syntax.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `key` matches.
    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    /// Whether this pattern matches every key.
    pub fn is_match_all(&self) -> bool {
        !self.raw.is_empty() && self.raw.chars().all(|c| c == '*')
    }
}

/// Escape `literal` so it only matches itself inside a pattern.
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if META.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Rewrite Redis glob syntax into globset syntax.
fn translate(pattern: &str) -> CacheResult<String> {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    let mut after_star = false;

    while let Some(c) = chars.next() {
        // globset gives `**` its own meaning; a run of stars is one star here.
        if c == '*' {
            if !after_star {
                out.push('*');
            }
            after_star = true;
            continue;
        }
        after_star = false;

        match c {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| invalid(pattern, "trailing backslash"))?;
                push_literal(&mut out, escaped);
            }
            '[' => translate_class(pattern, &mut chars, &mut out)?,
            ']' | '{' | '}' => push_literal(&mut out, c),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Characters globset reads specially inside a class, in ascending order.
const CLASS_SPECIALS: [char; 4] = ['!', '-', ']', '^'];

fn translate_class(
    pattern: &str,
    chars: &mut std::str::Chars<'_>,
    out: &mut String,
) -> CacheResult<()> {
    let mut negated = false;
    let mut members: Vec<(char, char)> = Vec::new();
    let mut first = true;

    loop {
        let c = chars
            .next()
            .ok_or_else(|| invalid(pattern, "unterminated character class"))?;
        match c {
            '^' | '!' if first => negated = true,
            ']' => break,
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| invalid(pattern, "trailing backslash"))?;
                members.push((escaped, escaped));
            }
            _ => {
                let mut ahead = chars.clone();
                if ahead.next() == Some('-')
                    && let Some(end) = ahead.next()
                    && end != ']'
                {
                    *chars = ahead;
                    // Redis accepts reversed ranges.
                    members.push((c.min(end), c.max(end)));
                } else {
                    members.push((c, c));
                }
            }
        }
        first = false;
    }

    if members.is_empty() {
        return Err(invalid(pattern, "empty character class"));
    }

    let mut ranges = Vec::with_capacity(members.len());
    let mut specials = Vec::new();
    for (lo, hi) in members {
        split_specials(lo, hi, &mut ranges, &mut specials);
    }
    let has = |c: char| specials.contains(&c);
    let carets: String = ['^', '!'].into_iter().filter(|c| has(*c)).collect();

    // globset reads `]` as a member only first, `-` only first or last,
    // and a leading `!` or `^` as negation.
    let mut body = String::new();
    if has(']') {
        body.push(']');
    }
    for (lo, hi) in ranges {
        body.push(lo);
        if hi != lo {
            body.push('-');
            body.push(hi);
        }
    }
    if negated || !body.is_empty() {
        body.push_str(&carets);
        if has('-') {
            body.push('-');
        }
    } else if has('-') {
        body.push('-');
        body.push_str(&carets);
    } else {
        // Only `^` and `!`: no class can start with them.
        let alternatives: Vec<String> = carets.chars().map(|c| format!("\\{}", c)).collect();
        match alternatives.as_slice() {
            [one] => out.push_str(one),
            _ => {
                out.push('{');
                out.push_str(&alternatives.join(","));
                out.push('}');
            }
        }
        return Ok(());
    }

    out.push('[');
    if negated {
        out.push('!');
    }
    out.push_str(&body);
    out.push(']');
    Ok(())
}

/// Cut the class specials out of `lo..=hi`, leaving plain ranges.
fn split_specials(lo: char, hi: char, ranges: &mut Vec<(char, char)>, specials: &mut Vec<char>) {
    let mut lo = lo;
    for special in CLASS_SPECIALS {
        if special < lo || special > hi {
            continue;
        }
        if !specials.contains(&special) {
            specials.push(special);
        }
        if special > lo {
            ranges.push((lo, (special as u8 - 1) as char));
        }
        lo = (special as u8 + 1) as char;
    }
    if lo <= hi {
        ranges.push((lo, hi));
    }
}

fn push_literal(out: &mut String, c: char) {
    if META.contains(&c) || c == '{' || c == '}' {
        out.push('\\');
    }
    out.push(c);
}

fn invalid(pattern: &str, reason: &str) -> CacheError {
    CacheError::Pattern(format!("{:?}: {}", pattern, reason))
}
