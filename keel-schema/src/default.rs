//! Column default expressions.
//!
//! A default is compared by the hash of its normalized text, so that
//! `'active'::character varying` and `'active'` are the same value. Defaults
//! built from non-deterministic functions are marked volatile and hash their
//! literal text instead.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Functions whose value changes between evaluations.
pub const VOLATILE_FUNCTIONS: &[&str] = &[
    "now(",
    "current_timestamp",
    "clock_timestamp(",
    "random(",
    "gen_random_uuid(",
    "uuid_generate_v4(",
    "nextval(",
    "statement_timestamp(",
    "transaction_timestamp(",
    "timeofday(",
    "localtimestamp",
    "current_date",
    "current_time",
];

/// A column default expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValue {
    /// The expression as written (or as reported by `pg_get_expr`).
    pub expression: String,
    /// SHA-256 hex digest used for comparison.
    pub hash: String,
    /// Whether the expression is non-deterministic.
    pub volatile: bool,
}

impl DefaultValue {
    /// Build a default from its SQL text.
    pub fn new(expression: impl Into<String>) -> Self {
        let expression = expression.into().trim().to_string();
        let normalized = normalize_expression(&expression);
        let volatile = is_volatile(&normalized);
        let hashed = if volatile {
            expression.as_str()
        } else {
            normalized.as_str()
        };
        Self {
            hash: hash_text(hashed),
            expression,
            volatile,
        }
    }

    /// The normalized expression text.
    pub fn normalized(&self) -> String {
        normalize_expression(&self.expression)
    }
}

/// Whether a normalized expression calls a volatile function.
pub fn is_volatile(normalized: &str) -> bool {
    let text = normalized.to_lowercase();
    VOLATILE_FUNCTIONS.iter().any(|f| text.contains(f))
}

/// Normalize a default expression.
///
/// Type casts (`::type`) outside string literals are removed, text outside
/// literals is lower-cased with whitespace collapsed, redundant outer
/// parentheses are dropped and `current_timestamp` is spelled `now()`.
pub fn normalize_expression(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.trim().chars().peekable();
    let mut in_literal = false;
    let mut last_space = false;

    while let Some(c) = chars.next() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    in_literal = false;
                }
            }
            continue;
        }

        match c {
            '\'' => {
                in_literal = true;
                last_space = false;
                out.push(c);
            }
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                skip_cast_target(&mut chars);
            }
            c if c.is_whitespace() => {
                if !last_space && !out.is_empty() {
                    out.push(' ');
                    last_space = true;
                }
            }
            c => {
                last_space = false;
                out.extend(c.to_lowercase());
            }
        }
    }

    let mut normalized = out.trim().to_string();
    while is_wrapped(&normalized) {
        normalized = normalized[1..normalized.len() - 1].trim().to_string();
    }

    if normalized == "current_timestamp" {
        normalized = "now()".to_string();
    }
    normalized
}

/// Skip a cast target such as `character varying` or `timestamp(3) with time zone`.
fn skip_cast_target(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
    let mut depth = 0usize;
    while let Some(&c) = chars.peek() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => break,
            ')' => depth -= 1,
            ',' if depth == 0 => break,
            ':' if depth == 0 => break,
            c if c.is_whitespace() && depth == 0 => {
                // Multi-word type names continue with a known keyword.
                let rest: String = chars.clone().skip(1).take(12).collect();
                let rest = rest.to_lowercase();
                let continues = ["varying", "precision", "with", "without", "time", "zone"]
                    .iter()
                    .any(|kw| rest.starts_with(kw));
                if !continues {
                    break;
                }
            }
            _ => {}
        }
        chars.next();
    }
}

fn is_wrapped(s: &str) -> bool {
    if !(s.starts_with('(') && s.ends_with(')')) {
        return false;
    }
    let mut depth = 0i32;
    let mut in_literal = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// SHA-256 hex digest of a string.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
