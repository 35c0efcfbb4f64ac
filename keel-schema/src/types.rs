//! SQL type spelling normalization.
//!
//! The catalog reports types the way `format_type()` prints them
//! (`character varying`, `timestamp with time zone`, ...) while declarative
//! schemas may use any alias (`varchar(255)`, `timestamptz`, `int4`). Both
//! sides go through [`SqlType::parse`] so that the differ can compare plain
//! strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed SQL type: base name plus its type modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SqlType {
    /// Canonical base name, including any `[]` array suffix.
    pub base: String,
    /// Maximum length for character types.
    pub character_maximum_length: Option<i32>,
    /// Precision for `numeric`.
    pub numeric_precision: Option<i32>,
    /// Scale for `numeric`.
    pub numeric_scale: Option<i32>,
    /// Fractional seconds precision for time and timestamp types.
    pub datetime_precision: Option<i32>,
}

impl SqlType {
    /// Create a type without modifiers.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            ..Default::default()
        }
    }

    /// Parse any PostgreSQL type spelling into its canonical form.
    pub fn parse(raw: &str) -> Self {
        let mut text = raw.trim().to_string();

        let mut array_suffix = String::new();
        while let Some(stripped) = text.strip_suffix("[]") {
            array_suffix.push_str("[]");
            text = stripped.trim_end().to_string();
        }

        // Quoted identifiers (user-defined types) keep their case.
        if text.starts_with('"') && text.ends_with('"') && text.len() > 1 {
            let inner = &text[1..text.len() - 1];
            return Self::new(format!("{inner}{array_suffix}"));
        }

        let (name, args) = split_modifiers(&text);
        let name = collapse_whitespace(&name.to_lowercase());
        let base = canonical_name(&name);

        let mut ty = Self::new(base);
        match ty.base.as_str() {
            "character varying" | "character" | "bit" | "bit varying" => {
                ty.character_maximum_length = args.first().copied();
                if ty.base == "character" && ty.character_maximum_length.is_none() {
                    ty.character_maximum_length = Some(1);
                }
            }
            "numeric" => {
                ty.numeric_precision = args.first().copied();
                if ty.numeric_precision.is_some() {
                    ty.numeric_scale = Some(args.get(1).copied().unwrap_or(0));
                }
            }
            "timestamp without time zone"
            | "timestamp with time zone"
            | "time without time zone"
            | "time with time zone"
            | "interval" => {
                ty.datetime_precision = args.first().copied();
            }
            _ => {}
        }
        ty.base.push_str(&array_suffix);
        ty
    }

    /// Whether this is one of the serial pseudo-types.
    pub fn is_serial(&self) -> bool {
        matches!(self.base.as_str(), "serial" | "bigserial" | "smallserial")
    }

    /// Render the full type, modifiers included, as `format_type()` would.
    pub fn render(&self) -> String {
        let (element, arrays) = match self.base.find("[]") {
            Some(pos) => (&self.base[..pos], &self.base[pos..]),
            None => (self.base.as_str(), ""),
        };

        let modifiers = if let Some(len) = self.character_maximum_length {
            Some(format!("({len})"))
        } else if let Some(precision) = self.numeric_precision {
            Some(format!("({},{})", precision, self.numeric_scale.unwrap_or(0)))
        } else {
            self.datetime_precision.map(|p| format!("({p})"))
        };

        let rendered = match modifiers {
            None => element.to_string(),
            Some(m) => match element.split_once(" with") {
                // timestamp(3) with time zone
                Some((head, tail)) => format!("{head}{m} with{tail}"),
                None => format!("{element}{m}"),
            },
        };
        format!("{rendered}{arrays}")
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Split `varchar(255)` / `timestamp(3) with time zone` into the name without
/// parentheses and the numeric modifiers.
fn split_modifiers(text: &str) -> (String, Vec<i32>) {
    let Some(open) = text.find('(') else {
        return (text.to_string(), Vec::new());
    };
    let Some(close) = text[open..].find(')').map(|i| open + i) else {
        return (text.to_string(), Vec::new());
    };

    let args = text[open + 1..close]
        .split(',')
        .filter_map(|a| a.trim().parse::<i32>().ok())
        .collect();
    let name = format!("{} {}", text[..open].trim_end(), text[close + 1..].trim_start());
    (name.trim().to_string(), args)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map an alias to the name `format_type()` prints.
fn canonical_name(name: &str) -> String {
    let canonical = match name {
        "int" | "int4" | "integer" => "integer",
        "int2" | "smallint" => "smallint",
        "int8" | "bigint" => "bigint",
        "serial" | "serial4" => "serial",
        "bigserial" | "serial8" => "bigserial",
        "smallserial" | "serial2" => "smallserial",
        "float4" | "real" => "real",
        "float" | "float8" | "double precision" => "double precision",
        "decimal" | "numeric" => "numeric",
        "varchar" | "character varying" => "character varying",
        "char" | "character" | "bpchar" => "character",
        "varbit" | "bit varying" => "bit varying",
        "bool" | "boolean" => "boolean",
        "timestamp" | "timestamp without time zone" => "timestamp without time zone",
        "timestamptz" | "timestamp with time zone" => "timestamp with time zone",
        "time" | "time without time zone" => "time without time zone",
        "timetz" | "time with time zone" => "time with time zone",
        other => other,
    };
    canonical.to_string()
}
