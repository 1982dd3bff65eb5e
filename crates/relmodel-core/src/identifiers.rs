//! SQL identifier quoting, validation and default naming.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result, SchemaError, SchemaErrorKind};

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use relmodel_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|_| unreachable!())
    })
}

/// Check that `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// `what` names the kind of identifier for the error message.
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::Schema(SchemaError {
            kind: SchemaErrorKind::InvalidIdentifier,
            message: format!("invalid {what} identifier '{name}'"),
        }))
    }
}

/// Convert PascalCase to snake_case.
///
/// - `User` -> `user`
/// - `TeamMember` -> `team_member`
/// - `HTTPServer` -> `http_server`
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                // word boundary, or last capital of an acronym followed by a word
                let should_underscore = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));

                if should_underscore {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}
