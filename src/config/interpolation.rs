// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Replace every `${NAME}` in `input` with the value of environment
/// variable `NAME`.
///
/// An unterminated or empty reference (`${`, `${}`) stays in the output
/// literally. A well-formed reference to an unset variable is an error.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

/// Same as [`resolve_variables`] with an explicit lookup.
pub fn resolve_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(0) | None => {
                out.push_str("${");
                rest = after;
            }
            Some(end) => {
                let name = &after[..end];
                let value = lookup(name).ok_or_else(|| ConfigError::UndefinedVariable {
                    name: name.to_string(),
                })?;
                out.push_str(&value);
                rest = &after[end + 1..];
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("localhost".into()),
            "PORT" => Some("8080".into()),
            _ => None,
        }
    }

    #[test]
    fn replaces_every_reference() {
        let out = resolve_with("http://${HOST}:${PORT}/v1", lookup).unwrap();
        assert_eq!(out, "http://localhost:8080/v1");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(resolve_with("no variables here", lookup).unwrap(), "no variables here");
    }

    #[test]
    fn unset_variable_is_an_error() {
        let err = resolve_with("key: ${MISSING_KEY}", lookup).unwrap_err();
        match err {
            ConfigError::UndefinedVariable { name } => assert_eq!(name, "MISSING_KEY"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_references_kept_literally() {
        assert_eq!(resolve_with("cost: ${", lookup).unwrap(), "cost: ${");
        assert_eq!(resolve_with("a ${} b", lookup).unwrap(), "a ${} b");
        assert_eq!(resolve_with("$HOST", lookup).unwrap(), "$HOST");
    }

    #[test]
    fn multibyte_text_around_references() {
        let out = resolve_with("héllo ${HOST} wörld", lookup).unwrap();
        assert_eq!(out, "héllo localhost wörld");
    }
}
