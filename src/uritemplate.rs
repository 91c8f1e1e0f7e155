//! RFC 6570 Level-1 URI Template subset (component I), used to expand OCI
//! repository name templates like `{namespace}/{type}`.
//!
//! Level 1 covers only the simple `{var}` expression form: no operators
//! (`+`, `#`, `.`, `/`, `;`, `?`, `&`), no multi-variable lists, no
//! modifiers. Every substituted value is percent-encoded.

use std::collections::HashMap;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Reserved per RFC 3986 `unreserved` set: everything *not* in that set is
/// percent-encoded, matching Level 1's "allow only unreserved characters
/// unescaped" rule.
const UNRESERVED_EXCEPTIONS: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|');

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("level 1 URI templates do not support operator {op:?} at position {pos}")]
    UnsupportedOperator { op: char, pos: usize },

    #[error("{op:?} at position {pos} is a reserved URI template operator and is not supported")]
    ReservedOperator { op: char, pos: usize },

    #[error("unterminated template expression starting at position {pos}")]
    Unterminated { pos: usize },

    #[error("level 4 URI template modifier in {name:?} at position {pos} is not supported")]
    Level4Modifier { name: String, pos: usize },
}

/// Expand every `{var}` expression in `template` using `values`. Literal
/// text outside `{...}` passes through unchanged.
pub fn expand(template: &str, values: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }

        let mut expr = String::new();
        let mut closed = false;
        for (_, c2) in chars.by_ref() {
            if c2 == '}' {
                closed = true;
                break;
            }
            expr.push(c2);
        }
        if !closed {
            return Err(TemplateError::Unterminated { pos });
        }

        if let Some(op) = expr.chars().next() {
            if "+#./;?&".contains(op) {
                return Err(TemplateError::UnsupportedOperator { op, pos });
            }
            if "=,!@|".contains(op) {
                return Err(TemplateError::ReservedOperator { op, pos });
            }
        }

        let name = expr.trim();
        if name.contains(':') || name.ends_with('*') {
            return Err(TemplateError::Level4Modifier {
                name: name.to_string(),
                pos,
            });
        }
        // Level 1: an undefined variable expands to the empty string.
        if let Some(value) = values.get(name) {
            out.push_str(&encode(value));
        }
    }

    Ok(out)
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED_EXCEPTIONS)
        .to_string()
        .to_lowercase_percent_escapes()
}

/// `utf8_percent_encode` uppercases hex digits (`%20`); the OCI templating
/// this is used for is generated from lowercase provider addresses, so
/// lowercase the escape sequences to match the corpus's existing examples
/// (`%2f`, not `%2F`) without touching the rest of the string.
trait LowercasePercentEscapes {
    fn to_lowercase_percent_escapes(self) -> String;
}

impl LowercasePercentEscapes for String {
    fn to_lowercase_percent_escapes(self) -> String {
        let mut out = String::with_capacity(self.len());
        let bytes = self.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 2 < bytes.len() {
                out.push('%');
                out.push((bytes[i + 1] as char).to_ascii_lowercase());
                out.push((bytes[i + 2] as char).to_ascii_lowercase());
                i += 3;
            } else {
                out.push(bytes[i] as char);
                i += 1;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_simple_variable_with_space() {
        let out = expand("{var}", &vars(&[("var", "Hello World!")])).unwrap();
        assert_eq!(out, "Hello%20World%21");
    }

    #[test]
    fn expands_slash_escaped() {
        let out = expand("{var}", &vars(&[("var", "foo/bar")])).unwrap();
        assert_eq!(out, "foo%2fbar");
    }

    #[test]
    fn literal_text_passes_through() {
        let out = expand("prefix-{var}-suffix", &vars(&[("var", "x")])).unwrap();
        assert_eq!(out, "prefix-x-suffix");
    }

    #[test]
    fn rejects_operator_characters() {
        for tmpl in ["{+var}", "{#var}", "{.var}", "{/var}", "{;var}", "{?var}", "{&var}"] {
            let err = expand(tmpl, &vars(&[("var", "x")])).unwrap_err();
            assert!(matches!(err, TemplateError::UnsupportedOperator { .. }));
        }
    }

    #[test]
    fn missing_variable_expands_to_empty_string() {
        let out = expand("prefix-{missing}-suffix", &HashMap::new()).unwrap();
        assert_eq!(out, "prefix--suffix");
    }

    #[test]
    fn reserved_operators_are_diagnosed_separately_from_unsupported_ones() {
        for tmpl in ["{=var}", "{,var}", "{!var}", "{@var}", "{|var}"] {
            let err = expand(tmpl, &vars(&[("var", "x")])).unwrap_err();
            assert!(matches!(err, TemplateError::ReservedOperator { .. }));
        }
    }

    #[test]
    fn unterminated_expression_is_an_error() {
        let err = expand("{var", &vars(&[("var", "x")])).unwrap_err();
        assert!(matches!(err, TemplateError::Unterminated { .. }));
    }

    #[test]
    fn rejects_level_4_modifiers() {
        let err = expand("{var:3}", &vars(&[("var", "x")])).unwrap_err();
        assert!(matches!(err, TemplateError::Level4Modifier { .. }));

        let err = expand("{var*}", &vars(&[("var", "x")])).unwrap_err();
        assert!(matches!(err, TemplateError::Level4Modifier { .. }));
    }

    #[test]
    fn encodes_non_unreserved_ascii_beyond_the_base_exception_set() {
        let out = expand("{var}", &vars(&[("var", "a<b")])).unwrap();
        assert_eq!(out, "a%3cb");
    }
}
