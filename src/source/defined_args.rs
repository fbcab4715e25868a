//! Static extraction of a strategy's `definedArgs` declaration
//!
//! Strategies declare the arguments they accept with an array literal:
//!
//! ```text
//! export const definedArgs: DefinedArg[] = [
//!   { key: 'symbol', defaultValue: 'BTC/USDT', options: ['BTC/USDT', 'ETH/USDT'] },
//!   { key: 'size', defaultValue: 0.5 }, // trailing commas and comments are fine
//! ];
//! ```
//!
//! The literal is never executed. It is rewritten to JSON (quoting bare keys,
//! normalizing quotes, dropping comments and trailing commas) and then
//! deserialized. Anything that needs evaluation is rejected with
//! `ParseWarning`.

use crate::domain::StrategyDefinedArg;
use crate::error::{KeeperError, Result};

const DECLARATION: &str = "definedArgs";

fn warning(msg: impl Into<String>) -> KeeperError {
    KeeperError::ParseWarning(msg.into())
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Index of the next byte that is neither whitespace nor inside a comment
fn skip_trivia(bytes: &[u8], mut i: usize) -> usize {
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match (bytes.get(i), bytes.get(i + 1)) {
            (Some(b'/'), Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            (Some(b'/'), Some(b'*')) => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            _ => return i,
        }
    }
}

fn is_assignment(bytes: &[u8], i: usize) -> bool {
    bytes.get(i) == Some(&b'=') && !matches!(bytes.get(i + 1), Some(b'=') | Some(b'>'))
}

/// Byte offset of the `[` opening the declared array, if any
fn find_declaration(source: &str, is_typescript: bool) -> Result<Option<usize>> {
    let bytes = source.as_bytes();
    let mut from = 0;

    while let Some(pos) = source[from..].find(DECLARATION) {
        let at = from + pos;
        let end = at + DECLARATION.len();
        from = end;

        if (at > 0 && is_ident(bytes[at - 1])) || bytes.get(end).copied().is_some_and(is_ident) {
            continue;
        }

        let mut i = skip_trivia(bytes, end);
        if is_typescript && bytes.get(i) == Some(&b':') {
            // type annotation: `definedArgs: Arg[] = [...]`
            i += 1;
            while i < bytes.len() && !is_assignment(bytes, i) && bytes[i] != b';' {
                i += 1;
            }
        }
        if !is_assignment(bytes, i) {
            continue;
        }

        let value = skip_trivia(bytes, i + 1);
        return match bytes.get(value) {
            Some(b'[') => Ok(Some(value)),
            _ => Err(warning("definedArgs is not assigned an array literal")),
        };
    }

    Ok(None)
}

/// End (exclusive) of a quoted string starting at `start`
fn string_end(bytes: &[u8], start: usize) -> Result<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Ok(i + 1),
            b'$' if quote == b'`' && bytes.get(i + 1) == Some(&b'{') => {
                return Err(warning("template literals with substitutions are not supported"));
            }
            _ => i += 1,
        }
    }
    Err(warning("unterminated string literal"))
}

/// End (exclusive) of the bracketed literal starting at `start`
fn literal_end(bytes: &[u8], start: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        let next = skip_trivia(bytes, i);
        if next != i {
            i = next;
            continue;
        }
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = string_end(bytes, i)?;
                continue;
            }
            b'[' | b'{' | b'(' => depth += 1,
            b']' | b'}' | b')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| warning("unbalanced brackets"))?;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(warning("definedArgs array is not closed"))
}

/// Re-quote a JS string literal (without its quotes) as a JSON string
fn push_json_string(out: &mut String, raw: &str, quote: u8) {
    out.push('"');
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some('`') => out.push('`'),
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => out.push_str("\\\\"),
            },
            '"' if quote != b'"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn push_number(out: &mut String, token: &str) -> Result<()> {
    let cleaned = token.replace('_', "");
    if let Ok(n) = cleaned.parse::<i64>() {
        out.push_str(&n.to_string());
        return Ok(());
    }
    let n = cleaned
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .ok_or_else(|| warning(format!("unsupported number literal {}", token)))?;
    out.push_str(&n.to_string());
    Ok(())
}

/// Rewrite a JS array/object literal as JSON text
fn literal_to_json(literal: &str) -> Result<String> {
    let bytes = literal.as_bytes();
    let mut out = String::with_capacity(literal.len());
    let mut i = 0;

    while i < bytes.len() {
        let next = skip_trivia(bytes, i);
        if next != i {
            out.push(' ');
            i = next;
            continue;
        }

        let b = bytes[i];
        match b {
            b'[' | b']' | b'{' | b'}' | b':' => {
                out.push(b as char);
                i += 1;
            }
            b',' => {
                let after = skip_trivia(bytes, i + 1);
                if !matches!(bytes.get(after), Some(b']') | Some(b'}')) {
                    out.push(',');
                }
                i += 1;
            }
            b'\'' | b'"' | b'`' => {
                let end = string_end(bytes, i)?;
                push_json_string(&mut out, &literal[i + 1..end - 1], b);
                i = end;
            }
            b'-' | b'+' | b'.' | b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'.' | b'_'))
                {
                    // exponent sign
                    if matches!(bytes[i], b'e' | b'E') && matches!(bytes.get(i + 1), Some(b'-') | Some(b'+')) {
                        i += 1;
                    }
                    i += 1;
                }
                push_number(&mut out, &literal[start..i])?;
            }
            b if is_ident_start(b) => {
                let start = i;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                let ident = &literal[start..i];
                let is_key = bytes.get(skip_trivia(bytes, i)) == Some(&b':');
                match ident {
                    _ if is_key => {
                        out.push('"');
                        out.push_str(ident);
                        out.push('"');
                    }
                    "true" | "false" | "null" => out.push_str(ident),
                    "undefined" => out.push_str("null"),
                    other => {
                        return Err(warning(format!(
                            "definedArgs references `{}`, which needs evaluation",
                            other
                        )))
                    }
                }
            }
            other => {
                return Err(warning(format!(
                    "unexpected character `{}` in definedArgs",
                    other as char
                )))
            }
        }
    }

    Ok(out)
}

/// Extract the arguments a strategy declares.
///
/// `Ok(None)` when the source has no `definedArgs` declaration.
pub fn parse_defined_args(
    source: &str,
    is_typescript: bool,
) -> Result<Option<Vec<StrategyDefinedArg>>> {
    let Some(start) = find_declaration(source, is_typescript)? else {
        return Ok(None);
    };
    let end = literal_end(source.as_bytes(), start)?;
    let json = literal_to_json(&source[start..end])?;

    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| warning(format!("definedArgs has an unexpected shape: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typescript_declaration() {
        let source = r#"
import { Strategy } from './lib';

// tunables
export const definedArgs: DefinedArg[] = [
  { key: 'symbol', defaultValue: 'BTC/USDT', options: ['BTC/USDT', "ETH/USDT"] },
  /* leverage */ { key: "leverage", defaultValue: 5, mode: 'runtime', },
  { key: 'ratio', defaultValue: -0.25e-1, label: `Ratio` },
];

export default class Grid extends Strategy {}
"#;
        let args = parse_defined_args(source, true).unwrap().unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].key, "symbol");
        assert_eq!(args[0].default_value, json!("BTC/USDT"));
        assert_eq!(args[0].options, Some(vec![json!("BTC/USDT"), json!("ETH/USDT")]));
        assert_eq!(args[1].default_value, json!(5));
        assert_eq!(args[1].mode.as_deref(), Some("runtime"));
        assert_eq!(args[2].default_value, json!(-0.025));
        assert_eq!(args[2].label.as_deref(), Some("Ratio"));
    }

    #[test]
    fn test_javascript_exports_and_escapes() {
        let source = "module.exports.definedArgs = [{ key: 'note', defaultValue: 'it\\'s \"fine\"', enabled: true }];";
        let args = parse_defined_args(source, false).unwrap().unwrap();
        assert_eq!(args[0].default_value, json!("it's \"fine\""));
    }

    #[test]
    fn test_no_declaration() {
        let source = "const x = 1;\nfunction run(definedArgsLike) { return definedArgs; }";
        assert_eq!(parse_defined_args(source, false).unwrap(), None);
    }

    #[test]
    fn test_rejects_expressions() {
        for source in [
            "const definedArgs = buildArgs();",
            "const definedArgs = [{ key: 'a', defaultValue: DEFAULT_SIZE }];",
            "const definedArgs = [{ key: `a${b}` }];",
            "const definedArgs = [{ key: 'a' }",
            "const definedArgs = [{ name: 'missing key' }];",
        ] {
            let err = parse_defined_args(source, false).unwrap_err();
            assert!(matches!(err, KeeperError::ParseWarning(_)), "{source}: {err}");
        }
    }

    #[test]
    fn test_comparison_is_not_a_declaration() {
        let source = "if (definedArgs == null) {}\nconst definedArgs = [];";
        assert_eq!(parse_defined_args(source, false).unwrap(), Some(vec![]));
    }
}
