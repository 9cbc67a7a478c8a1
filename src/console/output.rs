//! Classification of the analysis process's stdout.
//!
//! The analysis program speaks plain text. Two literal markers carry structure:
//! a capture marker followed by a screenshot path, and a decision marker
//! followed by a Python dict literal. Everything else is a log line.

use super::models::file_basename;

/// Printed after a screenshot has been written to the capture directory.
pub const CAPTURE_MARKER: &str = "截圖完成，路徑：";

/// Printed before the decision dict.
pub const DECISION_MARKER: &str = "機器人決策:";

#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// Plain text to relay as a `log` event.
    Log(String),
    /// Basename of a freshly captured screenshot.
    ScreenshotProduced(String),
    /// Parsed decision object.
    Decision(serde_json::Value),
    /// A decision line whose payload could not be parsed. Logged, never relayed.
    MalformedDecision { payload: String, error: String },
}

/// Classify one stdout line. Blank lines yield `None`.
pub fn classify_stdout_line(line: &str) -> Option<OutputLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((_, path)) = trimmed.split_once(CAPTURE_MARKER) {
        return Some(OutputLine::ScreenshotProduced(
            file_basename(path).to_string(),
        ));
    }

    if let Some((_, payload)) = trimmed.split_once(DECISION_MARKER) {
        let payload = payload.trim();
        return Some(match parse_decision(payload) {
            Ok(value) => OutputLine::Decision(value),
            Err(error) => OutputLine::MalformedDecision {
                payload: payload.to_string(),
                error,
            },
        });
    }

    Some(OutputLine::Log(trimmed.to_string()))
}

fn parse_decision(payload: &str) -> Result<serde_json::Value, String> {
    let json = normalize_dict_literal(payload);
    match serde_json::from_str::<serde_json::Value>(&json) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(other) => Err(format!("expected an object, got {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

/// Rewrite a Python dict literal into JSON text.
///
/// Single-quoted strings become double-quoted (inner `"` escaped, `\'`
/// unescaped); bare `True`, `False` and `None` outside strings become
/// `true`, `false` and `null`. Anything else passes through unchanged, so
/// input that is not a simple literal still fails to parse as JSON.
pub fn normalize_dict_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(next) => {
                                out.push('\\');
                                out.push(next);
                            }
                            None => out.push('\\'),
                        },
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            '"' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    out.push(c);
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(next) = chars.next() {
                                out.push(next);
                            }
                        }
                        _ => {}
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            other => out.push(other),
        }
    }
    out
}
