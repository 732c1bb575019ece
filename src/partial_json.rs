//! Incremental reader for a streamed JSON answer.
//!
//! The provider streams the response object as raw text. Long before the text is
//! parseable JSON the user should already see the `message` field growing, so
//! the accumulator digs that one string out of the partial buffer and decodes
//! its escapes. Once the stream ends the whole buffer is parsed and the
//! structured object replaces the partial view.

use regex::Regex;

use crate::errors::AppError;
use crate::models::{ClientResponse, LlmResponse};

/// What can be shown while the answer is still arriving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialResponse {
    pub message: Option<String>,
    pub is_final_answer: Option<bool>,
}

/// Accumulates streamed text (or bytes) of a single answer.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    buffer: String,
    /// Tail of a UTF-8 sequence split across network chunks.
    pending: Vec<u8>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Appends raw bytes, holding back an incomplete trailing UTF-8 sequence.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                self.buffer
                    .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                self.pending.drain(..valid);
            }
            Err(_) => {
                self.buffer
                    .push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.clear();
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_empty()
    }

    pub fn visible_message(&self) -> Option<String> {
        extract_string_field(&self.buffer, "message")
    }

    pub fn partial(&self) -> PartialResponse {
        PartialResponse {
            message: self.visible_message(),
            is_final_answer: extract_bool_field(&self.buffer, "is_final_answer"),
        }
    }

    /// Parses the complete buffer into the structured answer.
    pub fn finish(&self) -> Result<LlmResponse, AppError> {
        let mut text = self.buffer.clone();
        if !self.pending.is_empty() {
            text.push_str(&String::from_utf8_lossy(&self.pending));
        }
        parse_llm_json(&text)
    }
}

/// Parses a complete model answer, tolerating a Markdown code fence and a bare
/// `client_response` object.
pub fn parse_llm_json(text: &str) -> Result<LlmResponse, AppError> {
    let cleaned = strip_code_fence(text);
    if cleaned.is_empty() {
        return Err(AppError::InvalidLlmResponse(
            "empty response from LLM".to_string(),
        ));
    }

    match serde_json::from_str::<LlmResponse>(cleaned) {
        Ok(response) => Ok(response),
        Err(full_err) => match serde_json::from_str::<ClientResponse>(cleaned) {
            Ok(client_response) => Ok(LlmResponse {
                client_response,
                hidden_analysis: None,
            }),
            Err(_) => Err(AppError::InvalidLlmResponse(format!(
                "Invalid JSON response from AI: {}",
                full_err
            ))),
        },
    }
}

/// Removes a surrounding ```` ```lang ```` fence if the model added one.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Returns the decoded value of `"field": "..."`, even if the string is not
/// closed yet.
pub fn extract_string_field(text: &str, field: &str) -> Option<String> {
    let re = Regex::new(&format!(r#""{}"\s*:\s*""#, regex::escape(field))).ok()?;
    let found = re.find(text)?;
    let (value, _closed) = decode_partial_string(&text[found.end()..]);
    Some(value)
}

fn extract_bool_field(text: &str, field: &str) -> Option<bool> {
    let re = Regex::new(&format!(r#""{}"\s*:\s*(true|false)"#, regex::escape(field))).ok()?;
    let caps = re.captures(text)?;
    Some(&caps[1] == "true")
}

/// Decodes JSON string content starting right after the opening quote.
///
/// Returns the decoded prefix and whether the closing quote was seen. An escape
/// sequence cut off at the end of input is left out until more text arrives.
fn decode_partial_string(input: &str) -> (String, bool) {
    let mut out = String::new();
    let mut chars = input.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return (out, true),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    return (out, false);
                };
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{0008}'),
                    'f' => out.push('\u{000C}'),
                    'u' => {
                        let start = idx + 2;
                        let Some(code) = read_hex4(input, start) else {
                            return (out, false);
                        };
                        for _ in 0..4 {
                            chars.next();
                        }

                        if (0xD800..0xDC00).contains(&code) {
                            // High surrogate: the low half must follow as \uXXXX.
                            let low_start = start + 4;
                            if input.len() < low_start + 6 {
                                return (out, false);
                            }
                            let low = if input[low_start..].starts_with("\\u") {
                                read_hex4(input, low_start + 2)
                            } else {
                                None
                            };
                            match low {
                                Some(low) if (0xDC00..0xE000).contains(&low) => {
                                    let combined =
                                        0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                                    out.push(
                                        char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER),
                                    );
                                    for _ in 0..6 {
                                        chars.next();
                                    }
                                }
                                _ => out.push(char::REPLACEMENT_CHARACTER),
                            }
                        } else {
                            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                        }
                    }
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }

    (out, false)
}

fn read_hex4(input: &str, start: usize) -> Option<u32> {
    let digits = input.get(start..start + 4)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
