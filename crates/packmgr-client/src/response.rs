//! Response types and parsing.
//!
//! The JSON endpoint answers with a single object:
//!
//! ```text
//! {"success": true, "msg": "Package uploaded", "path": "/etc/packages/g/n-1.0.zip"}
//! ```
//!
//! The console endpoint streams a progress log, one record per line. After
//! HTML tags are stripped and entities decoded, a line is one of:
//!
//! - a terminal status, marked in the raw line by `class="success"` or
//!   `class="error"`; its text becomes the response message and the last one wins
//! - a progress record `<action> <message>`, split at the first whitespace,
//!   where action `E` marks a progress error
//!
//! Blank lines are skipped. Without a terminal status the response is
//! unsuccessful with an empty message.

use crate::command::Keys;
use crate::transport::RawResponse;
use crate::{PackmgrError, Result};
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use futures::StreamExt;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Progress action marking an error line.
pub const ERROR_ACTION: &str = "E";

/// Outcome of a JSON-endpoint command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimpleResponse {
    pub success: bool,
    #[serde(rename = "msg")]
    pub message: String,
    pub path: String,
}

impl std::fmt::Display for SimpleResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{success:{}, msg:{:?}, path:{:?}}}",
            self.success, self.message, self.path
        )
    }
}

/// Outcome of a console-endpoint command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailedResponse {
    pub success: bool,
    #[serde(rename = "msg")]
    pub message: String,
    pub path: String,
    /// Wall-clock time of the whole exchange.
    pub duration: Duration,
    /// Progress lines flagged as errors, in order.
    pub progress_errors: Vec<String>,
}

/// Observer for console progress.
///
/// Purely observational: a listener never changes how a response is parsed.
pub trait ProgressListener: Send + Sync {
    /// Called once per progress record.
    fn on_progress(&self, action: &str, message: &str);

    /// Called for terminal status lines.
    fn on_message(&self, _message: &str) {}
}

impl<F> ProgressListener for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn on_progress(&self, action: &str, message: &str) {
        self(action, message)
    }
}

/// Character encoding declared by the `Content-Type` charset parameter.
pub fn response_encoding(headers: &HeaderMap) -> &'static Encoding {
    let charset = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|content_type| {
            content_type.split(';').skip(1).find_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"').to_string())
            })
        });

    match charset {
        Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            warn!("Unknown response charset {:?}, decoding as UTF-8", label);
            UTF_8
        }),
        None => UTF_8,
    }
}

/// Decode a complete body using the charset declared in `headers`.
pub fn decode_text(headers: &HeaderMap, body: &[u8]) -> String {
    let (text, _, had_errors) = response_encoding(headers).decode(body);
    if had_errors {
        debug!("Response body contained malformed sequences");
    }
    text.into_owned()
}

/// Incremental charset decoder that yields complete lines.
///
/// Multi-byte sequences split across chunks are carried over, so chunk
/// boundaries never corrupt text.
pub struct LineDecoder {
    decoder: Decoder,
    pending: String,
}

impl LineDecoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            pending: String::new(),
        }
    }

    /// Decode `chunk` and hand every completed line to `on_line`, without its
    /// line terminator. With `last` set, the unterminated tail is flushed too.
    pub fn feed(&mut self, chunk: &[u8], last: bool, mut on_line: impl FnMut(&str)) {
        let mut input = chunk;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len() * 3 + 16);
            self.pending.reserve(needed);
            let (result, read, _) = self.decoder.decode_to_string(input, &mut self.pending, last);
            input = &input[read..];
            if matches!(result, CoderResult::InputEmpty) {
                break;
            }
        }

        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            on_line(line.trim_end_matches(['\r', '\n']));
        }

        if last && !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            on_line(tail.trim_end_matches('\r'));
        }
    }
}

/// Map a non-2xx status to its protocol failure.
pub fn check_status(status: u16, status_text: &str) -> Result<()> {
    if status == 400 {
        Err(PackmgrError::CommandNotSupported)
    } else if status / 100 != 2 {
        Err(PackmgrError::UnexpectedStatus {
            status,
            reason: status_text.to_string(),
        })
    } else {
        Ok(())
    }
}

fn string_field(json: &serde_json::Map<String, Value>, key: &str) -> String {
    match json.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn bool_field(json: &serde_json::Map<String, Value>, key: &str) -> bool {
    match json.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Parse a JSON-endpoint response.
///
/// Missing keys default to `false`/empty; a body that is not a JSON object is
/// an error, never an empty response.
pub fn parse_simple_response(status: u16, status_text: &str, body: &str) -> Result<SimpleResponse> {
    check_status(status, status_text)?;

    let json = match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => map,
        other => {
            return Err(PackmgrError::InvalidResponse {
                message: format!("expected a JSON object, got {}", json_kind(&other)),
                source: None,
            })
        }
    };

    Ok(SimpleResponse {
        success: bool_field(&json, Keys::SUCCESS),
        message: string_field(&json, Keys::MESSAGE),
        path: string_field(&json, Keys::PATH),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One classified console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    Progress { action: String, message: String },
    Status { success: bool, message: String },
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn strip_tags(line: &str) -> String {
    let mut text = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}

/// Classify one raw console line; blank lines yield `None`.
pub fn parse_console_line(raw: &str) -> Option<ConsoleLine> {
    let text = decode_entities(&strip_tags(raw));
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if raw.contains("class=\"success\"") {
        return Some(ConsoleLine::Status {
            success: true,
            message: text.to_string(),
        });
    }
    if raw.contains("class=\"error\"") {
        return Some(ConsoleLine::Status {
            success: false,
            message: text.to_string(),
        });
    }

    let (action, message) = match text.split_once(char::is_whitespace) {
        Some((action, message)) => (action, message.trim()),
        None => (text, ""),
    };
    Some(ConsoleLine::Progress {
        action: action.to_string(),
        message: message.to_string(),
    })
}

/// Accumulates a [`DetailedResponse`] from console lines as they arrive.
pub struct DetailedParser<'a> {
    response: DetailedResponse,
    listener: Option<&'a dyn ProgressListener>,
}

impl<'a> DetailedParser<'a> {
    pub fn new(path: &str, listener: Option<&'a dyn ProgressListener>) -> Self {
        Self {
            response: DetailedResponse {
                path: path.to_string(),
                ..Default::default()
            },
            listener,
        }
    }

    pub fn feed_line(&mut self, line: &str) {
        match parse_console_line(line) {
            Some(ConsoleLine::Progress { action, message }) => {
                if action == ERROR_ACTION {
                    let text = format!("{} {}", action, message);
                    self.response.progress_errors.push(text.trim_end().to_string());
                }
                if let Some(listener) = self.listener {
                    listener.on_progress(&action, &message);
                }
            }
            Some(ConsoleLine::Status { success, message }) => {
                if let Some(listener) = self.listener {
                    listener.on_message(&message);
                }
                self.response.success = success;
                self.response.message = message;
            }
            None => {}
        }
    }

    /// `duration` is left for the caller, which owns the clock for the whole exchange.
    pub fn finish(self) -> DetailedResponse {
        self.response
    }
}

/// Parse a fully-read console-endpoint response.
pub fn parse_detailed_response(
    status: u16,
    status_text: &str,
    body: &str,
    path: &str,
    listener: Option<&dyn ProgressListener>,
) -> Result<DetailedResponse> {
    check_status(status, status_text)?;

    let mut parser = DetailedParser::new(path, listener);
    for line in body.lines() {
        parser.feed_line(line);
    }
    Ok(parser.finish())
}

/// Read and parse a JSON-endpoint response.
pub async fn read_simple_response(response: RawResponse) -> Result<SimpleResponse> {
    let status = response.status.as_u16();
    let reason = response.reason().to_string();
    check_status(status, &reason)?;

    let headers = response.headers.clone();
    let body = response.bytes().await?;
    parse_simple_response(status, &reason, &decode_text(&headers, &body))
}

/// Read a console-endpoint response, parsing and notifying `listener` as
/// each line arrives.
pub async fn read_detailed_response(
    response: RawResponse,
    path: &str,
    listener: Option<&dyn ProgressListener>,
) -> Result<DetailedResponse> {
    check_status(response.status.as_u16(), response.reason())?;

    let mut lines = LineDecoder::new(response_encoding(&response.headers));
    let mut parser = DetailedParser::new(path, listener);
    let mut body = response.body;

    while let Some(chunk) = body.next().await {
        lines.feed(&chunk?, false, |line| parser.feed_line(line));
    }
    lines.feed(&[], true, |line| parser.feed_line(line));

    Ok(parser.finish())
}
