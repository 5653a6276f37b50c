//! Reply decoding
//!
//! A reply is script text: an anti-hijacking preamble, a reply marker,
//! then one statement per call such as
//! `dwr.engine.remote.handleCallback("1","0",{...});`. The text is never
//! executed. The decoder finds the marker, locates the known handler
//! statements and parses their arguments with the literal grammar.

use crate::error::{RenfeError, Result};
use crate::protocol::literal::{Parser, Value};

/// Sentinels that frame a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    /// Marker that precedes the reply statements
    pub reply_marker: String,
    /// Handler carrying a call's return value: `(batchId, callId, value)`
    pub callback: String,
    /// Handler carrying a call's exception: `(batchId, callId, error)`
    pub exception: String,
    /// Handler for a failure of the whole batch: `(batchId?, error)`
    pub batch_exception: String,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            reply_marker: "//#DWR-REPLY".to_string(),
            callback: "handleCallback".to_string(),
            exception: "handleException".to_string(),
            batch_exception: "handleBatchException".to_string(),
        }
    }
}

impl Framing {
    /// Check that every sentinel is non-empty.
    ///
    /// # Errors
    /// Returns `RenfeError::Config` naming the first empty sentinel.
    pub fn validate(&self) -> Result<()> {
        let sentinels = [
            ("reply_marker", &self.reply_marker),
            ("callback", &self.callback),
            ("exception", &self.exception),
            ("batch_exception", &self.batch_exception),
        ];
        for (name, value) in sentinels {
            if value.trim().is_empty() {
                return Err(RenfeError::Config(format!("framing sentinel {} is empty", name)));
            }
        }
        Ok(())
    }
}

/// Outcome of one remote call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Data(Value),
    Exception {
        /// Server-side exception class, when reported
        class: Option<String>,
        message: Option<String>,
    },
}

/// Reply to one call of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct CallReply {
    pub batch_id: String,
    /// `None` for batch-level exceptions
    pub call_id: Option<String>,
    pub outcome: CallOutcome,
}

impl CallOutcome {
    /// Whether the exception reports an invalid or expired session
    pub fn is_session_failure(&self) -> bool {
        let CallOutcome::Exception { class, message } = self else {
            return false;
        };
        [class, message].into_iter().flatten().any(|text| {
            let text = text.to_ascii_lowercase();
            text.contains("session") || text.contains("sesion") || text.contains("sesión")
        })
    }
}

enum Handler {
    Callback,
    Exception,
    BatchException,
}

/// Decode every handler statement of a reply.
///
/// # Errors
/// `RenfeError::Protocol` when the marker is missing, no handler statement
/// is present, or an argument falls outside the literal grammar.
/// `RenfeError::Config` when a framing sentinel is empty.
pub fn decode_reply(text: &str, framing: &Framing) -> Result<Vec<CallReply>> {
    framing.validate()?;
    let start = text
        .find(&framing.reply_marker)
        .ok_or_else(|| RenfeError::protocol("reply marker missing", text.len()))?;
    let body = &text[start + framing.reply_marker.len()..];

    let mut replies = Vec::new();
    let mut offset = 0;
    while let Some((at, name_len, handler)) = next_handler(&body[offset..], framing) {
        let args_start = offset + at + name_len;
        let mut parser = Parser::new(&body[args_start..]);
        let reply = parse_handler(&mut parser, handler)?;
        replies.push(reply);
        offset = args_start + parser.position();
    }

    if replies.is_empty() {
        return Err(RenfeError::protocol("no reply statement", body.len()));
    }
    Ok(replies)
}

/// Decode a reply and return the outcome of call `call_id` in batch
/// `batch_id`.
///
/// A batch-level exception without a batch id applies to any batch.
///
/// # Errors
/// `RenfeError::Protocol` when the reply only answers other batches or
/// other calls.
pub fn decode_call(
    text: &str,
    framing: &Framing,
    batch_id: u32,
    call_id: &str,
) -> Result<CallOutcome> {
    let replies = decode_reply(text, framing)?;
    let len = text.len();
    let batch_id = batch_id.to_string();
    let in_batch = |r: &CallReply| {
        r.batch_id == batch_id || (r.call_id.is_none() && r.batch_id.is_empty())
    };
    if !replies.iter().any(|r| in_batch(r)) {
        return Err(RenfeError::protocol("reply for a different batch", len));
    }
    replies
        .into_iter()
        .filter(|r| in_batch(r))
        .find(|r| r.call_id.as_deref().map_or(true, |id| id == call_id))
        .map(|r| r.outcome)
        .ok_or_else(|| RenfeError::protocol("no reply for call", len))
}

/// Find the earliest handler call in `text`, requiring an identifier
/// boundary before the name and `(` after it.
fn next_handler(text: &str, framing: &Framing) -> Option<(usize, usize, Handler)> {
    let candidates = [
        (framing.batch_exception.as_str(), Handler::BatchException),
        (framing.exception.as_str(), Handler::Exception),
        (framing.callback.as_str(), Handler::Callback),
    ];
    let mut best: Option<(usize, usize, Handler)> = None;
    for (name, handler) in candidates {
        if let Some(at) = find_call(text, name) {
            if best.as_ref().map_or(true, |(b, _, _)| at < *b) {
                best = Some((at, name.len(), handler));
            }
        }
    }
    best
}

fn find_call(text: &str, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(rel) = text[from..].find(name) {
        let at = from + rel;
        let before_ok = text[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'));
        let after_ok = text[at + name.len()..].trim_start().starts_with('(');
        if before_ok && after_ok {
            return Some(at);
        }
        from = at + name.len();
    }
    None
}

fn parse_handler(parser: &mut Parser<'_>, handler: Handler) -> Result<CallReply> {
    parser.expect('(')?;
    let reply = match handler {
        Handler::Callback => {
            let batch_id = string_arg(parser)?;
            parser.expect(',')?;
            let call_id = string_arg(parser)?;
            parser.expect(',')?;
            let value = parser.parse_value()?;
            CallReply {
                batch_id,
                call_id: Some(call_id),
                outcome: CallOutcome::Data(value),
            }
        }
        Handler::Exception => {
            let batch_id = string_arg(parser)?;
            parser.expect(',')?;
            let call_id = string_arg(parser)?;
            parser.expect(',')?;
            let error = parser.parse_value()?;
            CallReply {
                batch_id,
                call_id: Some(call_id),
                outcome: exception_outcome(&error),
            }
        }
        Handler::BatchException => {
            let first = parser.parse_value()?;
            let (batch_id, error) = if parser.eat(',')? {
                let error = parser.parse_value()?;
                (first.as_str().unwrap_or_default().to_string(), error)
            } else {
                (String::new(), first)
            };
            CallReply {
                batch_id,
                call_id: None,
                outcome: exception_outcome(&error),
            }
        }
    };
    parser.expect(')')?;
    Ok(reply)
}

fn string_arg(parser: &mut Parser<'_>) -> Result<String> {
    match parser.parse_value()? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(format!("{}", n)),
        _ => Err(parser.error("handler id is not a string")),
    }
}

fn exception_outcome(error: &Value) -> CallOutcome {
    let text = |key: &str| error.get(key).and_then(Value::as_str).map(str::to_string);
    CallOutcome::Exception {
        class: text("javaClassName").or_else(|| text("name")),
        message: text("message"),
    }
}
