//! Server-Sent Events decoding for streamed chat completions.
//!
//! Chat-completion streams arrive as `data: {json}` lines terminated by
//! `data: [DONE]`. Each JSON chunk carries its text increment in
//! `choices[0].delta.content`.

use futures::StreamExt;
use reqwest::RequestBuilder;
use serde_json::Value;

use super::{upstream_message, TextStream};

/// A decoded SSE line
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Text increment
    Delta(String),
    /// End of stream
    Done,
    /// Provider-reported or decoding failure
    Error(String),
}

/// Decode one SSE line.
///
/// Returns `None` for blank lines, comments, other fields, and chunks that
/// carry no text (role announcements, finish reasons).
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let json: Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(_) => return Some(SseEvent::Error(format!("Invalid JSON: {data}"))),
    };

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Some(SseEvent::Error(message));
    }

    json.pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| SseEvent::Delta(s.to_string()))
}

/// Diagnostic chunk emitted once when a stream fails
pub fn diagnostic(message: &str) -> String {
    format!("[Streaming error: {message}]")
}

/// Send `request` and turn its SSE body into a stream of text increments.
///
/// Nothing is retried. Any failure (connect, non-2xx, broken body, provider
/// error event) yields a single diagnostic chunk and ends the stream.
/// Dropping the stream drops the response and releases the connection.
pub fn sse_text_stream(request: RequestBuilder) -> TextStream {
    Box::pin(async_stream::stream! {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Stream connect failed: {}", e);
                yield diagnostic(&e.to_string());
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = upstream_message(&body);
            tracing::warn!(status = status.as_u16(), "Stream rejected by provider: {}", message);
            yield diagnostic(&format!("upstream returned {}: {}", status.as_u16(), message));
            return;
        }

        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("Stream interrupted: {}", e);
                    yield diagnostic(&e.to_string());
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            // Lines may straddle network chunks; only consume complete ones
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                match parse_sse_line(&line) {
                    Some(SseEvent::Delta(text)) => {
                        yield text;
                    }
                    Some(SseEvent::Done) => {
                        return;
                    }
                    Some(SseEvent::Error(message)) => {
                        yield diagnostic(&message);
                        return;
                    }
                    None => {}
                }
            }
        }

        // Trailing line without a newline
        if let Some(SseEvent::Delta(text)) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
            yield text;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line), Some(SseEvent::Delta("Hel".into())));
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: message"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_sse_line("data: {oops"), Some(SseEvent::Error(_))));
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"quota exceeded"}}"#),
            Some(SseEvent::Error("quota exceeded".into()))
        );
    }

    #[test]
    fn test_diagnostic_format() {
        assert_eq!(diagnostic("boom"), "[Streaming error: boom]");
    }
}
