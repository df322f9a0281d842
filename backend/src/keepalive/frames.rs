//! Keep-alive ping frames.
//!
//! Streaming (GET) responses receive a complete SSE event carrying a
//! JSON-RPC `ping` notification with a fresh event id per tick. Unary (POST)
//! responses receive a bare newline-terminated JSON-RPC `ping` line.

use axum::body::Bytes;
use axum::http::Method;
use chrono::Utc;

/// The JSON-RPC message carried by every ping frame.
pub const PING_MESSAGE: &str = r#"{"jsonrpc":"2.0","method":"ping"}"#;

/// Framing used for pings on a given response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStyle {
    /// SSE event on a GET stream.
    Stream,
    /// Bare JSON line on a POST response.
    Unary,
}

impl PingStyle {
    /// Keep-alive applies to GET and POST only.
    pub fn for_method(method: &Method) -> Option<Self> {
        if method == Method::GET {
            Some(PingStyle::Stream)
        } else if method == Method::POST {
            Some(PingStyle::Unary)
        } else {
            None
        }
    }

    /// Render one ping frame.
    pub fn frame(self) -> Bytes {
        match self {
            PingStyle::Stream => Bytes::from(format!(
                "event: message\nid: {}\ndata: {}\n\n",
                event_id(),
                PING_MESSAGE
            )),
            PingStyle::Unary => Bytes::from(format!("{}\n", PING_MESSAGE)),
        }
    }
}

/// Unique SSE event id: millisecond timestamp plus a random suffix.
pub fn event_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_style_by_method() {
        assert_eq!(PingStyle::for_method(&Method::GET), Some(PingStyle::Stream));
        assert_eq!(PingStyle::for_method(&Method::POST), Some(PingStyle::Unary));
        assert_eq!(PingStyle::for_method(&Method::DELETE), None);
        assert_eq!(PingStyle::for_method(&Method::OPTIONS), None);
    }

    #[test]
    fn test_stream_frame_is_complete_sse_event() {
        let frame = PingStyle::Stream.frame();
        let text = std::str::from_utf8(&frame).unwrap();
        let lines: Vec<&str> = text.trim_end_matches('\n').split('\n').collect();

        assert!(text.ends_with("\n\n"));
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "event: message");
        assert!(lines[1].starts_with("id: "));
        assert_eq!(lines[2], format!("data: {}", PING_MESSAGE));

        let data: serde_json::Value = serde_json::from_str(&lines[2][6..]).unwrap();
        assert_eq!(data["method"], "ping");
    }

    #[test]
    fn test_unary_frame_is_json_line() {
        let frame = PingStyle::Unary.frame();
        assert_eq!(&frame[..], b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let ids: HashSet<String> = (0..256).map(|_| event_id()).collect();
        assert_eq!(ids.len(), 256);
    }
}
