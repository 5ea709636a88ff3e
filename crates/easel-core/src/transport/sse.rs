//! Line-oriented decoder for `text/event-stream` bodies.

/// Accumulates `data:` lines and yields a payload at each blank line.
///
/// Comments (`: heartbeat`) and the `event`, `id` and `retry` fields are
/// ignored; the sync server only sends unnamed events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator). Returns a complete payload
    /// when the line ends an event.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(body: &str) -> Vec<String> {
        let mut decoder = SseDecoder::new();
        body.split('\n').filter_map(|line| decoder.push_line(line)).collect()
    }

    #[test]
    fn test_single_event() {
        assert_eq!(decode("data: {\"a\":1}\n\n"), vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_heartbeat_is_ignored() {
        assert_eq!(decode(": heartbeat\n\ndata: x\n\n"), vec!["x".to_string()]);
    }

    #[test]
    fn test_multiline_data_and_crlf() {
        assert_eq!(decode("data: a\r\ndata:b\r\n\r\n"), vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_other_fields_are_skipped() {
        assert_eq!(decode("event: ping\nid: 4\ndata: y\n\n"), vec!["y".to_string()]);
    }

    #[test]
    fn test_incomplete_event_is_held() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push_line("data: partial"), None);
        assert_eq!(decoder.push_line(""), Some("partial".to_string()));
        assert_eq!(decoder.push_line(""), None);
    }
}
