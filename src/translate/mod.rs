//! API translation between `OpenAI` and Cohere chat formats.
//!
//! The core of the adapter: converts requests, responses, and streaming events
//! between the two API formats. All translation functions are pure (no I/O).

pub mod cohere_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

/// Cut `s` to at most `max` bytes without splitting a character. Used for log lines.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abc", 2), "ab");
    }
}
