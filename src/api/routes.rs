//! REST paths consumed from the backend.

use url::Url;

use crate::error::ClientError;
use crate::Result;

/// Joins path segments onto a base address, percent-encoding each segment.
/// The resulting URL string doubles as the rate-limit key for the call.
pub fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ClientError::Config(format!("invalid base url '{}': {}", base_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| ClientError::Config(format!("base url '{}' cannot hold a path", base_url)))?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}

pub fn conversations(user_id: &str, user_type: &str) -> Vec<String> {
    vec![
        "api".into(),
        "conversations".into(),
        user_id.into(),
        user_type.into(),
    ]
}

pub fn messages(conversation_id: &str) -> Vec<String> {
    conversation_child(conversation_id, "messages")
}

pub fn mark_read(conversation_id: &str) -> Vec<String> {
    conversation_child(conversation_id, "read")
}

pub fn clips(conversation_id: &str) -> Vec<String> {
    conversation_child(conversation_id, "clips")
}

pub fn daily_messages(conversation_id: &str) -> Vec<String> {
    conversation_child(conversation_id, "daily-messages")
}

pub fn sessions() -> Vec<String> {
    vec!["api".into(), "sessions".into()]
}

fn conversation_child(conversation_id: &str, child: &str) -> Vec<String> {
    vec![
        "api".into(),
        "conversations".into(),
        conversation_id.into(),
        child.into(),
    ]
}

pub fn url_for(base_url: &str, segments: &[String]) -> Result<Url> {
    let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
    endpoint(base_url, &refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let url = url_for("http://10.0.2.2:3000", &clips("abc123")).unwrap();
        assert_eq!(url.as_str(), "http://10.0.2.2:3000/api/conversations/abc123/clips");

        let url = url_for("https://api.example.com/", &daily_messages("c1")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/conversations/c1/daily-messages");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = url_for("http://localhost:3000", &messages("a b/c")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/conversations/a%20b%2Fc/messages");
    }

    #[test]
    fn test_endpoint_rejects_bad_base() {
        assert!(matches!(
            url_for("not a url", &sessions()),
            Err(ClientError::Config(_))
        ));
    }
}
