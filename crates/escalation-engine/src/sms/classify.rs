//! Inbound SMS classification
//!
//! Bodies are matched on their first alphanumeric token, case-insensitive,
//! with punctuation stripped: "Yes!", "yes I can", and "YES" all accept.

/// Classified intent of an inbound SMS body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    Accept,
    Decline,
    Unknown,
}

/// Classify `body` against the configured keyword sets.
pub fn classify(body: &str, accept_keywords: &[String], decline_keywords: &[String]) -> ReplyIntent {
    let Some(token) = first_token(body) else {
        return ReplyIntent::Unknown;
    };
    if accept_keywords.iter().any(|k| k.eq_ignore_ascii_case(&token)) {
        ReplyIntent::Accept
    } else if decline_keywords
        .iter()
        .any(|k| k.eq_ignore_ascii_case(&token))
    {
        ReplyIntent::Decline
    } else {
        ReplyIntent::Unknown
    }
}

fn first_token(body: &str) -> Option<String> {
    let token: String = body
        .trim()
        .chars()
        .skip_while(|c| !c.is_alphanumeric())
        .take_while(|c| c.is_alphanumeric())
        .collect();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
