//! Caption precedence for outgoing reposts.

/// Pick the text to publish for a repost.
///
/// A user-supplied caption wins, then a generated one, then the article body.
/// Empty strings count as absent.
pub fn resolve_caption<'a>(
    custom_caption: Option<&'a str>,
    ai_caption: Option<&'a str>,
    content: &'a str,
) -> &'a str {
    custom_caption
        .filter(|c| !c.is_empty())
        .or_else(|| ai_caption.filter(|c| !c.is_empty()))
        .unwrap_or(content)
}
