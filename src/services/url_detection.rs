//! Pattern-based URL classification.
//!
//! The fast path for well-known platforms; hosts nothing matches fall back
//! to LLM-assisted analysis.

use url::Url;

use crate::models::ContentType;

/// Hosts that settle classification without an LLM round-trip.
const PODCAST_HOSTS: &[(&str, &str)] = &[
    ("podcasts.apple.com", "apple_podcasts"),
    ("open.spotify.com", "spotify"),
    ("overcast.fm", "overcast"),
    ("pca.st", "pocket_casts"),
];

const ARTICLE_HOSTS: &[(&str, &str)] = &[
    ("substack.com", "substack"),
    ("medium.com", "medium"),
    ("github.com", "github"),
    ("en.wikipedia.org", "wikipedia"),
];

const NEWS_HOSTS: &[(&str, &str)] = &[
    ("news.ycombinator.com", "hackernews"),
    ("lobste.rs", "lobsters"),
    ("reddit.com", "reddit"),
];

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").to_string();
    Some(host)
}

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

/// True when the URL points at a tweet.
pub fn is_tweet_url(url: &str) -> bool {
    crate::services::gateways::extract_tweet_id(url).is_some()
}

/// Infer `(content_type, platform)` from URL shape alone.
///
/// `platform_hint` wins over detection when present; unknown hosts default
/// to article with no platform.
pub fn infer_content_type_and_platform(
    url: &str,
    platform_hint: Option<&str>,
) -> (ContentType, Option<String>) {
    let Some(host) = host_of(url) else {
        return (ContentType::Unknown, None);
    };

    if let Some(hint) = platform_hint {
        let content_type = match hint {
            "youtube" | "apple_podcasts" | "spotify" => ContentType::Podcast,
            "hackernews" | "reddit" | "lobsters" => ContentType::News,
            _ => ContentType::Article,
        };
        return (content_type, Some(hint.to_string()));
    }

    if host_matches(&host, "youtube.com") || host_matches(&host, "youtu.be") {
        return (ContentType::Podcast, Some("youtube".to_string()));
    }
    for (pattern, platform) in PODCAST_HOSTS {
        if host_matches(&host, pattern) {
            return (ContentType::Podcast, Some((*platform).to_string()));
        }
    }
    for (pattern, platform) in NEWS_HOSTS {
        if host_matches(&host, pattern) {
            return (ContentType::News, Some((*platform).to_string()));
        }
    }
    for (pattern, platform) in ARTICLE_HOSTS {
        if host_matches(&host, pattern) {
            return (ContentType::Article, Some((*platform).to_string()));
        }
    }
    if is_tweet_url(url) {
        return (ContentType::Article, Some("twitter".to_string()));
    }

    (ContentType::Article, None)
}

/// Whether a URL needs LLM-assisted classification.
///
/// Anything pattern detection can place on a platform skips the LLM.
pub fn should_use_llm_analysis(url: &str) -> bool {
    let (_, platform) = infer_content_type_and_platform(url, None);
    platform.is_none()
}
