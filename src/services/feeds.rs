//! RSS/Atom feed detection in fetched HTML.

use scraper::{Html, Selector};
use url::Url;

use crate::repository::FeedSubscription;

/// A feed link discovered on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFeed {
    pub url: String,
    pub feed_type: String,
    pub title: Option<String>,
}

/// Find `<link rel="alternate">` feed declarations in page HTML.
///
/// Returns feeds in document order with relative hrefs resolved against the
/// page URL; the first entry is the preferred subscription target.
pub fn detect_feeds_from_html(html: &str, page_url: &str) -> Vec<DetectedFeed> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse(r#"link[rel="alternate"]"#) {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };
    let base = Url::parse(page_url).ok();

    let mut feeds = Vec::new();
    for element in document.select(&selector) {
        let Some(kind) = element.value().attr("type") else {
            continue;
        };
        let feed_type = match kind {
            "application/rss+xml" => "rss",
            "application/atom+xml" => "atom",
            "application/feed+json" | "application/json" => "json",
            _ => continue,
        };
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        let resolved = match (&base, Url::parse(href)) {
            (_, Ok(absolute)) => absolute.to_string(),
            (Some(base), Err(_)) => match base.join(href) {
                Ok(joined) => joined.to_string(),
                Err(_) => continue,
            },
            (None, Err(_)) => continue,
        };

        feeds.push(DetectedFeed {
            url: resolved,
            feed_type: feed_type.to_string(),
            title: element.value().attr("title").map(str::to_string),
        });
    }
    feeds
}

impl DetectedFeed {
    /// Convert to a subscription record for persistence.
    pub fn to_subscription(&self, discovered_from: &str) -> FeedSubscription {
        FeedSubscription {
            feed_url: self.url.clone(),
            feed_type: Some(self.feed_type.clone()),
            title: self.title.clone(),
            discovered_from: Some(discovered_from.to_string()),
        }
    }
}
