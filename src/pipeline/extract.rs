//! Field extraction strategies for fetched pages.
//!
//! `process_content` picks a strategy from the URL and stores the extracted
//! fields into content metadata. The default strategy covers plain articles;
//! platform-specific variants adjust the selectors they trust.

use scraper::{Html, Selector};
use url::Url;

/// Normalized fields pulled out of a raw page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub author: Option<String>,
    pub text: String,
    pub publish_date: Option<String>,
    pub word_count: usize,
}

/// A fetch-and-extract strategy for a class of URLs.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite the URL before fetching (e.g. strip AMP or mobile prefixes).
    fn preprocess_url(&self, url: &str) -> String {
        url.to_string()
    }

    /// Pull normalized fields out of the fetched body.
    fn extract(&self, body: &str, url: &str) -> ExtractedFields;
}

/// Generic HTML article extraction.
pub struct HtmlArticleStrategy;

impl ExtractionStrategy for HtmlArticleStrategy {
    fn name(&self) -> &'static str {
        "html_article"
    }

    fn extract(&self, body: &str, _url: &str) -> ExtractedFields {
        let document = Html::parse_document(body);

        let title = select_first_text(&document, "title")
            .or_else(|| select_meta(&document, r#"meta[property="og:title"]"#));
        let author = select_meta(&document, r#"meta[name="author"]"#)
            .or_else(|| select_meta(&document, r#"meta[property="article:author"]"#));
        let publish_date = select_meta(&document, r#"meta[property="article:published_time"]"#)
            .or_else(|| select_meta(&document, r#"meta[name="date"]"#));

        // Prefer <article> paragraphs, fall back to all paragraphs.
        let text = paragraphs_text(&document, "article p")
            .filter(|t| !t.is_empty())
            .or_else(|| paragraphs_text(&document, "p").filter(|t| !t.is_empty()))
            .unwrap_or_default();

        let word_count = text.split_whitespace().count();
        ExtractedFields {
            title: title.filter(|t| !t.is_empty()),
            author,
            text,
            publish_date,
            word_count,
        }
    }
}

/// Plain-text responses pass through unparsed.
pub struct PlainTextStrategy;

impl ExtractionStrategy for PlainTextStrategy {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn extract(&self, body: &str, _url: &str) -> ExtractedFields {
        let text = body.trim().to_string();
        ExtractedFields {
            word_count: text.split_whitespace().count(),
            text,
            ..Default::default()
        }
    }
}

/// Select the strategy for a URL.
pub fn strategy_for_url(url: &str) -> Box<dyn ExtractionStrategy> {
    let is_plain = Url::parse(url)
        .ok()
        .map(|parsed| {
            let path = parsed.path().to_ascii_lowercase();
            path.ends_with(".txt") || path.ends_with(".md")
        })
        .unwrap_or(false);

    if is_plain {
        Box::new(PlainTextStrategy)
    } else {
        Box::new(HtmlArticleStrategy)
    }
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn select_meta(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

fn paragraphs_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let joined = document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head>
            <title>The Big Story</title>
            <meta name="author" content="Jane Writer" />
            <meta property="article:published_time" content="2024-03-01T10:00:00Z" />
          </head>
          <body>
            <nav><p></p></nav>
            <article>
              <p>First paragraph of the story.</p>
              <p>Second paragraph with more words.</p>
            </article>
          </body>
        </html>
    "#;

    #[test]
    fn extracts_article_fields() {
        let fields = HtmlArticleStrategy.extract(PAGE, "https://a.example/story");
        assert_eq!(fields.title.as_deref(), Some("The Big Story"));
        assert_eq!(fields.author.as_deref(), Some("Jane Writer"));
        assert_eq!(fields.publish_date.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert!(fields.text.contains("First paragraph"));
        assert!(fields.text.contains("Second paragraph"));
        assert_eq!(fields.word_count, 10);
    }

    #[test]
    fn falls_back_to_body_paragraphs() {
        let html = "<html><body><p>Only text here.</p></body></html>";
        let fields = HtmlArticleStrategy.extract(html, "https://a.example");
        assert_eq!(fields.text, "Only text here.");
    }

    #[test]
    fn plain_text_for_txt_urls() {
        let strategy = strategy_for_url("https://a.example/notes.txt");
        assert_eq!(strategy.name(), "plain_text");
        let fields = strategy.extract("  raw notes\n", "https://a.example/notes.txt");
        assert_eq!(fields.text, "raw notes");
        assert_eq!(fields.word_count, 2);

        assert_eq!(strategy_for_url("https://a.example/post").name(), "html_article");
    }
}
