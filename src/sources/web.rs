//! Portfolio website crawling.
//!
//! Fetches a start page, then follows same-site links whose path contains
//! one of the configured fragments (e.g. `project-details/`). Every page
//! becomes one document of visible text, or, when `sections` names element
//! ids present on the page, one document per section plus a remainder.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;

use profile_rag_core::models::{Document, OriginRef};

use super::SourceAdapter;
use crate::config::WebSourceConfig;

const USER_AGENT: &str = concat!("profile-rag/", env!("CARGO_PKG_VERSION"));

/// Elements whose content is never visible text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "svg", "template"];

/// Elements that start a new line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "title", "p", "div", "br", "li", "ul", "ol", "section", "article", "header", "footer", "nav",
    "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table", "main", "aside", "blockquote", "pre", "hr",
];

pub struct WebSource {
    config: WebSourceConfig,
    start: Url,
    client: reqwest::Client,
}

impl WebSource {
    pub fn new(config: WebSourceConfig) -> Result<Self> {
        let start = Url::parse(&config.url)
            .with_context(|| format!("Invalid web source url: {}", config.url))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            config,
            start,
            client,
        })
    }

    async fn get_page(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }
        Ok(response.text().await?)
    }

    async fn fetch_page(&self, url: &Url) -> Result<ParsedPage> {
        let html = self.get_page(url).await?;
        let base = url.clone();
        let sections = self.config.sections.clone();
        // The parsed DOM is not Send; keep it on the blocking pool.
        tokio::task::spawn_blocking(move || parse_page(&html, &base, &sections)).await?
    }

    fn should_follow(&self, link: &Url) -> bool {
        link.host_str() == self.start.host_str()
            && self
                .config
                .follow
                .iter()
                .any(|fragment| link.path().contains(fragment.as_str()))
    }
}

#[async_trait]
impl SourceAdapter for WebSource {
    fn name(&self) -> String {
        format!("web:{}", self.start)
    }

    async fn fetch(&self) -> Result<Vec<Document>> {
        let start_page = self
            .fetch_page(&self.start)
            .await
            .with_context(|| format!("Failed to fetch {}", self.start))?;

        let mut seen: HashSet<Url> = HashSet::from([without_fragment(&self.start)]);
        let mut queue: Vec<Url> = Vec::new();
        for link in &start_page.links {
            if self.should_follow(link) && seen.insert(link.clone()) {
                queue.push(link.clone());
            }
        }
        let mut documents = start_page.into_documents(&self.start);

        let budget = self.config.max_pages.saturating_sub(1);
        if queue.len() > budget {
            tracing::warn!(
                discovered = queue.len(),
                max_pages = self.config.max_pages,
                "web source truncated to max_pages"
            );
            queue.truncate(budget);
        }

        for url in queue {
            if self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
            match self.fetch_page(&url).await {
                Ok(page) => documents.extend(page.into_documents(&url)),
                Err(e) => tracing::warn!(url = %url, error = %e, "skipping page"),
            }
        }

        Ok(documents)
    }
}

/// Everything kept from one fetched page.
#[derive(Debug)]
struct ParsedPage {
    title: Option<String>,
    links: Vec<Url>,
    /// `(element id, text)` for each configured section found on the page.
    sections: Vec<(String, String)>,
    /// Visible text outside the found sections.
    remainder: String,
}

impl ParsedPage {
    fn into_documents(self, url: &Url) -> Vec<Document> {
        let mut documents = Vec::with_capacity(self.sections.len() + 1);
        for (id, text) in self.sections {
            let mut locator = url.clone();
            locator.set_fragment(Some(id.as_str()));
            documents.push(Document::new(text, OriginRef::url(locator.as_str()).with_title(id)));
        }
        if !self.remainder.is_empty() {
            let mut origin = OriginRef::url(url.as_str());
            if let Some(title) = self.title {
                origin = origin.with_title(title);
            }
            documents.push(Document::new(self.remainder, origin));
        }
        if documents.is_empty() {
            tracing::warn!(url = %url, "page has no visible text");
        }
        documents
    }
}

fn parse_page(html: &str, base: &Url, sections: &[String]) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let found: Vec<(String, ElementRef<'_>)> = sections
        .iter()
        .filter_map(|id| element_by_id(root, id).map(|el| (id.clone(), el)))
        .collect();
    let found_ids: Vec<String> = found.iter().map(|(id, _)| id.clone()).collect();

    let mut section_texts = Vec::with_capacity(found.len());
    for (id, element) in found {
        // Nested sections are reported once, under their own id.
        let others: Vec<String> = found_ids.iter().filter(|o| **o != id).cloned().collect();
        let text = visible_text(element, &others);
        if !text.is_empty() {
            section_texts.push((id, text));
        }
    }

    Ok(ParsedPage {
        title: page_title(&document)?,
        links: extract_links(&document, base)?,
        sections: section_texts,
        remainder: visible_text(root, &found_ids),
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {:?}", css, e))
}

fn element_by_id<'a>(root: ElementRef<'a>, id: &str) -> Option<ElementRef<'a>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().id() == Some(id))
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// Render an HTML page to visible text: scripts, styles, and comments are
/// dropped, entities decoded, and whitespace collapsed. Block elements
/// start new lines.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    visible_text(document.root_element(), &[])
}

/// Visible text under `element`, leaving out elements whose id is in `skip_ids`.
fn visible_text(element: ElementRef<'_>, skip_ids: &[String]) -> String {
    let mut raw = String::new();
    render(element, skip_ids, &mut raw);
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render(element: ElementRef<'_>, skip_ids: &[String], out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        let skipped_id = child
            .value()
            .id()
            .is_some_and(|id| skip_ids.iter().any(|s| s == id));
        if SKIPPED_ELEMENTS.contains(&name) || skipped_id {
            continue;
        }
        let block = BLOCK_ELEMENTS.contains(&name);
        if block {
            out.push('\n');
        }
        render(child, skip_ids, out);
        if block {
            out.push('\n');
        }
    }
}

fn page_title(document: &Html) -> Result<Option<String>> {
    let title = document.select(&selector("title")?).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    });
    Ok(title.filter(|t| !t.is_empty()))
}

/// Absolute, fragment-free targets of every `a[href]` in the page, in order.
fn extract_links(document: &Html, base: &Url) -> Result<Vec<Url>> {
    let mut links = Vec::new();
    for anchor in document.select(&selector("a[href]")?) {
        let href = anchor.value().attr("href").unwrap_or_default().trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("mailto:") {
            continue;
        }
        if let Ok(url) = base.join(href) {
            if url.scheme() == "http" || url.scheme() == "https" {
                links.push(without_fragment(&url));
            }
        }
    }
    Ok(links)
}
