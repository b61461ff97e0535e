//! Knowledge-base acquisition from public agricultural sources.
//!
//! Fetches a curated list of sugarcane-farming pages (research institutes,
//! government advisories, agricultural universities), extracts the readable
//! content, and saves it as plain-text documents plus a JSON dump under a
//! local knowledge directory. The saved `.txt` files are sized for
//! `agro ingest`, which indexes them into the file-search store.
//!
//! Crawling is deliberately shallow and polite: a fixed delay between
//! requests, a small same-host link budget per page, and a depth limit.
//! Pages whose extracted text falls below the minimum length are dropped as
//! navigation shells.

use anyhow::{Context, Result};
use chrono::Utc;
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ScrapeConfig;

// ============ Sources ============

/// One curated entry point: a category label and its seed URLs.
pub struct Source {
    pub category: &'static str,
    pub urls: &'static [&'static str],
}

/// Curated sugarcane-farming sources, grouped by publisher type.
pub const SOURCES: &[Source] = &[
    Source {
        category: "government",
        urls: &[
            "https://www.icar.org.in/content/sugarcane",
            "https://sugarcane.dac.gov.in/",
            "https://farmer.gov.in/cropstaticssugarcane.aspx",
        ],
    },
    Source {
        category: "research",
        urls: &[
            "https://iisr.icar.gov.in/",
            "https://vikaspedia.in/agriculture/crop-production/package-of-practices/sugarcane",
        ],
    },
    Source {
        category: "advisory",
        urls: &[
            "https://agritech.tnau.ac.in/agriculture/agri_majorcrops_sugarcane.html",
            "https://vikaspedia.in/agriculture/crop-production/integrated-pest-management/ipm-for-crops/ipm-strategies-for-sugarcane",
        ],
    },
    Source {
        category: "university",
        urls: &["https://www.pau.edu/", "https://angrau.ac.in/"],
    },
];

/// A link is worth following when its text or URL mentions one of these.
const RELEVANCE_KEYWORDS: &[&str] = &[
    "sugarcane",
    "cane",
    "farming",
    "cultivation",
    "crop",
    "pest",
    "disease",
    "fertilizer",
    "irrigation",
    "variety",
    "harvest",
    "management",
    "advisory",
    "practices",
    "guide",
];

// ============ Collected documents ============

/// One extracted page, as persisted into the JSON dump.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub category: String,
    pub content: String,
    pub scraped_at: chrono::DateTime<Utc>,
    pub word_count: usize,
}

/// Totals reported by [`Scraper::run`].
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub pages_fetched: usize,
    pub articles_saved: usize,
    pub output_dir: PathBuf,
}

// ============ Scraper ============

pub struct Scraper {
    http: reqwest::Client,
    config: ScrapeConfig,
    visited: HashSet<String>,
    articles: Vec<Article>,
}

impl Scraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
            )
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            visited: HashSet::new(),
            articles: Vec::new(),
        })
    }

    /// Crawl every configured source (or a single category when given) and
    /// write the collected documents to disk.
    pub async fn run(&mut self, category: Option<&str>) -> Result<ScrapeReport> {
        if let Some(wanted) = category {
            if !SOURCES.iter().any(|s| s.category.eq_ignore_ascii_case(wanted)) {
                anyhow::bail!(
                    "unknown source category '{}' (expected one of: {})",
                    wanted,
                    SOURCES
                        .iter()
                        .map(|s| s.category)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }

        let mut pages_fetched = 0usize;

        for source in SOURCES {
            if let Some(wanted) = category {
                if !source.category.eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }
            tracing::info!(category = source.category, "scraping source category");
            pages_fetched += self.crawl_category(source).await;
        }

        let saved = self.save_all()?;
        Ok(ScrapeReport {
            pages_fetched,
            articles_saved: saved,
            output_dir: self.config.output_dir.clone(),
        })
    }

    /// Breadth-first crawl from the category's seed URLs, bounded by depth
    /// and the per-page link budget.
    async fn crawl_category(&mut self, source: &Source) -> usize {
        let mut queue: VecDeque<(String, u32)> = source
            .urls
            .iter()
            .map(|u| (u.to_string(), self.config.max_depth))
            .collect();
        let mut fetched = 0usize;

        while let Some((url, depth)) = queue.pop_front() {
            if !self.visited.insert(url.clone()) {
                continue;
            }

            let html = match self.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!(%url, error = %e, "page fetch failed, skipping");
                    continue;
                }
            };
            fetched += 1;

            let title = extract_title(&html);
            let content = extract_content(&html);
            if content.len() >= self.config.min_content_chars {
                let word_count = content.split_whitespace().count();
                tracing::info!(%url, title = %title, word_count, "collected article");
                self.articles.push(Article {
                    url: url.clone(),
                    title,
                    category: source.category.to_string(),
                    content,
                    scraped_at: Utc::now(),
                    word_count,
                });
            } else {
                tracing::debug!(%url, chars = content.len(), "page below minimum length, dropped");
            }

            if depth > 0 {
                for link in
                    relevant_links(&html, &url, self.config.max_links_per_page, &self.visited)
                {
                    queue.push_back((link, depth - 1));
                }
            }

            tokio::time::sleep(Duration::from_secs(self.config.request_delay_secs)).await;
        }
        fetched
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("could not fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", url))?;
        Ok(response.text().await?)
    }

    /// Persist every collected article: one `.txt` per article under its
    /// category directory, plus a timestamped JSON dump of the whole run.
    fn save_all(&self) -> Result<usize> {
        if self.articles.is_empty() {
            return Ok(0);
        }
        std::fs::create_dir_all(&self.config.output_dir)
            .with_context(|| format!("could not create {}", self.config.output_dir.display()))?;

        for article in &self.articles {
            let dir = self.config.output_dir.join(&article.category);
            std::fs::create_dir_all(&dir)?;
            let file = dir.join(format!(
                "{}_{}.txt",
                safe_file_name(&article.title),
                article.scraped_at.format("%Y%m%d_%H%M%S")
            ));
            std::fs::write(&file, render_article(article))
                .with_context(|| format!("could not write {}", file.display()))?;
        }

        let dump = self.config.output_dir.join(format!(
            "scraped_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&dump, serde_json::to_string_pretty(&self.articles)?)
            .with_context(|| format!("could not write {}", dump.display()))?;

        Ok(self.articles.len())
    }
}

// ============ HTML extraction ============

/// Page title: `<title>`, then the first `<h1>`, then a placeholder.
pub fn extract_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    for selector in ["title", "h1"] {
        if let Ok(sel) = Selector::parse(selector) {
            if let Some(el) = doc.select(&sel).next() {
                let text = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }
    "Untitled".to_string()
}

/// Readable text from the page: heading, paragraph, and list-item blocks,
/// scoped to `<main>`/`<article>` when the page has one. Selecting text
/// blocks rather than the whole body keeps script, style, and navigation
/// chrome out of the result.
pub fn extract_content(html: &str) -> String {
    let doc = Html::parse_document(html);
    let block_sel = match Selector::parse("h1,h2,h3,p,li") {
        Ok(s) => s,
        Err(_) => return String::new(),
    };

    let scoped = Selector::parse("main, article")
        .ok()
        .and_then(|sel| doc.select(&sel).next());

    let blocks: Vec<String> = match scoped {
        Some(root) => root
            .select(&block_sel)
            .map(|el| norm_ws(&el.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| !t.is_empty())
            .collect(),
        None => doc
            .select(&block_sel)
            .map(|el| norm_ws(&el.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| !t.is_empty())
            .collect(),
    };

    blocks.join("\n\n")
}

/// Same-host links whose anchor text or URL mentions a relevance keyword.
/// Deduped, fragment-free, capped at `max`.
pub fn relevant_links(
    html: &str,
    base_url: &str,
    max: usize,
    visited: &HashSet<String>,
) -> Vec<String> {
    let base = match url::Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let doc = Html::parse_document(html);
    let sel = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        if out.len() >= max {
            break;
        }
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        let href_lc = href.to_ascii_lowercase();
        if href.is_empty()
            || href_lc.starts_with("javascript:")
            || href_lc.starts_with("mailto:")
        {
            continue;
        }

        let mut abs = match base.join(href) {
            Ok(u) => u,
            Err(_) => continue,
        };
        abs.set_fragment(None);
        if abs.host_str() != base.host_str() {
            continue;
        }

        let anchor_text = el.text().collect::<Vec<_>>().join(" ").to_lowercase();
        let url_lc = abs.as_str().to_lowercase();
        let relevant = RELEVANCE_KEYWORDS
            .iter()
            .any(|kw| anchor_text.contains(kw) || url_lc.contains(kw));
        if !relevant {
            continue;
        }

        let url = abs.to_string();
        if url == base_url || visited.contains(&url) || !seen.insert(url.clone()) {
            continue;
        }
        out.push(url);
    }
    out
}

// ============ Text and file helpers ============

/// Collapse runs of whitespace into single spaces.
fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title reduced to a filesystem-safe stem: alphanumerics kept, separators
/// become underscores, truncated to 50 characters.
pub fn safe_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let stem: String = cleaned
        .trim()
        .chars()
        .take(50)
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem
    }
}

/// Plain-text rendering with a provenance header, matching what `agro
/// ingest` expects of knowledge documents.
pub fn render_article(article: &Article) -> String {
    format!(
        "Title: {}\nURL: {}\nCategory: {}\nScraped: {}\nWord Count: {}\n{}\n\n{}\n",
        article.title,
        article.url,
        article.category,
        article.scraped_at.format("%Y-%m-%d %H:%M:%S UTC"),
        article.word_count,
        "=".repeat(80),
        article.content
    )
}
