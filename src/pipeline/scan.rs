//! OCR of scanned book pages through a vision provider.
//!
//! Each page image goes through one `vision` call with [`OCR_PROMPT`]. The
//! reply is delimiter-tagged text that [`parse_ocr_response`] splits into
//! page type, scripture block, main content and footnotes.
//!
//! Pages are scanned strictly one after another with a fixed pause in
//! between. A page whose provider call fails aborts the whole scan: an
//! empty page would silently corrupt the book, so the error propagates.

use crate::config::ScanOptions;
use crate::error::PipelineError;
use crate::pipeline::cleanup;
use crate::prompts::OCR_PROMPT;
use crate::providers::{AiProvider, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Kind of page, as reported by the vision model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PageType {
    Title,
    Preface,
    Toc,
    #[default]
    Content,
    Index,
    /// Any tag the model invents; kept verbatim (lowercased).
    Other(String),
}

impl PageType {
    pub fn as_str(&self) -> &str {
        match self {
            PageType::Title => "title",
            PageType::Preface => "preface",
            PageType::Toc => "toc",
            PageType::Content => "content",
            PageType::Index => "index",
            PageType::Other(tag) => tag,
        }
    }
}

impl From<String> for PageType {
    fn from(tag: String) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "title" => PageType::Title,
            "preface" => PageType::Preface,
            "toc" => PageType::Toc,
            "content" => PageType::Content,
            "index" => PageType::Index,
            other => PageType::Other(other.to_string()),
        }
    }
}

impl From<PageType> for String {
    fn from(t: PageType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A footnote extracted from a page; `marker` keeps its brackets, e.g. `[1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footnote {
    pub marker: String,
    pub content: String,
}

/// Structured OCR result for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub page_number: usize,
    /// The model reply after cleanup, before tag extraction.
    pub raw_text: String,
    /// Greek/Hebrew scripture block printed above the commentary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripture_text: Option<String>,
    #[serde(default)]
    pub main_content: String,
    #[serde(default)]
    pub footnotes: Vec<Footnote>,
    #[serde(default)]
    pub page_type: PageType,
}

impl PageContent {
    pub fn new(page_number: usize, raw_text: impl Into<String>) -> Self {
        Self {
            page_number,
            raw_text: raw_text.into(),
            scripture_text: None,
            main_content: String::new(),
            footnotes: Vec::new(),
            page_type: PageType::Content,
        }
    }
}

/// One already-rendered page raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed position in the book.
    pub page_number: usize,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

/// A chapter and the pages it covers (inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSpan {
    /// The heading text that opened the chapter, e.g. `CHAPTER IV`.
    pub chapter: String,
    pub start_page: usize,
    pub end_page: usize,
}

/// Front matter, back matter and chapter layout of a scanned book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookStructure {
    pub title_pages: Vec<usize>,
    pub preface_pages: Vec<usize>,
    pub toc_pages: Vec<usize>,
    pub index_pages: Vec<usize>,
    pub content_sections: Vec<ChapterSpan>,
}

// ── Response parsing ─────────────────────────────────────────────────────────

static RE_PAGE_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[PAGE_TYPE:\s*(\w+)\]").unwrap());
static RE_SCRIPTURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[SCRIPTURE_START\](.*?)\[SCRIPTURE_END\]").unwrap());
static RE_MAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[MAIN_CONTENT_START\](.*?)\[MAIN_CONTENT_END\]").unwrap());
static RE_FOOTNOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[FOOTNOTES_START\](.*?)\[FOOTNOTES_END\]").unwrap());
static RE_FOOTNOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[FOOTNOTE_START:([^\]]+)\](.*?)\[FOOTNOTE_END\]").unwrap()
});
static RE_ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]").unwrap());
static RE_CHAPTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:CHAPTER|Chapter|第.{1,3}章|SECTION|Section)\s*([IVXLCDM\d]+)?").unwrap()
});

/// Split a tagged OCR reply into its parts.
///
/// Without `[MAIN_CONTENT_START]…[MAIN_CONTENT_END]` the main content is the
/// whole reply with every single-line `[...]` tag removed.
pub fn parse_ocr_response(response: &str, page_number: usize) -> PageContent {
    let mut content = PageContent::new(page_number, response);

    if let Some(caps) = RE_PAGE_TYPE.captures(response) {
        content.page_type = PageType::from(caps[1].to_string());
    }

    content.scripture_text = RE_SCRIPTURE
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty());

    content.main_content = match RE_MAIN.captures(response) {
        Some(caps) => caps[1].trim().to_string(),
        None => RE_ANY_TAG.replace_all(response, "").trim().to_string(),
    };

    if let Some(section) = RE_FOOTNOTES.captures(response) {
        content.footnotes = RE_FOOTNOTE
            .captures_iter(&section[1])
            .map(|caps| Footnote {
                marker: format!("[{}]", &caps[1]),
                content: caps[2].trim().to_string(),
            })
            .collect();
    }

    content
}

// ── Scanner ──────────────────────────────────────────────────────────────────

/// Runs the OCR prompt over page images with one provider.
pub struct PageScanner {
    provider: Arc<dyn AiProvider>,
    options: ScanOptions,
}

impl PageScanner {
    pub fn new(provider: Arc<dyn AiProvider>, options: ScanOptions) -> Self {
        info!("PageScanner using provider: {}", provider.name());
        if !provider.supports_vision() {
            warn!(
                "Vision model '{}' of provider {} may not accept images",
                provider.config().vision_model,
                provider.name()
            );
        }
        Self { provider, options }
    }

    pub fn provider(&self) -> &Arc<dyn AiProvider> {
        &self.provider
    }

    fn prompt(&self) -> &str {
        self.options.prompt.as_deref().unwrap_or(OCR_PROMPT)
    }

    /// OCR a single page.
    pub async fn scan_page(
        &self,
        page_number: usize,
        image: &[u8],
        format: ImageFormat,
    ) -> Result<PageContent, PipelineError> {
        debug!("Page {}: sending {} bytes ({})", page_number, image.len(), format);
        let reply = self.provider.vision(image, self.prompt(), format).await?;
        Ok(parse_ocr_response(&cleanup::clean_response(&reply), page_number))
    }

    /// OCR the selected pages in order.
    ///
    /// `ScanOptions::pages` selects by 1-indexed position in `pages`.
    pub async fn scan_pages(&self, pages: &[PageImage]) -> Result<Vec<PageContent>, PipelineError> {
        let start = Instant::now();

        // ── Step 1: Apply the page selection ─────────────────────────────
        let indices = self.options.pages.to_indices(pages.len());
        if indices.is_empty() {
            return Err(PipelineError::NoPages);
        }
        let total = indices.len();
        info!("Scanning {} of {} pages", total, pages.len());

        let progress = self.options.progress.as_ref();
        if let Some(cb) = progress {
            cb.on_start(total);
        }

        // ── Step 2: One vision call per page, paced ──────────────────────
        let mut results = Vec::with_capacity(total);
        for (i, &idx) in indices.iter().enumerate() {
            let page = &pages[idx];
            let item = i + 1;
            if let Some(cb) = progress {
                cb.on_item_start(item, total);
            }
            info!("Scanning page {} ({}/{})", page.page_number, item, total);

            match self.scan_page(page.page_number, &page.bytes, page.format).await {
                Ok(content) => {
                    if let Some(cb) = progress {
                        cb.on_item_complete(item, total, content.main_content.chars().count());
                    }
                    results.push(content);
                }
                Err(e) => {
                    if let Some(cb) = progress {
                        cb.on_item_error(item, total, &e.to_string());
                        cb.on_complete(total, results.len());
                    }
                    return Err(e);
                }
            }

            if item < total && !self.options.page_delay.is_zero() {
                sleep(self.options.page_delay).await;
            }
        }

        info!(
            "Scanned {} pages in {}ms",
            results.len(),
            start.elapsed().as_millis()
        );
        if let Some(cb) = progress {
            cb.on_complete(total, results.len());
        }
        Ok(results)
    }
}

// ── Page loading ─────────────────────────────────────────────────────────────

/// Read every image file in `dir`, sorted by file name, numbered from 1.
///
/// Files whose bytes are not a recognised image format are skipped.
pub async fn load_page_images(dir: impl AsRef<Path>) -> Result<Vec<PageImage>, PipelineError> {
    let dir = dir.as_ref();
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PipelineError::Io { path, source }
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err(dir))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err(dir))? {
        let path = entry.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path).await.map_err(io_err(&path))?;
        match ImageFormat::sniff(&bytes) {
            Some(format) => images.push(PageImage {
                page_number: images.len() + 1,
                bytes,
                format,
            }),
            None => debug!("Skipping non-image file {}", path.display()),
        }
    }

    if images.is_empty() {
        return Err(PipelineError::NoPages);
    }
    info!("Loaded {} page images from {}", images.len(), dir.display());
    Ok(images)
}

/// Read specific image files, numbered in the given order from 1.
pub async fn load_image_files(paths: &[PathBuf]) -> Result<Vec<PageImage>, PipelineError> {
    let mut images = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PipelineError::Io {
                path: path.clone(),
                source,
            })?;
        let format = ImageFormat::sniff(&bytes).unwrap_or_else(|| {
            ImageFormat::from_name(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default(),
            )
        });
        images.push(PageImage {
            page_number: i + 1,
            bytes,
            format,
        });
    }
    if images.is_empty() {
        return Err(PipelineError::NoPages);
    }
    Ok(images)
}

// ── Book-level analysis ──────────────────────────────────────────────────────

/// Classify pages and find chapter boundaries.
///
/// A content page opens a chapter when its first 500 characters contain a
/// chapter or section heading; the chapter runs until the page before the
/// next heading, the last one until the final page.
pub fn identify_book_structure(pages: &[PageContent]) -> BookStructure {
    let mut structure = BookStructure::default();
    let mut current: Option<(String, usize)> = None;

    for page in pages {
        match &page.page_type {
            PageType::Title => structure.title_pages.push(page.page_number),
            PageType::Preface => structure.preface_pages.push(page.page_number),
            PageType::Toc => structure.toc_pages.push(page.page_number),
            PageType::Index => structure.index_pages.push(page.page_number),
            PageType::Content | PageType::Other(_) => {
                let head: String = page.main_content.chars().take(500).collect();
                if let Some(m) = RE_CHAPTER.find(&head) {
                    if let Some((chapter, start_page)) = current.take() {
                        structure.content_sections.push(ChapterSpan {
                            chapter,
                            start_page,
                            end_page: page.page_number.saturating_sub(1),
                        });
                    }
                    current = Some((m.as_str().trim_end().to_string(), page.page_number));
                }
            }
        }
    }

    if let (Some((chapter, start_page)), Some(last)) = (current, pages.last()) {
        structure.content_sections.push(ChapterSpan {
            chapter,
            start_page,
            end_page: last.page_number,
        });
    }

    structure
}

/// Fold scripture-only pages into the commentary page that follows them.
///
/// A page with a scripture block and no main content is dropped; its
/// scripture is carried forward and prepended to the next page with main
/// content under a `[Scripture from pages …]` header. Scripture left over
/// at the end attaches to the last kept page.
pub fn merge_scripture_texts(pages: Vec<PageContent>) -> Vec<PageContent> {
    let mut merged: Vec<PageContent> = Vec::with_capacity(pages.len());
    let mut pending: Vec<String> = Vec::new();
    let mut pending_pages: Vec<usize> = Vec::new();

    for mut page in pages {
        let scripture_only =
            page.scripture_text.is_some() && page.main_content.trim().is_empty();
        if scripture_only {
            if let Some(s) = page.scripture_text.take() {
                pending.push(s);
            }
            pending_pages.push(page.page_number);
            continue;
        }

        if !pending.is_empty() {
            if let Some(own) = page.scripture_text.take() {
                pending.push(own);
            }
            let scripture = pending.join(" ");
            let listed = pending_pages
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            page.main_content = format!(
                "[Scripture from pages {}]\n{}\n\n{}",
                listed, scripture, page.main_content
            );
            page.scripture_text = Some(scripture);
            pending.clear();
            pending_pages.clear();
        }
        merged.push(page);
    }

    if !pending.is_empty() {
        if let Some(last) = merged.last_mut() {
            let mut all: Vec<String> = last.scripture_text.take().into_iter().collect();
            all.extend(pending);
            last.scripture_text = Some(all.join(" "));
        } else {
            warn!("Scripture on pages {:?} has no commentary page to attach to", pending_pages);
        }
    }

    merged
}
