//! Scanner and translator behaviour against a scripted in-process provider.

use async_trait::async_trait;
use bookscan::{
    load_image_files, load_page_images, AiProvider, CallError, ImageFormat, PageContent,
    PageImage, PageScanner, PageSelection, PageType, PipelineError, PipelineProgress,
    ProviderConfig, ProviderError, ProviderResult, ScanOptions, TranslateOptions, Translator,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

/// What the fake provider was asked.
#[derive(Debug, Clone)]
enum Call {
    Chat { prompt: String, system: Option<String> },
    Vision { bytes: usize, format: ImageFormat },
}

/// Replies are popped in order; `None` fails the call like an exhausted retry.
struct ScriptedProvider {
    config: ProviderConfig,
    replies: Mutex<VecDeque<Option<String>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedProvider {
    fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Arc::new(Self {
            config: ProviderConfig::default(),
            replies: Mutex::new(replies.into_iter().map(|r| r.map(Into::into)).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn ok<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Arc<Self> {
        Self::new(replies.into_iter().map(Some))
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn chat_prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Chat { prompt, .. } => Some(prompt),
                Call::Vision { .. } => None,
            })
            .collect()
    }

    fn next(&self) -> ProviderResult<String> {
        match self.replies.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            _ => Err(ProviderError::CallFailed {
                provider: "scripted".into(),
                attempts: 3,
                source: CallError::Status {
                    status: 503,
                    body: "unavailable".into(),
                },
            }),
        }
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> ProviderResult<String> {
        self.calls.lock().unwrap().push(Call::Chat {
            prompt: prompt.to_string(),
            system: system_prompt.map(str::to_string),
        });
        self.next()
    }

    async fn vision(
        &self,
        image: &[u8],
        _prompt: &str,
        format: ImageFormat,
    ) -> ProviderResult<String> {
        self.calls.lock().unwrap().push(Call::Vision {
            bytes: image.len(),
            format,
        });
        self.next()
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl PipelineProgress for Recorder {
    fn on_start(&self, total: usize) {
        self.push(format!("start {total}"));
    }
    fn on_item_start(&self, item: usize, total: usize) {
        self.push(format!("item {item}/{total}"));
    }
    fn on_item_complete(&self, item: usize, _total: usize, _chars: usize) {
        self.push(format!("done {item}"));
    }
    fn on_item_error(&self, item: usize, _total: usize, _error: &str) {
        self.push(format!("error {item}"));
    }
    fn on_complete(&self, total: usize, succeeded: usize) {
        self.push(format!("complete {succeeded}/{total}"));
    }
}

fn images(n: usize) -> Vec<PageImage> {
    (1..=n)
        .map(|page_number| PageImage {
            page_number,
            bytes: vec![0u8; page_number],
            format: ImageFormat::Png,
        })
        .collect()
}

fn reply(page: usize) -> String {
    format!("[PAGE_TYPE: content]\n[MAIN_CONTENT_START]\nPage {page} body.\n[MAIN_CONTENT_END]")
}

fn scan_options() -> ScanOptions {
    ScanOptions {
        page_delay: Duration::ZERO,
        ..ScanOptions::default()
    }
}

fn translate_options() -> TranslateOptions {
    TranslateOptions {
        call_delay: Duration::ZERO,
        batch_delay: Duration::ZERO,
        ..TranslateOptions::default()
    }
}

// ── Scanner ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scans_every_page_in_order() {
    let provider = ScriptedProvider::ok((1..=3).map(reply));
    let scanner = PageScanner::new(provider.clone(), scan_options());

    let pages = scanner.scan_pages(&images(3)).await.unwrap();
    let numbers: Vec<usize> = pages.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(pages[1].main_content, "Page 2 body.");
    assert_eq!(pages[1].page_type, PageType::Content);
    assert_eq!(provider.calls().len(), 3);
}

#[tokio::test]
async fn page_selection_limits_vision_calls() {
    let provider = ScriptedProvider::ok([reply(2), reply(4)]);
    let options = ScanOptions {
        pages: PageSelection::Set(vec![4, 2, 9]),
        ..scan_options()
    };
    let scanner = PageScanner::new(provider.clone(), options);

    let pages = scanner.scan_pages(&images(5)).await.unwrap();
    assert_eq!(pages.iter().map(|p| p.page_number).collect::<Vec<_>>(), vec![2, 4]);

    let sent: Vec<(usize, ImageFormat)> = provider
        .calls()
        .into_iter()
        .map(|c| match c {
            Call::Vision { bytes, format } => (bytes, format),
            Call::Chat { .. } => panic!("scanner must not chat"),
        })
        .collect();
    assert_eq!(sent, vec![(2, ImageFormat::Png), (4, ImageFormat::Png)]);
}

#[tokio::test]
async fn empty_selection_is_no_pages() {
    let provider = ScriptedProvider::ok(Vec::<String>::new());
    let options = ScanOptions {
        pages: PageSelection::Single(10),
        ..scan_options()
    };
    let err = PageScanner::new(provider, options)
        .scan_pages(&images(3))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoPages));
}

#[tokio::test]
async fn failed_page_stops_the_scan_and_reports_progress() {
    let provider = ScriptedProvider::new([Some(reply(1)), None, Some(reply(3))]);
    let recorder = Arc::new(Recorder::default());
    let options = ScanOptions {
        progress: Some(recorder.clone()),
        ..scan_options()
    };
    let scanner = PageScanner::new(provider.clone(), options);

    let err = scanner.scan_pages(&images(3)).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Provider(ProviderError::CallFailed { .. })
    ));
    // Page 3 is never attempted.
    assert_eq!(provider.calls().len(), 2);
    assert_eq!(
        recorder.events(),
        vec!["start 3", "item 1/3", "done 1", "item 2/3", "error 2", "complete 1/3"]
    );
}

#[tokio::test]
async fn custom_prompt_and_fenced_reply() {
    let provider = ScriptedProvider::ok(["```\n[PAGE_TYPE: index]\nAaron, 12\n```"]);
    let options = ScanOptions {
        prompt: Some("Just read it".into()),
        ..scan_options()
    };
    let page = PageScanner::new(provider, options)
        .scan_page(7, PNG, ImageFormat::Png)
        .await
        .unwrap();
    assert_eq!(page.page_number, 7);
    assert_eq!(page.page_type, PageType::Index);
    assert_eq!(page.main_content, "Aaron, 12");
}

#[tokio::test(start_paused = true)]
async fn page_delay_applies_between_pages_only() {
    let provider = ScriptedProvider::ok((1..=3).map(reply));
    let options = ScanOptions {
        page_delay: Duration::from_millis(500),
        ..ScanOptions::default()
    };
    let scanner = PageScanner::new(provider, options);

    let started = tokio::time::Instant::now();
    scanner.scan_pages(&images(3)).await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
}

// ── Page loading ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn loads_images_sorted_and_skips_other_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("page_002.jpg"), JPEG).unwrap();
    std::fs::write(dir.path().join("page_001.png"), PNG).unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
    std::fs::create_dir(dir.path().join("thumbs")).unwrap();

    let pages = load_page_images(dir.path()).await.unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!((pages[0].page_number, pages[0].format), (1, ImageFormat::Png));
    assert_eq!((pages[1].page_number, pages[1].format), (2, ImageFormat::Jpeg));
}

#[tokio::test]
async fn empty_directory_is_no_pages() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_page_images(dir.path()).await,
        Err(PipelineError::NoPages)
    ));
}

#[tokio::test]
async fn image_files_keep_given_order() {
    let dir = tempfile::tempdir().unwrap();
    let b = dir.path().join("b.webp");
    let a = dir.path().join("a.png");
    std::fs::write(&b, b"RIFF\0\0\0\0WEBPVP8 ").unwrap();
    std::fs::write(&a, PNG).unwrap();

    let pages = load_image_files(&[b, a]).await.unwrap();
    assert_eq!(pages[0].format, ImageFormat::Webp);
    assert_eq!(pages[1].format, ImageFormat::Png);
    assert_eq!(pages[1].page_number, 2);

    let missing = load_image_files(&[dir.path().join("missing.png")]).await;
    assert!(matches!(missing, Err(PipelineError::Io { .. })));
}

// ── Translator ───────────────────────────────────────────────────────────────

fn paras(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn paragraph_translation_is_trimmed_and_uses_system_prompt() {
    let provider = ScriptedProvider::ok(["  恩典。 \n"]);
    let translator = Translator::new(provider.clone(), translate_options());

    assert_eq!(translator.translate_paragraph("Grace.", "").await.unwrap(), "恩典。");
    match &provider.calls()[0] {
        Call::Chat { prompt, system } => {
            assert!(prompt.contains("Grace."));
            assert_eq!(system.as_deref(), Some(bookscan::prompts::TRANSLATION_SYSTEM_PROMPT));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn alignment_passes_previous_paragraphs_as_context() {
    let provider = ScriptedProvider::ok(["一", "二", "三", "四"]);
    let translator = Translator::new(provider.clone(), translate_options());

    let pairs = translator
        .translate_with_alignment(&paras(&["P1", "P2", "P3", "P4"]))
        .await
        .unwrap();
    assert_eq!(pairs[3], ("P4".to_string(), "四".to_string()));

    let prompts = provider.chat_prompts();
    assert!(!prompts[0].contains("上下文参考"));
    assert!(prompts[1].contains("上下文参考：\nP1"));
    // Context window of two: P1 drops out for the fourth paragraph.
    assert!(prompts[3].contains("P2\n\nP3"));
    assert!(!prompts[3].contains("P1"));
}

#[tokio::test]
async fn batch_falls_back_for_missing_tags() {
    let provider = ScriptedProvider::ok(["[TRANS_1] 甲\n[TRANS_3] 丙", "乙"]);
    let translator = Translator::new(provider.clone(), translate_options());

    let out = translator.translate_batch(&paras(&["a", "b", "c"])).await.unwrap();
    assert_eq!(out, vec!["甲", "乙", "丙"]);

    let prompts = provider.chat_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("[TEXT_3]\nc"));
    assert!(prompts[1].contains("b"));
}

#[tokio::test]
async fn batch_size_splits_requests() {
    let provider = ScriptedProvider::ok(["[TRANS_1] 1\n[TRANS_2] 2", "[TRANS_1] 3"]);
    let options = TranslateOptions {
        batch_size: 2,
        ..translate_options()
    };
    let out = Translator::new(provider.clone(), options)
        .translate_batch(&paras(&["x", "y", "z"]))
        .await
        .unwrap();
    assert_eq!(out, vec!["1", "2", "3"]);
    assert_eq!(provider.chat_prompts().len(), 2);
}

#[tokio::test]
async fn sections_are_numbered_across_pages_with_footnotes() {
    let mut p1 = PageContent::new(1, "");
    p1.main_content = "First.\n\nSecond.".into();
    p1.footnotes = vec![bookscan::Footnote {
        marker: "[1]".into(),
        content: "See Genesis.".into(),
    }];
    let blank = PageContent::new(2, "");
    let mut p3 = PageContent::new(3, "");
    p3.main_content = "Third.".into();

    let provider = ScriptedProvider::ok(["[TRANS_1] 见创世记。", "第一。", "第二。", "第三。"]);
    let translator = Translator::new(provider.clone(), translate_options());

    let sections = translator
        .create_sections_from_pages(&[p1, blank, p3])
        .await
        .unwrap();
    assert_eq!(sections.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(sections[1].chinese, "第二。");
    assert_eq!(sections[0].footnotes, sections[1].footnotes);
    assert_eq!(sections[0].footnotes[0].content, "见创世记。");
    assert_eq!(sections[0].footnotes[0].original, "See Genesis.");
    assert!(sections[2].footnotes.is_empty());
    assert_eq!(provider.calls().len(), 4);
}

#[tokio::test]
async fn scripture_reply_is_parsed_or_falls_back() {
    let provider = ScriptedProvider::ok([
        r#"{"original": "λόγος", "transliteration": "logos", "chinese": "道", "reference": "约 1:1"}"#,
        "no json here",
        "道",
    ]);
    let translator = Translator::new(provider.clone(), translate_options());

    let parsed = translator.detect_and_translate_scripture("λόγος").await.unwrap();
    assert_eq!(parsed.reference.as_deref(), Some("约 1:1"));

    let fallback = translator.detect_and_translate_scripture("λόγος").await.unwrap();
    assert_eq!(fallback.original, "λόγος");
    assert_eq!(fallback.chinese, "道");
    assert_eq!(fallback.transliteration, "");
    assert!(fallback.reference.is_none());
}

#[tokio::test]
async fn translation_failure_propagates() {
    let provider = ScriptedProvider::new([Some("一"), None]);
    let recorder = Arc::new(Recorder::default());
    let options = TranslateOptions {
        progress: Some(recorder.clone()),
        ..translate_options()
    };
    let err = Translator::new(provider, options)
        .translate_with_alignment(&paras(&["a", "b", "c"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Provider(_)));
    assert_eq!(recorder.events().last().map(String::as_str), Some("complete 1/3"));
}
