//! Chinese translation of scanned pages through a language provider.
//!
//! Every call goes through `chat` with a theology-aware system prompt and is
//! awaited before the next one starts; the fixed pauses between calls come
//! from [`TranslateOptions`].

use crate::config::TranslateOptions;
use crate::error::PipelineError;
use crate::pipeline::cleanup;
use crate::pipeline::scan::{Footnote, PageContent};
use crate::prompts;
use crate::providers::AiProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// One translated paragraph with its page's footnotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedSection {
    /// 1-based, continuous across pages.
    pub id: usize,
    pub original: String,
    pub chinese: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub footnotes: Vec<TranslatedFootnote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedFootnote {
    pub marker: String,
    /// The Chinese translation.
    pub content: String,
    pub original: String,
}

/// A Greek or Hebrew passage with transliteration and translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptureAnalysis {
    pub original: String,
    #[serde(default)]
    pub transliteration: String,
    pub chinese: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

static RE_FLAT_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// Translates text to Chinese with one provider.
pub struct Translator {
    provider: Arc<dyn AiProvider>,
    options: TranslateOptions,
}

impl Translator {
    pub fn new(provider: Arc<dyn AiProvider>, options: TranslateOptions) -> Self {
        info!("Translator using provider: {}", provider.name());
        Self { provider, options }
    }

    pub fn provider(&self) -> &Arc<dyn AiProvider> {
        &self.provider
    }

    /// Translate one paragraph; `context` is optional surrounding text.
    pub async fn translate_paragraph(&self, text: &str, context: &str) -> Result<String, PipelineError> {
        let request = prompts::translation_request(text, context);
        let reply = self
            .provider
            .chat(&request, Some(prompts::TRANSLATION_SYSTEM_PROMPT))
            .await?;
        Ok(reply.trim().to_string())
    }

    /// Translate paragraphs in order, each with the previous ones as context.
    pub async fn translate_with_alignment(
        &self,
        paragraphs: &[String],
    ) -> Result<Vec<(String, String)>, PipelineError> {
        let total = paragraphs.len();
        let progress = self.options.progress.as_ref();
        if let Some(cb) = progress {
            cb.on_start(total);
        }

        let mut results = Vec::with_capacity(total);
        for (i, para) in paragraphs.iter().enumerate() {
            let item = i + 1;
            if let Some(cb) = progress {
                cb.on_item_start(item, total);
            }
            let context = paragraphs[i.saturating_sub(self.options.context_window)..i].join("\n\n");
            debug!("Translating paragraph {}/{}", item, total);

            let translation = match self.translate_paragraph(para, &context).await {
                Ok(t) => t,
                Err(e) => {
                    if let Some(cb) = progress {
                        cb.on_item_error(item, total, &e.to_string());
                        cb.on_complete(total, results.len());
                    }
                    return Err(e);
                }
            };
            if let Some(cb) = progress {
                cb.on_item_complete(item, total, translation.chars().count());
            }
            results.push((para.clone(), translation));

            if item < total {
                pause(self.options.call_delay).await;
            }
        }

        if let Some(cb) = progress {
            cb.on_complete(total, results.len());
        }
        Ok(results)
    }

    /// Translate short texts several per request.
    ///
    /// Inputs are tagged `[TEXT_n]`; the reply is expected to tag each
    /// translation `[TRANS_n]`. Any item whose tag is missing is translated
    /// on its own with [`Translator::translate_paragraph`].
    pub async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, PipelineError> {
        let batch_size = self.options.batch_size.max(1);
        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let reply = self
                .provider
                .chat(&prompts::batch_request(batch), Some(prompts::BATCH_SYSTEM_PROMPT))
                .await?;
            let parsed = parse_batch_reply(&cleanup::clean_response(&reply), batch.len());

            for (text, translation) in batch.iter().zip(parsed) {
                match translation {
                    Some(t) => results.push(t),
                    None => {
                        warn!("Batch reply is missing a translation; translating individually");
                        results.push(self.translate_paragraph(text, "").await?);
                    }
                }
            }
            pause(self.options.batch_delay).await;
        }

        Ok(results)
    }

    /// Translate footnote contents, keeping markers and originals.
    pub async fn translate_footnotes(
        &self,
        footnotes: &[Footnote],
    ) -> Result<Vec<TranslatedFootnote>, PipelineError> {
        if footnotes.is_empty() {
            return Ok(Vec::new());
        }
        let contents: Vec<String> = footnotes.iter().map(|f| f.content.clone()).collect();
        let translations = self.translate_batch(&contents).await?;

        Ok(footnotes
            .iter()
            .zip(translations)
            .map(|(f, content)| TranslatedFootnote {
                marker: f.marker.clone(),
                content,
                original: f.content.clone(),
            })
            .collect())
    }

    /// One section per paragraph of every page with main content.
    ///
    /// Paragraphs are split on blank lines and numbered from 1 across the
    /// whole book. A page's footnotes are translated once and attached to
    /// every section from that page.
    pub async fn create_sections_from_pages(
        &self,
        pages: &[PageContent],
    ) -> Result<Vec<TranslatedSection>, PipelineError> {
        let work: Vec<(&PageContent, Vec<String>)> = pages
            .iter()
            .map(|p| (p, cleanup::split_paragraphs(&p.main_content)))
            .filter(|(_, paras)| !paras.is_empty())
            .collect();
        let total: usize = work.iter().map(|(_, paras)| paras.len()).sum();
        info!("Translating {} paragraphs from {} pages", total, work.len());

        let progress = self.options.progress.as_ref();
        if let Some(cb) = progress {
            cb.on_start(total);
        }

        let mut sections: Vec<TranslatedSection> = Vec::with_capacity(total);
        for (page, paragraphs) in work {
            let footnotes = self.translate_footnotes(&page.footnotes).await?;

            for para in paragraphs {
                let id = sections.len() + 1;
                if let Some(cb) = progress {
                    cb.on_item_start(id, total);
                }
                debug!("Page {}: translating section {}", page.page_number, id);

                let chinese = match self.translate_paragraph(&para, "").await {
                    Ok(t) => t,
                    Err(e) => {
                        if let Some(cb) = progress {
                            cb.on_item_error(id, total, &e.to_string());
                            cb.on_complete(total, sections.len());
                        }
                        return Err(e);
                    }
                };
                if let Some(cb) = progress {
                    cb.on_item_complete(id, total, chinese.chars().count());
                }
                sections.push(TranslatedSection {
                    id,
                    original: para,
                    chinese,
                    footnotes: footnotes.clone(),
                });
                pause(self.options.call_delay).await;
            }
        }

        if let Some(cb) = progress {
            cb.on_complete(total, sections.len());
        }
        Ok(sections)
    }

    /// Ask for a structured analysis of a scripture passage.
    ///
    /// The first flat `{...}` object in the reply is parsed; if there is
    /// none, or it does not parse, the passage is translated as a plain
    /// paragraph instead.
    pub async fn detect_and_translate_scripture(
        &self,
        text: &str,
    ) -> Result<ScriptureAnalysis, PipelineError> {
        let reply = self
            .provider
            .chat(&prompts::scripture_request(text), Some(prompts::SCRIPTURE_SYSTEM_PROMPT))
            .await?;

        if let Some(analysis) = parse_scripture_reply(&reply) {
            return Ok(analysis);
        }

        debug!("Scripture reply had no usable JSON; falling back to plain translation");
        Ok(ScriptureAnalysis {
            original: text.to_string(),
            transliteration: String::new(),
            chinese: self.translate_paragraph(text, "").await?,
            reference: None,
        })
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

/// Extract `[TRANS_n]` blocks; entry `n-1` is `None` when tag `n` is absent.
pub fn parse_batch_reply(reply: &str, expected: usize) -> Vec<Option<String>> {
    (1..=expected)
        .map(|n| {
            let tag = format!("[TRANS_{n}]");
            let start = reply.find(&tag)? + tag.len();
            let rest = &reply[start..];
            let end = rest.find("[TRANS_").unwrap_or(rest.len());
            Some(rest[..end].trim().to_string())
        })
        .collect()
}

/// Parse the first flat JSON object in a scripture reply.
pub fn parse_scripture_reply(reply: &str) -> Option<ScriptureAnalysis> {
    let object = RE_FLAT_OBJECT.find(reply)?;
    match serde_json::from_str::<ScriptureAnalysis>(object.as_str()) {
        Ok(mut analysis) => {
            analysis.reference = analysis.reference.filter(|r| !r.trim().is_empty());
            Some(analysis)
        }
        Err(e) => {
            debug!("Scripture JSON did not parse: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_reply_tags_are_split() {
        let reply = "[TRANS_1]\n太初有道。\n\n[TRANS_2]\n道与神同在。\n[TRANS_3] 道就是神。";
        assert_eq!(
            parse_batch_reply(reply, 3),
            vec![
                Some("太初有道。".to_string()),
                Some("道与神同在。".to_string()),
                Some("道就是神。".to_string()),
            ]
        );
    }

    #[test]
    fn missing_batch_tag_is_none() {
        let reply = "[TRANS_1] 一\n[TRANS_3] 三";
        assert_eq!(
            parse_batch_reply(reply, 3),
            vec![Some("一".to_string()), None, Some("三".to_string())]
        );
    }

    #[test]
    fn trans_1_does_not_match_trans_10() {
        let reply: String = (1..=10).map(|n| format!("[TRANS_{n}] t{n}\n")).collect();
        let parsed = parse_batch_reply(&reply, 10);
        assert_eq!(parsed[0].as_deref(), Some("t1"));
        assert_eq!(parsed[9].as_deref(), Some("t10"));
    }

    #[test]
    fn scripture_json_is_found_inside_prose() {
        let reply = "Here is the analysis:\n```json\n{\"original\": \"λόγος\", \"transliteration\": \"logos\", \"chinese\": \"道\", \"reference\": \"约翰福音 1:1\"}\n```";
        let a = parse_scripture_reply(reply).unwrap();
        assert_eq!(a.original, "λόγος");
        assert_eq!(a.transliteration, "logos");
        assert_eq!(a.chinese, "道");
        assert_eq!(a.reference.as_deref(), Some("约翰福音 1:1"));
    }

    #[test]
    fn scripture_without_json_is_none() {
        assert!(parse_scripture_reply("I cannot identify this passage.").is_none());
        assert!(parse_scripture_reply("{\"unexpected\": 1}").is_none());
    }

    #[test]
    fn empty_reference_becomes_none() {
        let a = parse_scripture_reply(r#"{"original":"a","chinese":"b","reference":""}"#).unwrap();
        assert!(a.reference.is_none());
        assert_eq!(a.transliteration, "");
    }

    #[test]
    fn section_json_omits_empty_footnotes() {
        let s = TranslatedSection {
            id: 1,
            original: "Grace.".into(),
            chinese: "恩典。".into(),
            footnotes: vec![],
        };
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("footnotes").is_none());
        assert_eq!(v["id"], 1);
    }
}
