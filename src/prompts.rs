//! Prompts sent by the scanner and the translator.
//!
//! Centralising every prompt here means changing the default behaviour
//! requires editing exactly one place, and unit tests can inspect prompts
//! without a live provider.
//!
//! The OCR prompt defines the delimiter tags that
//! [`crate::pipeline::scan::parse_ocr_response`] understands; keep the two in
//! sync. Callers can override it via [`crate::ScanOptions::prompt`].

/// Vision prompt for one scanned book page.
pub const OCR_PROMPT: &str = r#"Please carefully OCR this page and extract all text content.

Important instructions:
1. Preserve the original text exactly as shown, including any Greek (Ελληνικά), Hebrew (עברית), or Latin text.
2. If this is a Bible commentary page with Greek/Hebrew scripture text at the top (usually in larger font), please clearly mark it with [SCRIPTURE_START] and [SCRIPTURE_END] tags.
3. Identify any footnotes and mark them with [FOOTNOTE_START:marker] and [FOOTNOTE_END] tags.
4. Identify the page type:
   - "title" for title pages
   - "preface" for preface/introduction pages
   - "toc" for table of contents
   - "content" for regular content pages
   - "index" for index pages

Please format your response as:
[PAGE_TYPE: type_here]

[If scripture text exists:]
[SCRIPTURE_START]
scripture text here
[SCRIPTURE_END]

[MAIN_CONTENT_START]
main body text here
[MAIN_CONTENT_END]

[If footnotes exist:]
[FOOTNOTES_START]
[FOOTNOTE_START:1] footnote content [FOOTNOTE_END]
[FOOTNOTE_START:2] footnote content [FOOTNOTE_END]
[FOOTNOTES_END]

Extract all text accurately, preserving the original language and formatting."#;

/// System prompt for paragraph translation into Chinese.
///
/// Theology-aware: Union Version (和合本) wording for Bible quotations,
/// Greek and Hebrew kept in the original with a transliteration.
pub const TRANSLATION_SYSTEM_PROMPT: &str = r#"你是一位专业的翻译专家，专门翻译基督教神学和圣经研究相关的文献。
请将给定的英文文本翻译成流畅、准确的中文。

翻译要求：
1. 保持原文的神学术语准确性
2. 专有名词（如人名、地名）采用通用中文译法
3. 圣经经文引用使用和合本译法
4. 希腊文和希伯来文保留原文，并在括号内提供音译
5. 保持原文的段落结构
6. 译文应该流畅自然，符合中文表达习惯"#;

/// System prompt for [`crate::Translator::translate_batch`].
pub const BATCH_SYSTEM_PROMPT: &str = r#"你是一位专业的翻译专家。请将给定的多段英文文本翻译成中文。
每段翻译用 [TRANS_N] 标记，其中 N 是段落编号（从1开始）。
保持原文的格式和含义。"#;

/// System prompt for [`crate::Translator::detect_and_translate_scripture`].
pub const SCRIPTURE_SYSTEM_PROMPT: &str = r#"你是圣经翻译专家。请识别文本中的希腊文或希伯来文经文，
并提供：
1. 原文（保持不变）
2. 音译
3. 中文翻译（参考和合本）

以JSON格式返回：
{
  "original": "原文",
  "transliteration": "音译",
  "chinese": "中文翻译",
  "reference": "经文出处（如果能识别）"
}"#;

/// User message for a single paragraph, with optional preceding context.
pub fn translation_request(text: &str, context: &str) -> String {
    let mut prompt = format!("请翻译以下文本为中文：\n\n{text}");
    if !context.trim().is_empty() {
        prompt.push_str("\n\n上下文参考：\n");
        prompt.push_str(context);
    }
    prompt
}

/// User message for a batch: each input tagged `[TEXT_n]`, 1-indexed.
pub fn batch_request(texts: &[String]) -> String {
    let numbered = texts
        .iter()
        .enumerate()
        .map(|(i, t)| format!("[TEXT_{}]\n{}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("请翻译以下{}段文本：\n\n{}", texts.len(), numbered)
}

/// User message asking for scripture analysis.
pub fn scripture_request(text: &str) -> String {
    format!("请分析以下经文：\n\n{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_prompt_names_every_tag() {
        for tag in [
            "[PAGE_TYPE:",
            "[SCRIPTURE_START]",
            "[SCRIPTURE_END]",
            "[MAIN_CONTENT_START]",
            "[MAIN_CONTENT_END]",
            "[FOOTNOTES_START]",
            "[FOOTNOTE_START:",
            "[FOOTNOTE_END]",
            "[FOOTNOTES_END]",
        ] {
            assert!(OCR_PROMPT.contains(tag), "OCR prompt is missing {tag}");
        }
    }

    #[test]
    fn translation_request_appends_context_only_when_present() {
        let bare = translation_request("Grace.", "");
        assert!(bare.ends_with("Grace."));
        assert!(!bare.contains("上下文参考"));

        let with_ctx = translation_request("Grace.", "Previous paragraph.");
        assert!(with_ctx.contains("上下文参考：\nPrevious paragraph."));
    }

    #[test]
    fn batch_request_numbers_from_one() {
        let req = batch_request(&["alpha".to_string(), "beta".to_string()]);
        assert!(req.starts_with("请翻译以下2段文本"));
        assert!(req.contains("[TEXT_1]\nalpha"));
        assert!(req.contains("[TEXT_2]\nbeta"));
        assert!(!req.contains("[TEXT_0]"));
    }

    #[test]
    fn system_prompts_mention_their_contract() {
        assert!(BATCH_SYSTEM_PROMPT.contains("[TRANS_N]"));
        assert!(SCRIPTURE_SYSTEM_PROMPT.contains("\"transliteration\""));
        assert!(TRANSLATION_SYSTEM_PROMPT.contains("和合本"));
    }
}
