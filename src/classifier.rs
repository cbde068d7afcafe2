// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category classification by fixed-priority fallback chain
//!
//! Taxonomy, then the optional AI classifier, then the keyword table, then
//! the invoice pattern, then the extension map, then [`UNSORTED`]. The first
//! step that produces a label wins. Changing the order changes results.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::Result;

/// Fallback label; also rejected when an AI classifier returns it
pub const UNSORTED: &str = "unsorted";

/// An external classifier consulted after the taxonomy
#[async_trait]
pub trait AiClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Return a category label for `text`, or empty when unsure
    async fn classify(&self, text: &str) -> Result<String>;
}

/// Which step of the chain produced the label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Taxonomy,
    Ai,
    Keyword,
    Pattern,
    Extension,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub source: MatchSource,
}

impl Classification {
    fn new(category: impl Into<String>, source: MatchSource) -> Self {
        Self {
            category: category.into(),
            source,
        }
    }
}

/// Category -> keyword variants. Order is the tie-break.
pub const KEYWORD_TABLE: &[(&str, &[&str])] = &[
    ("invoice", &["invoice", "發票", "发票", "收據", "收据", "receipt", "統一發票", "bill"]),
    ("contract", &["contract", "agreement", "合約", "合同", "契約", "nda"]),
    ("quotation", &["quotation", "quote", "報價", "报价", "估價"]),
    ("tax", &["tax", "稅", "税", "1099", "w-2", "w2"]),
    ("bank", &["statement", "bank", "對帳單", "对账单", "帳單"]),
    ("report", &["report", "報告", "报告", "summary"]),
    ("meeting", &["meeting", "minutes", "會議", "会议", "agenda"]),
    ("resume", &["resume", "curriculum", "履歷", "简历"]),
    ("presentation", &["slides", "deck", "簡報", "演示"]),
    ("screenshot", &["screenshot", "screen shot", "截圖", "截图", "螢幕擷取"]),
    ("photo", &["photo", "img_", "dsc_", "dscn", "照片", "相片"]),
    ("scan", &["scan", "掃描", "扫描"]),
];

/// Invoice numbers that slip past the keyword table: `INV-0042`,
/// `inv_20230401`, Taiwanese uniform invoice numbers `AB-12345678`
static INVOICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])inv[-_ ]?\d{3,}|(?:^|[^a-z])[a-z]{2}-?\d{8}(?:[^0-9]|$)")
        .expect("invoice pattern is valid")
});

/// Extension -> category for the last real step of the chain
pub fn extension_category(extension: &str) -> Option<&'static str> {
    let ext = extension.trim_start_matches('.').to_lowercase();
    let category = match ext.as_str() {
        "pdf" => "pdf",
        "doc" | "docx" | "odt" | "rtf" | "txt" | "md" | "pages" => "document",
        "xls" | "xlsx" | "csv" | "ods" | "numbers" => "spreadsheet",
        "ppt" | "pptx" | "odp" | "key" => "presentation",
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "bmp" | "tiff" | "tif" | "svg" => "image",
        "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" => "audio",
        "mp4" | "mkv" | "webm" | "avi" | "mov" => "video",
        "zip" | "tar" | "gz" | "7z" | "rar" => "archive",
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" => "code",
        "eml" | "msg" => "email",
        _ => return None,
    };
    Some(category)
}

/// Lower-cased file stem: the name minus a trailing `.{extension}`
pub fn file_stem(filename: &str, extension: &str) -> String {
    let lower = filename.trim().to_lowercase();
    let ext = extension.trim_start_matches('.').to_lowercase();
    if !ext.is_empty() {
        if let Some(stem) = lower.strip_suffix(&format!(".{}", ext)) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    lower
}

/// First taxonomy tag contained in the stem, in the order given
pub fn match_taxonomy(stem: &str, taxonomy: &[String]) -> Option<String> {
    taxonomy
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .find(|t| stem.contains(&t.to_lowercase()))
        .map(String::from)
}

/// First keyword-table category with a keyword contained in the stem
pub fn match_keyword(stem: &str) -> Option<&'static str> {
    KEYWORD_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| stem.contains(k)))
        .map(|(category, _)| *category)
}

pub fn looks_like_invoice(stem: &str) -> bool {
    INVOICE_PATTERN.is_match(stem)
}

/// Resolves a category for a filename. Never fails.
#[derive(Clone, Default)]
pub struct Classifier {
    taxonomy: Vec<String>,
    ai: Option<Arc<dyn AiClassifier>>,
}

impl Classifier {
    pub fn new(taxonomy: Vec<String>, ai: Option<Arc<dyn AiClassifier>>) -> Self {
        Self { taxonomy, ai }
    }

    /// Category label for a file
    pub async fn classify(&self, filename: &str, extension: &str) -> String {
        self.classify_detailed(filename, extension).await.category
    }

    /// Category label together with the chain step that produced it
    pub async fn classify_detailed(&self, filename: &str, extension: &str) -> Classification {
        let stem = file_stem(filename, extension);

        if let Some(tag) = match_taxonomy(&stem, &self.taxonomy) {
            return Classification::new(tag, MatchSource::Taxonomy);
        }

        if let Some(ai) = &self.ai {
            match ai.classify(&stem).await {
                Ok(answer) => {
                    let answer = answer.trim();
                    if !answer.is_empty() && !answer.eq_ignore_ascii_case(UNSORTED) {
                        debug!("{} classified {:?} as {}", ai.name(), stem, answer);
                        return Classification::new(answer, MatchSource::Ai);
                    }
                }
                Err(e) => warn!("{} failed for {:?}: {}", ai.name(), stem, e),
            }
        }

        classify_offline(&stem, extension)
    }
}

/// Steps 3 to 6 of the chain, which need no taxonomy and no network
pub fn classify_offline(stem: &str, extension: &str) -> Classification {
    if let Some(category) = match_keyword(stem) {
        return Classification::new(category, MatchSource::Keyword);
    }
    if looks_like_invoice(stem) {
        return Classification::new("invoice", MatchSource::Pattern);
    }
    if let Some(category) = extension_category(extension) {
        return Classification::new(category, MatchSource::Extension);
    }
    Classification::new(UNSORTED, MatchSource::Fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StowageError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedAi {
        answer: std::result::Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl FixedAi {
        fn new(answer: std::result::Result<&'static str, &'static str>) -> Arc<Self> {
            Arc::new(Self { answer, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl AiClassifier for FixedAi {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn classify(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .map(String::from)
                .map_err(|e| StowageError::ClassifierUnavailable(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_taxonomy_outranks_keywords() {
        let classifier = Classifier::new(vec!["Acme".to_string()], None);
        let category = classifier.classify("acme_invoice_2023.pdf", "pdf").await;
        assert_eq!(category, "Acme");
    }

    #[tokio::test]
    async fn test_taxonomy_order_is_respected() {
        let classifier = Classifier::new(vec!["beta".into(), "alpha".into()], None);
        let result = classifier.classify_detailed("alpha-beta.txt", "txt").await;
        assert_eq!(result.category, "beta");
        assert_eq!(result.source, MatchSource::Taxonomy);
    }

    #[tokio::test]
    async fn test_taxonomy_ignores_extension() {
        let classifier = Classifier::new(vec!["pdf".into()], None);
        let result = classifier.classify_detailed("notes.pdf", "pdf").await;
        assert_ne!(result.source, MatchSource::Taxonomy);
    }

    #[tokio::test]
    async fn test_keyword_table_and_cjk() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("invoice_202304.pdf", "pdf").await, "invoice");
        assert_eq!(classifier.classify("2023年發票.jpg", "jpg").await, "invoice");
        assert_eq!(classifier.classify("Signed Contract.docx", "docx").await, "contract");
        assert_eq!(classifier.classify("Screenshot 2024-01-01.png", "png").await, "screenshot");
    }

    #[tokio::test]
    async fn test_keyword_table_order_breaks_ties() {
        // contains both an invoice keyword and a contract keyword
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("contract_receipt.pdf", "pdf").await, "invoice");
    }

    #[test]
    fn test_invoice_pattern() {
        assert!(looks_like_invoice("inv-00042"));
        assert!(looks_like_invoice("scan inv_20230401"));
        assert!(looks_like_invoice("ab-12345678"));
        assert!(looks_like_invoice("xy12345678 copy"));
        assert!(!looks_like_invoice("invitation"));
        assert!(!looks_like_invoice("holiday 2023"));
    }

    #[tokio::test]
    async fn test_pattern_before_extension() {
        let result = Classifier::default().classify_detailed("AB-12345678.pdf", "pdf").await;
        assert_eq!(result.category, "invoice");
        assert_eq!(result.source, MatchSource::Pattern);
    }

    #[tokio::test]
    async fn test_extension_map_and_fallback() {
        let classifier = Classifier::default();
        let result = classifier.classify_detailed("holiday.JPG", "JPG").await;
        assert_eq!(result.category, "image");
        assert_eq!(result.source, MatchSource::Extension);

        let result = classifier.classify_detailed("mystery.xyz", "xyz").await;
        assert_eq!(result.category, UNSORTED);
        assert_eq!(result.source, MatchSource::Fallback);
    }

    #[tokio::test]
    async fn test_ai_answer_used_after_taxonomy() {
        let ai = FixedAi::new(Ok("travel"));
        let shared: Arc<dyn AiClassifier> = ai.clone();
        let classifier = Classifier::new(vec!["acme".into()], Some(shared));

        assert_eq!(classifier.classify("acme_invoice.pdf", "pdf").await, "acme");
        assert_eq!(ai.calls.load(Ordering::SeqCst), 0);

        let result = classifier.classify_detailed("invoice_tokyo.pdf", "pdf").await;
        assert_eq!(result.category, "travel");
        assert_eq!(result.source, MatchSource::Ai);
    }

    #[tokio::test]
    async fn test_ai_sentinel_empty_and_error_fall_through() {
        for answer in [Ok("Unsorted"), Ok("  "), Err("offline")] {
            let ai: Arc<dyn AiClassifier> = FixedAi::new(answer);
            let classifier = Classifier::new(Vec::new(), Some(ai));
            assert_eq!(classifier.classify("invoice_1.pdf", "pdf").await, "invoice");
        }
    }

    #[tokio::test]
    async fn test_classification_is_deterministic() {
        let classifier = Classifier::new(vec!["Acme".into()], None);
        for name in ["a.pdf", "report-q3.xlsx", "IMG_0001.HEIC", "acme.doc"] {
            let ext = name.rsplit('.').next().unwrap();
            let first = classifier.classify(name, ext).await;
            let second = classifier.classify(name, ext).await;
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Report.Final.PDF", "pdf"), "report.final");
        assert_eq!(file_stem("README", ""), "readme");
        assert_eq!(file_stem(".pdf", "pdf"), ".pdf");
    }
}
