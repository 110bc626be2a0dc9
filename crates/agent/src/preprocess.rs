//! Turns inline document attachments into text summaries before generation.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use concierge_core::error::ProviderError;
use concierge_core::message::{Attachment, Message, Role, SessionId};
use concierge_core::provider::{ContentBlock, ContentPart, Provider, ProviderRequest, WireMessage};
use concierge_core::usage::{UsageCategory, UsageRecord, UsageRecorder};
use futures::future::join_all;
use regex_lite::Regex;
use tracing::{debug, info, warn};

use crate::emitter::StreamEmitter;
use crate::retry::RetryGovernor;
use crate::stream_event::{StatusPhase, StreamEvent};

/// Instruction sent alongside every document.
pub const EXTRACTION_PROMPT: &str = "Read the attached document and produce a structured, itemized summary \
for a sales engineer preparing a quotation. Use these sections, each as a bulleted list:\n\
1. General data: customer, project name, reference numbers, dates, deadlines and contacts.\n\
2. Technical scope: every requested product, service, quantity, dimension, material and specification.\n\
3. Contractual terms: payment, delivery, warranty, penalties, validity and any legal conditions.\n\
4. Open ambiguities: missing, contradictory or unclear information that must be clarified.\n\
Quote figures exactly as written. Write \"not stated\" for empty sections.";

const EXTRACTION_MAX_TOKENS: u32 = 4096;

static PAGE_OBJECT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"/Type\s*/Page\b").ok());

/// Best-effort page count from the raw bytes of a PDF.
///
/// Counts `/Type /Page` objects and ignores the `/Pages` tree nodes.
/// Returns 0 when nothing recognisable is found.
pub fn estimate_page_count(bytes: &[u8]) -> usize {
    let Some(re) = PAGE_OBJECT.as_ref() else {
        return 0;
    };
    let text = String::from_utf8_lossy(bytes);
    re.find_iter(&text).count()
}

/// Page estimate for a base64 payload. Undecodable input yields 0.
pub fn estimate_pages_base64(data: &str) -> usize {
    match STANDARD.decode(data.trim()) {
        Ok(bytes) => estimate_page_count(&bytes),
        Err(e) => {
            debug!(error = %e, "Attachment payload is not valid base64");
            0
        }
    }
}

/// Summarises documents on the current message with the extraction model.
pub struct DocumentPreprocessor {
    provider: Arc<dyn Provider>,
    usage: Arc<dyn UsageRecorder>,
    governor: RetryGovernor,
    model: String,
}

impl DocumentPreprocessor {
    pub fn new(
        provider: Arc<dyn Provider>,
        usage: Arc<dyn UsageRecorder>,
        governor: RetryGovernor,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            usage,
            governor,
            model: model.into(),
        }
    }

    /// Replace inline documents on the last message with summaries.
    ///
    /// Messages without such documents are returned as-is. Per-document
    /// failures become inline error markers; this never fails.
    pub async fn process(
        &self,
        mut messages: Vec<Message>,
        session_id: &SessionId,
        emitter: &StreamEmitter,
        notified: &AtomicBool,
    ) -> Vec<Message> {
        let Some(current) = messages.last_mut() else {
            return messages;
        };
        let documents: Vec<Attachment> = current
            .attachments
            .iter()
            .filter(|a| a.is_document() && a.has_payload())
            .cloned()
            .collect();
        if documents.is_empty() {
            return messages;
        }

        let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
        emitter
            .emit(StreamEvent::status_with(StatusPhase::AnalyzingPdf, names.join(", ")))
            .await;
        info!(documents = documents.len(), session_id = %session_id, "Analyzing attached documents");

        let sections = join_all(
            documents
                .iter()
                .map(|doc| self.summarize(doc, session_id, emitter, notified)),
        )
        .await;

        let mut content = current.content.clone();
        for section in sections {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(&section);
        }
        current.content = content;
        current.attachments = current
            .attachments
            .iter()
            .map(|a| if a.is_document() { a.without_payload() } else { a.clone() })
            .collect();

        messages
    }

    async fn summarize(
        &self,
        doc: &Attachment,
        session_id: &SessionId,
        emitter: &StreamEmitter,
        notified: &AtomicBool,
    ) -> String {
        let data = doc.data.clone().unwrap_or_default();
        let pages = estimate_pages_base64(&data);
        let header = match pages {
            0 => format!("=== DOCUMENT: {} (page count unknown) ===", doc.name),
            1 => format!("=== DOCUMENT: {} (1 page) ===", doc.name),
            n => format!("=== DOCUMENT: {} ({n} pages) ===", doc.name),
        };

        let body = match self.extract(doc, data, pages, session_id, emitter, notified).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(document = %doc.name, error = %e, "Document extraction failed");
                format!("[ERROR: could not analyze document '{}': {e}]", doc.name)
            }
        };

        format!("{header}\n{}\n=== END DOCUMENT ===", body.trim())
    }

    async fn extract(
        &self,
        doc: &Attachment,
        data: String,
        pages: usize,
        session_id: &SessionId,
        emitter: &StreamEmitter,
        notified: &AtomicBool,
    ) -> Result<String, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            system: None,
            messages: vec![WireMessage::parts(
                Role::User,
                vec![
                    ContentPart::Document {
                        media_type: doc.mime_type.clone(),
                        data,
                    },
                    ContentPart::Text {
                        text: EXTRACTION_PROMPT.to_string(),
                    },
                ],
            )],
            max_tokens: EXTRACTION_MAX_TOKENS,
            temperature: 0.0,
            tools: Vec::new(),
        };

        let response = self
            .governor
            .call(emitter, notified, StatusPhase::AnalyzingPdf, || {
                self.provider.complete(request.clone())
            })
            .await?;

        let record = UsageRecord::new(
            UsageCategory::DocumentExtraction,
            response.model.clone(),
            response.usage.input_tokens,
            response.usage.output_tokens,
        )
        .with_session(session_id)
        .with_meta("document", doc.name.clone())
        .with_meta("pages", pages as u64);
        if let Err(e) = self.usage.record(record).await {
            warn!(error = %e, "Failed to record extraction usage");
        }

        let summary: Vec<&str> = response
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse { .. } => None,
            })
            .collect();
        if summary.is_empty() {
            return Err(ProviderError::InvalidResponse("extraction returned no text".into()));
        }
        Ok(summary.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use std::time::Duration;

    const TWO_PAGE_PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
4 0 obj << /Type/Page /Parent 2 0 R >> endobj\n%%EOF";

    fn pdf(name: &str) -> Attachment {
        Attachment::new(name, "application/pdf", Some(STANDARD.encode(TWO_PAGE_PDF)))
    }

    fn preprocessor(provider: Arc<ScriptedProvider>, usage: Arc<RecordingUsage>) -> DocumentPreprocessor {
        DocumentPreprocessor::new(
            provider,
            usage,
            RetryGovernor::new(0, vec![Duration::ZERO]),
            "cheap-model",
        )
    }

    #[test]
    fn page_estimate_skips_page_tree() {
        assert_eq!(estimate_page_count(TWO_PAGE_PDF), 2);
        assert_eq!(estimate_page_count(b"not a pdf"), 0);
        assert_eq!(estimate_pages_base64("%%%not base64"), 0);
        assert_eq!(estimate_pages_base64(&STANDARD.encode(TWO_PAGE_PDF)), 2);
    }

    #[tokio::test]
    async fn message_without_documents_is_untouched() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let usage = Arc::new(RecordingUsage::new());
        let pre = preprocessor(provider.clone(), usage);
        let (emitter, rx) = StreamEmitter::channel(8);

        let image = Attachment::new("photo.png", "image/png", Some("aGVsbG8=".into()));
        let messages = vec![Message::user("what is this?").with_attachments(vec![image])];
        let out = pre
            .process(messages.clone(), &SessionId::new(), &emitter, &AtomicBool::new(false))
            .await;

        assert_eq!(out, messages);
        assert_eq!(provider.call_count(), 0);
        drop(emitter);
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn one_failed_document_does_not_abort_the_rest() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response("- Customer: ACME\n- Qty: 40 valves")),
            Err(ProviderError::InvalidResponse("corrupt file".into())),
        ]));
        let usage = Arc::new(RecordingUsage::new());
        let pre = preprocessor(provider.clone(), usage.clone());
        let (emitter, rx) = StreamEmitter::channel(8);

        let messages = vec![
            Message::user("please quote these").with_attachments(vec![pdf("rfq.pdf"), pdf("annex.pdf")]),
        ];
        let out = pre
            .process(messages, &SessionId::from("s-1"), &emitter, &AtomicBool::new(false))
            .await;

        let current = &out[0];
        assert!(current.content.starts_with("please quote these\n\n"));
        assert!(current.content.contains("=== DOCUMENT: rfq.pdf (2 pages) ==="));
        assert!(current.content.contains("- Customer: ACME"));
        assert!(current.content.contains("=== DOCUMENT: annex.pdf (2 pages) ==="));
        assert!(current.content.contains("[ERROR: could not analyze document 'annex.pdf'"));
        assert_eq!(current.content.matches("=== END DOCUMENT ===").count(), 2);
        assert!(current.attachments.iter().all(|a| !a.has_payload()));
        assert_eq!(current.attachments.len(), 2);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.model == "cheap-model" && r.tools.is_empty()));

        let records = usage.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, UsageCategory::DocumentExtraction);
        assert_eq!(records[0].metadata["document"], "rfq.pdf");
        assert_eq!(records[0].metadata["pages"], 2);

        drop(emitter);
        let events = collect(rx).await;
        assert_eq!(
            events[0],
            StreamEvent::status_with(StatusPhase::AnalyzingPdf, "rfq.pdf, annex.pdf")
        );
    }

    #[tokio::test]
    async fn images_keep_their_payload() {
        let provider = Arc::new(ScriptedProvider::replies(vec![text_response("summary")]));
        let pre = preprocessor(provider, Arc::new(RecordingUsage::new()));
        let (emitter, _rx) = StreamEmitter::channel(8);

        let image = Attachment::new("site.jpg", "image/jpeg", Some("aGVsbG8=".into()));
        let messages = vec![Message::user("").with_attachments(vec![pdf("brief.pdf"), image])];
        let out = pre
            .process(messages, &SessionId::new(), &emitter, &AtomicBool::new(false))
            .await;

        let current = &out[0];
        assert!(current.content.starts_with("=== DOCUMENT: brief.pdf"));
        assert!(!current.attachments[0].has_payload());
        assert!(current.attachments[1].has_payload());
    }
}
