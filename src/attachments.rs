//! Attachment materialization
//!
//! Turns an attachment descriptor plus its fetched bytes into exactly one
//! [`AttachmentRenderResult`], chosen by content type: full text for
//! text-like payloads, per-page text for PDFs (via `pdf-extract`), a data URI
//! for images, and a bounded base64 preview for everything else.

use std::panic::{self, AssertUnwindSafe};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::mime::{AttachmentDescriptor, decode_base64url, normalize_mime};

/// Base64 characters returned for binary attachments before truncation
pub const BINARY_PREVIEW_MAX_CHARS: usize = 10_000;
/// Base64 characters kept as a fallback when PDF parsing fails
pub const PDF_FALLBACK_MAX_CHARS: usize = 1_000;

/// Per-page PDF text extraction
///
/// Returns one string per page, in page order. Errors are returned as the
/// library's message text so the password heuristic can inspect them.
pub trait PdfTextExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8], password: Option<&str>) -> Result<Vec<String>, String>;
}

/// `pdf-extract` backed extractor
///
/// Panics inside the PDF library are caught and reported as errors;
/// malformed documents must not take the server down.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractBackend;

impl PdfTextExtractor for PdfExtractBackend {
    fn extract_pages(&self, bytes: &[u8], password: Option<&str>) -> Result<Vec<String>, String> {
        let Some(pw) = password else {
            return guarded(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
        };
        match guarded(|| pdf_extract::extract_text_from_mem_by_pages_encrypted(bytes, pw)) {
            Err(message) if is_not_encrypted(&message) => {
                debug!("password supplied for an unencrypted pdf; ignoring it");
                guarded(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            }
            other => other,
        }
    }
}

fn guarded<E: std::fmt::Display>(
    extract: impl FnOnce() -> Result<Vec<String>, E>,
) -> Result<Vec<String>, String> {
    match panic::catch_unwind(AssertUnwindSafe(extract)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            warn!(%reason, "pdf parser panicked");
            Err(format!("PDF parser crashed: {reason}"))
        }
    }
}

/// One PDF page that produced text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPage {
    /// 1-based page number
    pub number: usize,
    pub text: String,
}

/// Outcome of a single materialization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentRenderResult {
    /// Text-like attachment, decoded in full
    TextContent { text: String },
    /// PDF with at least one page of text
    PdfExtractedText { pages: Vec<PdfPage> },
    /// PDF yielded pages but none had text (scanned or image-only)
    PdfNoText,
    /// PDF is encrypted and could not be opened
    PdfNeedsPassword { password_supplied: bool },
    /// Image as an inline `data:` URI
    ImageDataUri { data_uri: String },
    /// Other binary content as (possibly truncated) base64
    BinaryPreview {
        base64: String,
        total_len: usize,
        truncated: bool,
    },
    /// Materialization failed; `base64_fallback` keeps partial access to the data
    Error {
        message: String,
        base64_fallback: Option<String>,
    },
}

/// A rendered attachment with the metadata shared by every outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAttachment {
    pub filename: String,
    pub mime_type: String,
    /// Byte size of the payload (declared size when the payload never decoded)
    pub size: u64,
    pub result: AttachmentRenderResult,
}

/// Content-type driven attachment renderer
pub struct AttachmentMaterializer {
    pdf: Box<dyn PdfTextExtractor>,
}

impl Default for AttachmentMaterializer {
    fn default() -> Self {
        Self::new(PdfExtractBackend)
    }
}

impl AttachmentMaterializer {
    pub fn new(pdf: impl PdfTextExtractor + 'static) -> Self {
        Self { pdf: Box::new(pdf) }
    }

    /// Decode a base64url payload from the mailbox, then [`render`](Self::render) it
    ///
    /// A payload that does not decode becomes the `Error` variant.
    pub fn render_encoded(
        &self,
        descriptor: &AttachmentDescriptor,
        encoded: &str,
        password: Option<&str>,
    ) -> RenderedAttachment {
        match decode_base64url(encoded) {
            Ok(raw) => self.render(descriptor, &raw, password),
            Err(e) => RenderedAttachment {
                filename: descriptor.filename.clone(),
                mime_type: descriptor.mime_type.clone(),
                size: descriptor.declared_size,
                result: AttachmentRenderResult::Error {
                    message: e.to_string(),
                    base64_fallback: None,
                },
            },
        }
    }

    /// Render fetched attachment bytes according to the descriptor's content type
    pub fn render(
        &self,
        descriptor: &AttachmentDescriptor,
        raw: &[u8],
        password: Option<&str>,
    ) -> RenderedAttachment {
        let mime = normalize_mime(&descriptor.mime_type);
        let result = if mime == "application/pdf" {
            self.render_pdf(raw, password)
        } else if is_text_like(&mime) {
            AttachmentRenderResult::TextContent {
                text: String::from_utf8_lossy(raw).into_owned(),
            }
        } else if mime.starts_with("image/") {
            AttachmentRenderResult::ImageDataUri {
                data_uri: format!("data:{mime};base64,{}", STANDARD.encode(raw)),
            }
        } else {
            binary_preview(raw)
        };

        RenderedAttachment {
            filename: descriptor.filename.clone(),
            mime_type: descriptor.mime_type.clone(),
            size: raw.len() as u64,
            result,
        }
    }

    fn render_pdf(&self, raw: &[u8], password: Option<&str>) -> AttachmentRenderResult {
        let password = password.filter(|p| !p.is_empty());
        match self.pdf.extract_pages(raw, password) {
            Ok(pages) if pages.is_empty() => {
                // decryption succeeded but no page object was readable
                let message = if password.is_some() {
                    "The PDF opened with the supplied password but none of its pages could be read"
                } else {
                    "The PDF has no readable pages"
                };
                warn!(password_supplied = password.is_some(), "pdf yielded zero pages");
                pdf_error(raw, message.to_owned())
            }
            Ok(pages) => {
                let pages: Vec<PdfPage> = pages
                    .into_iter()
                    .enumerate()
                    .filter_map(|(idx, text)| {
                        let text = text.trim();
                        (!text.is_empty()).then(|| PdfPage {
                            number: idx + 1,
                            text: text.to_owned(),
                        })
                    })
                    .collect();
                debug!(pages_with_text = pages.len(), "pdf text extracted");
                if pages.is_empty() {
                    AttachmentRenderResult::PdfNoText
                } else {
                    AttachmentRenderResult::PdfExtractedText { pages }
                }
            }
            Err(message) if is_password_error(&message) => {
                debug!(%message, "pdf requires a password");
                AttachmentRenderResult::PdfNeedsPassword {
                    password_supplied: password.is_some(),
                }
            }
            Err(message) => {
                warn!(%message, "pdf text extraction failed");
                pdf_error(raw, format!("Could not extract text from PDF: {message}"))
            }
        }
    }
}

impl RenderedAttachment {
    /// Render as tool output text
    pub fn to_text(&self) -> String {
        let header = format!(
            "Attachment: {}\nType: {}\nSize: {} bytes",
            self.filename, self.mime_type, self.size
        );
        let body = match &self.result {
            AttachmentRenderResult::TextContent { text } => format!("--- Content ---\n{text}"),
            AttachmentRenderResult::PdfExtractedText { pages } => {
                let sections = pages
                    .iter()
                    .map(|p| format!("--- Page {} ---\n{}", p.number, p.text))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                format!(
                    "--- Extracted Text ({} page(s) with text) ---\n\n{sections}",
                    pages.len()
                )
            }
            AttachmentRenderResult::PdfNoText => "This PDF contains no extractable text. \
                 It is likely a scanned or image-based document."
                .to_owned(),
            AttachmentRenderResult::PdfNeedsPassword {
                password_supplied: false,
            } => "This PDF is password-protected. Call get_email_attachment again \
                  with the `password` argument to unlock it."
                .to_owned(),
            AttachmentRenderResult::PdfNeedsPassword {
                password_supplied: true,
            } => "This PDF is password-protected and the provided password did not work. \
                  Check the password and try again."
                .to_owned(),
            AttachmentRenderResult::ImageDataUri { data_uri } => {
                format!("--- Image (data URI) ---\n{data_uri}")
            }
            AttachmentRenderResult::BinaryPreview {
                base64,
                total_len,
                truncated: true,
            } => format!(
                "--- Base64 Content (first {} of {total_len} characters) ---\n{base64}",
                base64.len()
            ),
            AttachmentRenderResult::BinaryPreview {
                base64, total_len, ..
            } => format!("--- Base64 Content ({total_len} characters) ---\n{base64}"),
            AttachmentRenderResult::Error {
                message,
                base64_fallback,
            } => match base64_fallback {
                Some(fallback) => format!(
                    "Error: {message}\n\n--- Base64 Content (first {} characters) ---\n{fallback}",
                    fallback.len()
                ),
                None => format!("Error: {message}"),
            },
        };
        format!("{header}\n\n{body}")
    }
}

/// Whether a PDF library failure means the document is encrypted
///
/// The library reports encryption only through its message text, so this
/// matches on `password`, `encrypt` and `decrypt`, case-insensitively.
/// A "not encrypted" complaint is never a password failure.
pub fn is_password_error(message: &str) -> bool {
    if is_not_encrypted(message) {
        return false;
    }
    let lower = message.to_ascii_lowercase();
    ["password", "encrypt", "decrypt"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn is_not_encrypted(message: &str) -> bool {
    message.to_ascii_lowercase().contains("not encrypted")
}

fn pdf_error(raw: &[u8], message: String) -> AttachmentRenderResult {
    let mut fallback = STANDARD.encode(raw);
    fallback.truncate(PDF_FALLBACK_MAX_CHARS);
    AttachmentRenderResult::Error {
        message,
        base64_fallback: Some(fallback),
    }
}

fn is_text_like(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/json" || mime == "application/xml"
}

fn binary_preview(raw: &[u8]) -> AttachmentRenderResult {
    let mut base64 = STANDARD.encode(raw);
    let total_len = base64.len();
    let truncated = total_len > BINARY_PREVIEW_MAX_CHARS;
    if truncated {
        base64.truncate(BINARY_PREVIEW_MAX_CHARS);
    }
    AttachmentRenderResult::BinaryPreview {
        base64,
        total_len,
        truncated,
    }
}
