//! Message part tree and MIME normalization
//!
//! Gmail delivers messages as a JSON tree of parts. This module walks that
//! tree to extract the first plain text and first HTML body, enumerates
//! attachment descriptors in document order, and reduces HTML to visible
//! text with `ammonia` + `html2text`.

use std::collections::HashSet;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Parts nested deeper than this are ignored
const MAX_PART_DEPTH: usize = 64;
/// Render width for html2text; wide enough that paragraphs are not re-wrapped
const HTML_RENDER_WIDTH: usize = 10_000;
/// Content type assumed for attachments that do not declare one
pub const DEFAULT_ATTACHMENT_MIME: &str = "application/octet-stream";

/// url-safe base64 that accepts both padded and unpadded input
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// standard-alphabet fallback for payloads that were not url-safe encoded
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// One node of a message's part hierarchy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePart {
    /// Gmail part id (`0`, `0.1`, ...)
    pub part_id: Option<String>,
    /// Content type without parameters, e.g. `text/plain`
    pub mime_type: String,
    /// Non-empty for attachments
    pub filename: Option<String>,
    /// Part headers (only the root's are used)
    pub headers: Vec<Header>,
    /// Inline data or remote attachment reference
    pub body: BodyRef,
    /// Child parts in document order
    pub parts: Vec<MessagePart>,
}

/// Header name/value pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Part body: inline base64url payload and/or a remote attachment id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyRef {
    /// Remote attachment id, fetched separately
    pub attachment_id: Option<String>,
    /// Declared size in bytes
    pub size: u64,
    /// Inline base64url payload
    pub data: Option<String>,
}

impl MessagePart {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Non-empty filename, if any
    fn attachment_name(&self) -> Option<&str> {
        self.filename.as_deref().filter(|f| !f.is_empty())
    }

    fn inline_data(&self) -> Option<&str> {
        self.body.data.as_deref().filter(|d| !d.is_empty())
    }
}

/// Plain and HTML body text of a message; either may be empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBody {
    pub plain_text: String,
    pub html_text: String,
}

/// Whether an attachment may need a password to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionHint {
    /// Not a format that carries password protection
    None,
    /// PDF; protection can only be confirmed on an open attempt
    Unknown,
}

/// Attachment metadata collected from the part tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub mime_type: String,
    /// Size reported by the mailbox, 0 when unknown
    pub declared_size: u64,
    /// Id used to fetch the payload; the part id when Gmail inlined the body
    pub attachment_id: String,
    pub protection: ProtectionHint,
    /// Small attachments arrive with their payload inline
    pub inline_data: Option<String>,
}

/// Outcome of looking up an attachment id in a catalog
#[derive(Debug, PartialEq, Eq)]
pub enum AttachmentLookup<'a> {
    /// Exact match, or the single attachment on the message
    Found(&'a AttachmentDescriptor),
    /// No match; filenames that do exist
    NotFound { available: Vec<String> },
}

/// Extract the first plain text and first HTML body from a part tree
///
/// Pre-order traversal over the whole tree. Each type resolves
/// independently: a plain text value found early does not stop the search
/// for HTML in later or nested parts, and later parts never overwrite a value
/// already set.
pub fn extract_body(root: &MessagePart) -> NormalizedBody {
    let mut body = NormalizedBody::default();
    walk_body(root, 0, &mut body);
    body
}

fn walk_body(part: &MessagePart, depth: usize, body: &mut NormalizedBody) {
    if depth > MAX_PART_DEPTH {
        debug!(depth, "part tree exceeds depth cap; skipping subtree");
        return;
    }

    if part.attachment_name().is_none()
        && let Some(data) = part.inline_data()
    {
        let ctype = normalize_mime(&part.mime_type);
        if ctype == "text/plain" && body.plain_text.is_empty() {
            body.plain_text = decode_text_lossy(data);
        } else if ctype == "text/html" && body.html_text.is_empty() {
            body.html_text = decode_text_lossy(data);
        }
    }

    for child in &part.parts {
        walk_body(child, depth + 1, body);
    }
}

/// Enumerate attachments in document order
///
/// A part qualifies iff it carries a non-empty filename, regardless of
/// content type or nesting depth.
pub fn collect_attachments(root: &MessagePart) -> Vec<AttachmentDescriptor> {
    let mut out = Vec::new();
    walk_attachments(root, 0, &mut out);
    out
}

fn walk_attachments(part: &MessagePart, depth: usize, out: &mut Vec<AttachmentDescriptor>) {
    if depth > MAX_PART_DEPTH {
        return;
    }

    if let Some(filename) = part.attachment_name() {
        let mime_type = match normalize_mime(&part.mime_type) {
            m if m.is_empty() => DEFAULT_ATTACHMENT_MIME.to_owned(),
            m => m,
        };
        let protection = if mime_type == "application/pdf" {
            ProtectionHint::Unknown
        } else {
            ProtectionHint::None
        };
        out.push(AttachmentDescriptor {
            filename: filename.to_owned(),
            mime_type,
            declared_size: part.body.size,
            attachment_id: part
                .body
                .attachment_id
                .clone()
                .or_else(|| part.part_id.clone())
                .unwrap_or_default(),
            protection,
            inline_data: part.inline_data().map(str::to_owned),
        });
    }

    for child in &part.parts {
        walk_attachments(child, depth + 1, out);
    }
}

/// Resolve a requested attachment id against a freshly collected catalog
///
/// When the message has exactly one attachment, an unknown id resolves to it.
/// Callers frequently pass a filename or a stale id, and with one candidate
/// there is nothing to disambiguate.
pub fn resolve_attachment<'a>(
    catalog: &'a [AttachmentDescriptor],
    requested_id: &str,
) -> AttachmentLookup<'a> {
    if let Some(found) = catalog
        .iter()
        .find(|a| !a.attachment_id.is_empty() && a.attachment_id == requested_id)
    {
        return AttachmentLookup::Found(found);
    }

    if let [only] = catalog {
        debug!(
            requested_id,
            filename = %only.filename,
            "attachment id not found; using the only attachment"
        );
        return AttachmentLookup::Found(only);
    }

    AttachmentLookup::NotFound {
        available: catalog.iter().map(|a| a.filename.clone()).collect(),
    }
}

/// Decode a Gmail base64url payload
///
/// Padding is optional, embedded whitespace is ignored, and the standard
/// alphabet is accepted as a fallback.
///
/// # Errors
///
/// - `Decode` if the payload is not base64 in either alphabet
pub fn decode_base64url(data: &str) -> AppResult<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    URL_SAFE_LENIENT
        .decode(compact.as_bytes())
        .or_else(|_| STANDARD_LENIENT.decode(compact.as_bytes()))
        .map_err(|e| AppError::Decode(format!("invalid base64 payload: {e}")))
}

/// Decode a base64url payload to text, never failing
///
/// Invalid UTF-8 sequences become U+FFFD; an undecodable payload yields an
/// empty string.
pub fn decode_text_lossy(data: &str) -> String {
    match decode_base64url(data) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!(error = %e, "dropping undecodable body payload");
            String::new()
        }
    }
}

/// Reduce HTML to visible text
///
/// Removes `script`, `style`, `head` and `title` elements with their content,
/// renders the remainder so block elements land on separate lines, then trims
/// every line and drops the empty ones.
pub fn html_to_text(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .clean_content_tags(HashSet::from(["script", "style", "head", "title"]))
        .rm_tags(&["a", "img"]);
    let cleaned = builder.clean(html).to_string();

    let rendered = match html2text::from_read(cleaned.as_bytes(), HTML_RENDER_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "html render failed; using sanitized markup");
            cleaned
        }
    };

    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowercase a content type and strip its parameters
pub fn normalize_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::{
        AttachmentLookup, BodyRef, MAX_PART_DEPTH, MessagePart, ProtectionHint, collect_attachments,
        decode_base64url, decode_text_lossy, extract_body, html_to_text, resolve_attachment,
        truncate_chars,
    };

    fn text_part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime.to_owned(),
            body: BodyRef {
                data: Some(URL_SAFE_NO_PAD.encode(text)),
                size: text.len() as u64,
                ..BodyRef::default()
            },
            ..MessagePart::default()
        }
    }

    fn attachment(name: &str, mime: &str, id: &str) -> MessagePart {
        MessagePart {
            mime_type: mime.to_owned(),
            filename: Some(name.to_owned()),
            body: BodyRef {
                attachment_id: Some(id.to_owned()),
                size: 42,
                data: None,
            },
            ..MessagePart::default()
        }
    }

    fn multipart(mime: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: mime.to_owned(),
            parts,
            ..MessagePart::default()
        }
    }

    #[test]
    fn truncates_unicode_by_character() {
        let input = "a😀b😀c".to_owned();
        let out = truncate_chars(input, 4);
        assert_eq!(out, "a😀b😀");
    }

    #[test]
    fn single_part_body_is_extracted() {
        let body = extract_body(&text_part("text/plain", "Hello there"));
        assert_eq!(body.plain_text, "Hello there");
        assert!(body.html_text.is_empty());
    }

    #[test]
    fn first_plain_part_wins_and_html_still_resolves() {
        let root = multipart(
            "multipart/mixed",
            vec![
                text_part("text/plain", "first"),
                text_part("text/plain", "second"),
                multipart(
                    "multipart/alternative",
                    vec![
                        text_part("text/plain", "nested"),
                        text_part("text/html", "<p>html one</p>"),
                    ],
                ),
                text_part("text/html", "<p>html two</p>"),
            ],
        );

        let body = extract_body(&root);
        assert_eq!(body.plain_text, "first");
        assert_eq!(body.html_text, "<p>html one</p>");
    }

    #[test]
    fn empty_plain_part_does_not_block_later_one() {
        let root = multipart(
            "multipart/alternative",
            vec![text_part("text/plain", ""), text_part("text/plain", "real")],
        );
        assert_eq!(extract_body(&root).plain_text, "real");
    }

    #[test]
    fn named_text_parts_are_attachments_not_body() {
        let mut notes = text_part("text/plain", "attached notes");
        notes.filename = Some("notes.txt".to_owned());
        let root = multipart("multipart/mixed", vec![notes, text_part("text/plain", "body")]);

        assert_eq!(extract_body(&root).plain_text, "body");
        let attachments = collect_attachments(&root);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "notes.txt");
        assert!(attachments[0].inline_data.is_some());
    }

    #[test]
    fn inline_attachments_are_addressed_by_part_id() {
        let mut notes = text_part("text/plain", "attached notes");
        notes.filename = Some("notes.txt".to_owned());
        notes.part_id = Some("1.2".to_owned());

        let attachments = collect_attachments(&notes);
        assert_eq!(attachments[0].attachment_id, "1.2");
    }

    #[test]
    fn content_type_parameters_and_case_are_ignored() {
        let body = extract_body(&text_part("Text/Plain; charset=utf-8", "hi"));
        assert_eq!(body.plain_text, "hi");
    }

    #[test]
    fn attachments_follow_document_order_at_any_depth() {
        let root = multipart(
            "multipart/mixed",
            vec![
                attachment("a.pdf", "application/pdf", "id-a"),
                multipart(
                    "multipart/related",
                    vec![
                        text_part("text/html", "<p>x</p>"),
                        multipart(
                            "multipart/mixed",
                            vec![attachment("b.png", "image/png", "id-b")],
                        ),
                    ],
                ),
                attachment("c.bin", "", "id-c"),
            ],
        );

        let attachments = collect_attachments(&root);
        let names: Vec<&str> = attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, ["a.pdf", "b.png", "c.bin"]);
        assert_eq!(attachments[0].protection, ProtectionHint::Unknown);
        assert_eq!(attachments[1].protection, ProtectionHint::None);
        assert_eq!(attachments[2].mime_type, "application/octet-stream");
        assert_eq!(attachments[0].declared_size, 42);
    }

    fn nested(leaf: MessagePart, levels: usize) -> MessagePart {
        (0..levels).fold(leaf, |inner, _| multipart("multipart/mixed", vec![inner]))
    }

    #[test]
    fn parts_beyond_depth_cap_are_ignored() {
        // children of the root sit at depth 1, so `levels` here lands the leaf at levels + 1
        let root = multipart(
            "multipart/mixed",
            vec![
                nested(text_part("text/plain", "too deep"), MAX_PART_DEPTH),
                nested(attachment("deep.pdf", "application/pdf", "id-deep"), MAX_PART_DEPTH),
                text_part("text/plain", "shallow"),
                attachment("top.png", "image/png", "id-top"),
            ],
        );

        assert_eq!(extract_body(&root).plain_text, "shallow");
        let names: Vec<String> = collect_attachments(&root)
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, ["top.png"]);
    }

    #[test]
    fn parts_at_depth_cap_are_still_read() {
        let root = multipart(
            "multipart/mixed",
            vec![
                nested(text_part("text/plain", "at cap"), MAX_PART_DEPTH - 1),
                nested(attachment("cap.pdf", "application/pdf", "id-cap"), MAX_PART_DEPTH - 1),
            ],
        );

        assert_eq!(extract_body(&root).plain_text, "at cap");
        assert_eq!(collect_attachments(&root)[0].attachment_id, "id-cap");
    }

    #[test]
    fn missing_size_defaults_to_zero() {
        let part: MessagePart = serde_json::from_str(
            r#"{"mimeType":"image/png","filename":"x.png","body":{"attachmentId":"z"}}"#,
        )
        .expect("decode");
        let attachments = collect_attachments(&part);
        assert_eq!(attachments[0].declared_size, 0);
        assert_eq!(attachments[0].attachment_id, "z");
    }

    #[test]
    fn resolve_prefers_exact_id() {
        let root = multipart(
            "multipart/mixed",
            vec![
                attachment("a.pdf", "application/pdf", "id-a"),
                attachment("b.pdf", "application/pdf", "id-b"),
            ],
        );
        let catalog = collect_attachments(&root);
        match resolve_attachment(&catalog, "id-b") {
            AttachmentLookup::Found(a) => assert_eq!(a.filename, "b.pdf"),
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn resolve_falls_back_to_single_attachment() {
        let root = multipart(
            "multipart/mixed",
            vec![attachment("only.pdf", "application/pdf", "real-id")],
        );
        let catalog = collect_attachments(&root);
        match resolve_attachment(&catalog, "stale-id") {
            AttachmentLookup::Found(a) => assert_eq!(a.filename, "only.pdf"),
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn resolve_lists_filenames_when_ambiguous() {
        let root = multipart(
            "multipart/mixed",
            vec![
                attachment("a.pdf", "application/pdf", "id-a"),
                attachment("b.pdf", "application/pdf", "id-b"),
            ],
        );
        let catalog = collect_attachments(&root);
        assert_eq!(
            resolve_attachment(&catalog, "nope"),
            AttachmentLookup::NotFound {
                available: vec!["a.pdf".to_owned(), "b.pdf".to_owned()]
            }
        );
    }

    #[test]
    fn decode_round_trips_utf8() {
        let original = "Grüße, 世界! ~~~???";
        let encoded = URL_SAFE_NO_PAD.encode(original);
        assert_eq!(decode_text_lossy(&encoded), original);
    }

    #[test]
    fn decode_accepts_padding_and_standard_alphabet() {
        assert_eq!(decode_base64url("aGk=").expect("padded"), b"hi");
        assert_eq!(decode_base64url("+/8=").expect("standard"), [0xfb, 0xff]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let encoded = URL_SAFE_NO_PAD.encode([b'o', b'k', 0xff, 0xfe]);
        let text = decode_text_lossy(&encoded);
        assert!(text.starts_with("ok"));
        assert!(text.contains('\u{fffd}'));
    }

    #[test]
    fn malformed_base64_yields_empty_text() {
        assert_eq!(decode_text_lossy("!!not base64!!"), "");
    }

    #[test]
    fn html_reduction_drops_scripts_and_separates_blocks() {
        let html = "<html><head><title>Title</title><style>p { color: red }</style></head>\
                    <body><script>var secret = 1;</script><p>  Hello  </p><div>World</div></body></html>";
        let text = html_to_text(html);

        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("secret"));
        assert!(!text.contains("color"));
        assert!(!text.contains("Title"));
        assert!(text.lines().all(|l| !l.is_empty() && l == l.trim()));
        assert!(text.lines().count() >= 2);
    }
}
