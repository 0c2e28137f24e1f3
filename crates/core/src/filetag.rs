//! Attachment references embedded in chat text.
//!
//! A file shared in a room is sent as a chat message with the literal body
//! `[FILE]:{id}:{filename}:{contentType}`; the receiver resolves the id against
//! the file-retrieval endpoint. Anything that does not parse as a tag is plain
//! chat text.

/// Prefix marking a chat body as a file reference.
pub const FILE_TAG_PREFIX: &str = "[FILE]:";

/// A parsed file reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTag {
    /// Server-side file id.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// MIME type reported at upload.
    pub content_type: String,
}

impl FileTag {
    /// Render the tag back into its wire form.
    pub fn render(&self) -> String {
        format!(
            "{}{}:{}:{}",
            FILE_TAG_PREFIX, self.id, self.filename, self.content_type
        )
    }

    /// Parse a chat body into a file tag. Returns `None` for plain text or a
    /// malformed tag; the caller renders those bodies verbatim.
    pub fn parse(body: &str) -> Option<Self> {
        let rest = body.strip_prefix(FILE_TAG_PREFIX)?;
        let mut parts = rest.splitn(3, ':');
        let id = parts.next()?;
        let filename = parts.next()?;
        let content_type = parts.next()?;
        if id.is_empty() || filename.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
        })
    }

    /// Path of the download endpoint for this file.
    pub fn download_path(&self) -> String {
        format!("/api/v1/files/{}", self.id)
    }

    /// Whether the attachment is an image and can be previewed inline.
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render_round_trip() {
        let tag = FileTag::parse("[FILE]:42:report.pdf:application/pdf").unwrap();
        assert_eq!(tag.id, "42");
        assert_eq!(tag.filename, "report.pdf");
        assert_eq!(tag.content_type, "application/pdf");
        assert_eq!(tag.render(), "[FILE]:42:report.pdf:application/pdf");
        assert_eq!(tag.download_path(), "/api/v1/files/42");
        assert!(!tag.is_image());
    }

    #[test]
    fn test_image_detection() {
        let tag = FileTag::parse("[FILE]:7:cat.png:image/png").unwrap();
        assert!(tag.is_image());
    }

    #[test]
    fn test_content_type_may_contain_colon_free_subtype_only() {
        // splitn keeps anything after the second colon in content_type
        let tag = FileTag::parse("[FILE]:1:a.bin:application/x-foo:bar").unwrap();
        assert_eq!(tag.content_type, "application/x-foo:bar");
    }

    #[test]
    fn test_plain_text_is_not_a_tag() {
        assert!(FileTag::parse("hello world").is_none());
        assert!(FileTag::parse("[FILE]:").is_none());
        assert!(FileTag::parse("[FILE]::name:type").is_none());
    }
}
