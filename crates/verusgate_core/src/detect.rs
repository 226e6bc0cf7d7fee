//! Media-type detection from magic bytes.

use sha2::{Digest, Sha256};

use crate::decompress::Decompressor;
use crate::file::FileMetadata;

/// How many leading bytes the sniffers look at.
const SNIFF_LEN: usize = 512;

/// Magic-byte signature table. RIFF containers and MP4 need positional
/// checks and are handled separately.
const SIGNATURES: &[(&[u8], &str)] = &[
    // Images
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (&[0x89, 0x50, 0x4E, 0x47], "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (&[0x42, 0x4D], "image/bmp"),
    // Video
    (&[0x1A, 0x45, 0xDF, 0xA3], "video/webm"),
    // Audio
    (b"ID3", "audio/mpeg"),
    (&[0xFF, 0xFB], "audio/mpeg"),
    (b"OggS", "audio/ogg"),
    // Documents
    (b"%PDF", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    // Archives
    (&[0x1F, 0x8B], "application/x-gzip"),
    (b"Rar!", "application/x-rar-compressed"),
    (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], "application/x-7z-compressed"),
];

/// Fallback extension per detected MIME type.
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/bmp", "bmp"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/x-msvideo", "avi"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/x-gzip", "gz"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("text/html", "html"),
    ("text/css", "css"),
    ("text/javascript", "js"),
    ("text/plain", "txt"),
    ("application/octet-stream", "bin"),
];

/// Infers MIME type and extension from content, with a filename hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detector;

impl Detector {
    pub fn new() -> Self {
        Detector
    }

    /// Build metadata for a payload: MIME type, extension, size, gzip flag
    /// and content hash. The `encrypted` flag is the caller's business.
    pub fn detect(&self, content: &[u8], filename: &str) -> FileMetadata {
        let content_type = self.detect_mime(content);

        // Extension from the filename hint wins; fall back to the MIME map.
        let extension = filename
            .rsplit_once('.')
            .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
            .map(|(_, ext)| ext)
            .unwrap_or_else(|| extension_for(&content_type).to_string());

        FileMetadata {
            filename: filename.to_string(),
            size: content.len() as u64,
            content_type,
            extension,
            hash: hex::encode(Sha256::digest(content)),
            compressed: Decompressor::is_gzipped(content),
            encrypted: false,
            created_at: None,
        }
    }

    /// Detect the MIME type from the leading bytes.
    pub fn detect_mime(&self, content: &[u8]) -> String {
        if content.is_empty() {
            return "application/octet-stream".to_string();
        }

        if let Some(mime) = detect_by_signature(content) {
            return mime.to_string();
        }

        if Self::is_text_like(content) {
            return "text/plain; charset=utf-8".to_string();
        }

        "application/octet-stream".to_string()
    }

    /// Detect a file extension from content alone.
    pub fn detect_extension(&self, content: &[u8]) -> String {
        extension_for(&self.detect_mime(content)).to_string()
    }

    /// Heuristic text check over the first 512 bytes: text iff fewer than
    /// 30% of the sampled bytes fall outside tab/newline/CR/printable-ASCII.
    pub fn is_text_like(content: &[u8]) -> bool {
        if content.is_empty() {
            return false;
        }
        let sample = &content[..content.len().min(SNIFF_LEN)];
        let non_printable = sample
            .iter()
            .filter(|&&b| !matches!(b, 0x09 | 0x0A | 0x0D | 0x20..=0x7E))
            .count();
        (non_printable as f64) / (sample.len() as f64) < 0.3
    }
}

fn detect_by_signature(content: &[u8]) -> Option<&'static str> {
    // Too short to classify by magic bytes; the text heuristic decides.
    if content.len() < 16 {
        return None;
    }

    // RIFF is a container; bytes 8..12 pick the concrete format.
    if content.starts_with(b"RIFF") {
        let tag = content.get(8..12)?;
        return match tag {
            b"WAVE" => Some("audio/wav"),
            b"WEBP" => Some("image/webp"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }

    // ISO BMFF: the `ftyp` box starts at offset 4.
    if content.len() >= 8 && &content[4..8] == b"ftyp" {
        return Some("video/mp4");
    }

    SIGNATURES
        .iter()
        .find(|(magic, _)| content.starts_with(magic))
        .map(|(_, mime)| *mime)
}

fn extension_for(mime: &str) -> &'static str {
    // Strip any `; charset=...` suffix before the lookup.
    let base = mime.split(';').next().unwrap_or(mime).trim();
    EXTENSIONS
        .iter()
        .find(|(m, _)| *m == base)
        .map(|(_, ext)| *ext)
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_signatures() {
        let d = Detector::new();
        assert_eq!(
            d.detect_mime(b"GIF89a\x01\x02 plus trailing data"),
            "image/gif"
        );
        assert_eq!(
            d.detect_mime(&[
                0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01,
                0x00, 0x00, 0x01,
            ]),
            "image/jpeg"
        );
        assert_eq!(
            d.detect_mime(b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR"),
            "image/png"
        );
        assert_eq!(d.detect_mime(b"%PDF-1.7\n1 0 obj<<>>"), "application/pdf");
        assert_eq!(
            d.detect_mime(b"PK\x03\x04\x14\x00\x00\x00\x08\x00\x00\x00data"),
            "application/zip"
        );
        assert_eq!(
            d.detect_mime(&[
                0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ]),
            "application/x-gzip"
        );
        assert_eq!(
            d.detect_mime(b"ID3\x04\x00\x00\x00\x00\x00\x00tag payload"),
            "audio/mpeg"
        );
    }

    #[test]
    fn payloads_under_sixteen_bytes_skip_signature_matching() {
        let d = Detector::new();
        // A bare gzip magic is not enough to call it an archive.
        assert_eq!(
            d.detect_mime(&[0x1F, 0x8B, 0x08, 0x00]),
            "application/octet-stream"
        );
        // Short printable content still reads as text.
        assert_eq!(d.detect_mime(b"OggS short"), "text/plain; charset=utf-8");
    }

    #[test]
    fn riff_disambiguation() {
        let d = Detector::new();
        assert_eq!(d.detect_mime(b"RIFF\x00\x00\x00\x00WAVEfmt "), "audio/wav");
        assert_eq!(d.detect_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(
            d.detect_mime(b"RIFF\x00\x00\x00\x00AVI LIST"),
            "video/x-msvideo"
        );
        // Unknown RIFF flavour falls through to the binary default.
        assert_eq!(
            d.detect_mime(b"RIFF\x00\x00\x00\x00\xde\xad\xbe\xef\xde\xad\xbe\xef"),
            "application/octet-stream"
        );
    }

    #[test]
    fn mp4_ftyp_box_at_offset_four() {
        let d = Detector::new();
        assert_eq!(
            d.detect_mime(b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00"),
            "video/mp4"
        );
    }

    #[test]
    fn plain_text_detection() {
        let d = Detector::new();
        assert_eq!(
            d.detect_mime(b"Hello, World!"),
            "text/plain; charset=utf-8"
        );
        assert!(Detector::is_text_like(b"line one\nline two\r\n\ttabbed"));
        assert!(!Detector::is_text_like(&[0u8; 64]));
        assert!(!Detector::is_text_like(&[]));
    }

    #[test]
    fn extension_prefers_filename_hint() {
        let d = Detector::new();
        let gif = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\x00\x00\x00\xff\xff\xff\x00\x00\x00";
        let meta = d.detect(gif, "lee.gif");
        assert_eq!(meta.extension, "gif");
        assert_eq!(meta.content_type, "image/gif");

        // Hint wins even when it disagrees with the sniffed type.
        let meta = d.detect(gif, "picture.PNG");
        assert_eq!(meta.extension, "png");
    }

    #[test]
    fn extension_falls_back_to_mime_map() {
        let d = Detector::new();
        let meta = d.detect(b"Hello, World!", "");
        assert_eq!(meta.extension, "txt");

        let meta = d.detect(&[0x00, 0x01, 0x02, 0xFF, 0xFE], "");
        assert_eq!(meta.content_type, "application/octet-stream");
        assert_eq!(meta.extension, "bin");
    }

    #[test]
    fn metadata_carries_size_hash_and_gzip_flag() {
        let d = Detector::new();
        let meta = d.detect(b"Hello, World!", "");
        assert_eq!(meta.size, 13);
        assert_eq!(
            meta.hash,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert!(!meta.compressed);

        let meta = d.detect(&[0x1F, 0x8B, 0x08, 0x00], "");
        assert!(meta.compressed);
    }
}
