//! MIME types.

/// Placeholder assets.
pub const SVG: &str = "image/svg+xml";

pub const PNG: &str = "image/png";
pub const JPEG: &str = "image/jpeg";
pub const GIF: &str = "image/gif";
pub const WEBP: &str = "image/webp";
pub const BMP: &str = "image/bmp";
pub const ICO: &str = "image/x-icon";

/// Fallback for content that matches no signature.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess the MIME type of blob content from its leading bytes.
pub fn sniff(data: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", PNG),
        (b"\xff\xd8\xff", JPEG),
        (b"GIF87a", GIF),
        (b"GIF89a", GIF),
        (b"BM", BMP),
        (b"\x00\x00\x01\x00", ICO),
    ];

    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return mime;
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return WEBP;
    }
    if looks_like_svg(data) {
        return SVG;
    }
    OCTET_STREAM
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(512)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_images() {
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), PNG);
        assert_eq!(sniff(b"\xff\xd8\xff\xe0\0\x10JFIF"), JPEG);
        assert_eq!(sniff(b"GIF89a\x01\0\x01\0"), GIF);
        assert_eq!(sniff(b"RIFF\x24\0\0\0WEBPVP8 "), WEBP);
        assert_eq!(sniff(b"BM\x36\0\0\0"), BMP);
        assert_eq!(sniff(b"\0\0\x01\0\x01\0"), ICO);
    }

    #[test]
    fn sniffs_svg() {
        assert_eq!(sniff(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"), SVG);
        assert_eq!(sniff(b"<?xml version=\"1.0\"?>\n<svg/>"), SVG);
        assert_eq!(sniff(b"<?xml version=\"1.0\"?>\n<html/>"), OCTET_STREAM);
    }

    #[test]
    fn unknown_bytes_fall_back() {
        assert_eq!(sniff(&[0x01, 0x02, 0x03]), OCTET_STREAM);
        assert_eq!(sniff(b""), OCTET_STREAM);
        assert_eq!(sniff(b"RIFF\0\0\0\0WAVE"), OCTET_STREAM);
    }
}
