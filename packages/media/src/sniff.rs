//! Content sniffing by magic bytes.

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// EICAR anti-malware test string.
const EICAR: &[u8] = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// MIME type inferred from the leading bytes, or `None` when unrecognised.
pub fn sniff_mime(head: &[u8]) -> Option<&'static str> {
    let starts = |magic: &[u8]| head.starts_with(magic);

    if starts(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if starts(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if starts(b"GIF87a") || starts(b"GIF89a") {
        return Some("image/gif");
    }
    if starts(b"RIFF") && head.len() >= 12 {
        return match &head[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return match &head[8..12] {
            b"qt  " => Some("video/quicktime"),
            b"M4A " | b"M4B " => Some("audio/mp4"),
            _ => Some("video/mp4"),
        };
    }
    if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if starts(b"ID3") {
        return Some("audio/mpeg");
    }
    if head.len() >= 2 && head[0] == 0xFF {
        // ADTS has layer bits 00, MPEG audio frames do not.
        if head[1] & 0xF6 == 0xF0 {
            return Some("audio/aac");
        }
        if head[1] & 0xE0 == 0xE0 {
            return Some("audio/mpeg");
        }
    }
    if starts(b"%PDF-") {
        return Some("application/pdf");
    }
    if starts(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        return Some("application/msword");
    }
    if starts(b"PK\x03\x04") {
        return Some("application/zip");
    }
    if !head.is_empty() && !head.contains(&0) && std::str::from_utf8(trim_partial_utf8(head)).is_ok()
    {
        return Some("text/plain");
    }
    None
}

/// The head may end mid-codepoint.
fn trim_partial_utf8(head: &[u8]) -> &[u8] {
    match std::str::from_utf8(head) {
        Ok(_) => head,
        Err(e) if e.error_len().is_none() => &head[..e.valid_up_to()],
        Err(_) => head,
    }
}

/// Effective MIME for an upload. The declared type only decides when
/// sniffing is inconclusive, or to name a zip container as a docx.
pub fn effective_mime(head: &[u8], declared: Option<&str>) -> String {
    let declared = declared
        .map(|d| d.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty());

    match sniff_mime(head) {
        Some("application/zip") if declared.as_deref() == Some(DOCX) => DOCX.to_string(),
        Some(mime) => mime.to_string(),
        None => declared.unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

/// Whether the content carries a known malware test signature.
pub fn has_malware_signature(head: &[u8]) -> bool {
    head.windows(EICAR.len()).any(|w| w == EICAR)
}
