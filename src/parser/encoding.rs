//! Text decoding for logger exports
//!
//! JPV loggers write UTF-16 with a byte-order mark; RB exports are UTF-8,
//! sometimes with a BOM. Files without a BOM are sniffed for the zero bytes
//! that UTF-16 encodes ASCII with.

use tracing::debug;

/// Byte layout detected for a raw file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// Decode raw bytes into text, never failing
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    let encoding = detect_encoding(bytes);
    let text = match encoding {
        TextEncoding::Utf16Le => decode_utf16(strip_bom(bytes, &[0xFF, 0xFE]), u16::from_le_bytes),
        TextEncoding::Utf16Be => decode_utf16(strip_bom(bytes, &[0xFE, 0xFF]), u16::from_be_bytes),
        TextEncoding::Utf8 => {
            let body = strip_bom(bytes, &[0xEF, 0xBB, 0xBF]);
            match std::str::from_utf8(body) {
                Ok(text) => text.to_string(),
                Err(e) => {
                    debug!("Invalid UTF-8 at byte {}, decoding lossily", e.valid_up_to());
                    String::from_utf8_lossy(body).into_owned()
                }
            }
        }
    };
    (text, encoding)
}

fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return TextEncoding::Utf16Le;
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return TextEncoding::Utf16Be;
    }
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return TextEncoding::Utf8;
    }

    // ASCII in UTF-16 leaves every other byte zero
    let sample = &bytes[..bytes.len().min(512)];
    if sample.len() >= 4 {
        let pairs = sample.len() / 2;
        let even_zero = sample.iter().step_by(2).filter(|b| **b == 0).count();
        let odd_zero = sample.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
        if odd_zero * 10 >= pairs * 4 && even_zero * 10 < pairs {
            return TextEncoding::Utf16Le;
        }
        if even_zero * 10 >= pairs * 4 && odd_zero * 10 < pairs {
            return TextEncoding::Utf16Be;
        }
    }
    TextEncoding::Utf8
}

fn strip_bom<'a>(bytes: &'a [u8], bom: &[u8]) -> &'a [u8] {
    bytes.strip_prefix(bom).unwrap_or(bytes)
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| read([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
