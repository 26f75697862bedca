//! pH reading decoding
//!
//! The meter answers a "P\r" query with an ASCII line such as `7.01\r` or
//! `pH 7.01 25.0C\r`. The first decimal number is taken as the pH value.

use serde::Serialize;
use std::fmt;

/// One decoded meter response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhReading {
    /// Response text, trimmed
    pub raw: String,
    /// First number in the response, if any
    pub ph: Option<f64>,
}

impl PhReading {
    /// Decode a raw response. Never fails; non-numeric text keeps `ph` empty.
    pub fn parse(bytes: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(bytes).trim().to_string();
        let ph = first_number(&raw);
        Self { raw, ph }
    }
}

impl fmt::Display for PhReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ph {
            Some(ph) => write!(f, "pH {:.2}", ph),
            None => write!(f, "{:?}", self.raw),
        }
    }
}

fn first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let digit_at = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);
        let begins = match bytes[start] {
            b'0'..=b'9' => true,
            b'-' | b'+' => {
                digit_at(start + 1)
                    || (bytes.get(start + 1) == Some(&b'.') && digit_at(start + 2))
            }
            b'.' => digit_at(start + 1),
            _ => false,
        };
        if begins {
            let mut end = start + 1;
            let mut seen_dot = bytes[start] == b'.';
            while end < bytes.len() {
                match bytes[end] {
                    b'0'..=b'9' => {}
                    b'.' if !seen_dot && digit_at(end + 1) => seen_dot = true,
                    _ => break,
                }
                end += 1;
            }
            return text[start..end].parse().ok();
        }
        start += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_reading() {
        let reading = PhReading::parse(b"7.01\r");
        assert_eq!(reading.raw, "7.01");
        assert_eq!(reading.ph, Some(7.01));
        assert_eq!(reading.to_string(), "pH 7.01");
    }

    #[test]
    fn test_reading_with_label_and_temperature() {
        let reading = PhReading::parse(b"pH 6.87 25.0C\r\n");
        assert_eq!(reading.ph, Some(6.87));
        assert_eq!(reading.raw, "pH 6.87 25.0C");
    }

    #[test]
    fn test_signed_and_bare_fraction() {
        assert_eq!(PhReading::parse(b"-0.5").ph, Some(-0.5));
        assert_eq!(PhReading::parse(b".5").ph, Some(0.5));
        assert_eq!(PhReading::parse(b"7.").ph, Some(7.0));
    }

    #[test]
    fn test_non_numeric_response() {
        let reading = PhReading::parse(b"ERR\r");
        assert_eq!(reading.ph, None);
        assert_eq!(reading.to_string(), "\"ERR\"");

        let reading = PhReading::parse(&[0xff, b'7', b'\r']);
        assert_eq!(reading.ph, Some(7.0));
    }
}
