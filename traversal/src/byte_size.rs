//! Human-readable byte sizes: `8k`, `512m`, `1g`, `2t`, or a plain byte count.
//!
//! Suffixes are case-insensitive powers of 1024.

/// Parses a byte size, returning `None` if it is malformed or overflows.
pub fn parse(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, shift) = match value.as_bytes().last()? {
        b'k' => (&value[..value.len() - 1], 10),
        b'm' => (&value[..value.len() - 1], 20),
        b'g' => (&value[..value.len() - 1], 30),
        b't' => (&value[..value.len() - 1], 40),
        _ => (value.as_str(), 0),
    };
    let n: u64 = digits.trim_end().parse().ok()?;
    n.checked_mul(1 << shift)
}

#[cfg(test)]
mod tests {
    use super::parse;

    #[test]
    fn suffixes() {
        assert_eq!(parse("8k"), Some(8 * 1024));
        assert_eq!(parse("8K"), Some(8 * 1024));
        assert_eq!(parse(" 3m "), Some(3 << 20));
        assert_eq!(parse("1g"), Some(1 << 30));
        assert_eq!(parse("2t"), Some(2 << 40));
        assert_eq!(parse("4096"), Some(4096));
        assert_eq!(parse("0"), Some(0));
    }

    #[test]
    fn malformed() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("k"), None);
        assert_eq!(parse("-1k"), None);
        assert_eq!(parse("1.5g"), None);
        assert_eq!(parse("12x"), None);
        assert_eq!(parse("99999999999t"), None);
    }
}
