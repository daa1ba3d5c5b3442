use itertools::Itertools;

/// Bytes shown per hex dump line.
pub const BYTES_PER_LINE: usize = 16;

/// Renders `bytes` as hex dump lines.
///
/// Each line starts with the offset of its first byte, `base` included, followed by up to
/// [`BYTES_PER_LINE`] bytes separated by single spaces. The last line is not padded.
///
/// # Examples
///
/// ```
/// use vfio_bench_core::util::hex_lines;
///
/// let lines = hex_lines(&[0xef, 0xcd, 0xab], 0x4000);
/// assert_eq!(lines, vec!["4000: ef cd ab".to_string()]);
/// ```
pub fn hex_lines(bytes: &[u8], base: usize) -> Vec<String> {
    bytes
        .chunks(BYTES_PER_LINE)
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "{:04x}: {}",
                base + i * BYTES_PER_LINE,
                chunk.iter().map(|b| format!("{:02x}", b)).join(" ")
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_count() {
        for (len, lines) in [(0, 0), (1, 1), (15, 1), (16, 1), (17, 2), (64, 4), (65, 5)] {
            assert_eq!(hex_lines(&vec![0u8; len], 0).len(), lines, "len {}", len);
        }
    }

    #[test]
    fn running_offsets() {
        let bytes: Vec<u8> = (0..40).collect();
        let lines = hex_lines(&bytes, 0x10);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0010: 00 01 02"));
        assert!(lines[1].starts_with("0020: 10 11"));
        assert_eq!(lines[2], "0030: 20 21 22 23 24 25 26 27");
    }

    #[test]
    fn full_line_has_no_trailing_space() {
        let lines = hex_lines(&[0xffu8; 16], 0);
        assert_eq!(lines[0].len(), "0000: ".len() + 16 * 3 - 1);
        assert!(!lines[0].ends_with(' '));
    }
}
