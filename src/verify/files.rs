//! Byte-for-byte file comparison with a hex diagnostic

use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use crate::common::{Error, Result};

const BLOCK_SIZE: usize = 0x1000;
const ROW: usize = 16;

/// Fail with [`Error::FileMismatch`] unless both files have identical contents
///
/// The message shows the first differing 16-byte row of each file with the
/// differing bytes marked.
pub fn assert_files_equal(file1: &Path, file2: &Path, error_msg: &str) -> Result<()> {
    let mut fp1 = std::fs::File::open(file1).map_err(|e| Error::file_read(file1, e))?;
    let mut fp2 = std::fs::File::open(file2).map_err(|e| Error::file_read(file2, e))?;
    let mut block1 = vec![0u8; BLOCK_SIZE];
    let mut block2 = vec![0u8; BLOCK_SIZE];
    let mut block_offset = 0usize;

    loop {
        let len1 = read_block(&mut fp1, &mut block1)?;
        let len2 = read_block(&mut fp2, &mut block2)?;
        let common = len1.min(len2);

        if let Some(pos) = (0..common).find(|&i| block1[i] != block2[i]) {
            let row = pos & !(ROW - 1);
            let end = (row + ROW).min(common);
            return Err(Error::FileMismatch(format_row_diff(
                error_msg,
                block_offset + row,
                &block1[row..end],
                &block2[row..end],
            )));
        }
        if len1 < len2 {
            return Err(Error::FileMismatch(format!("{}: file1 shorter than file2", error_msg)));
        }
        if len1 > len2 {
            return Err(Error::FileMismatch(format!("{}: file1 longer than file2", error_msg)));
        }
        if len1 == 0 {
            return Ok(());
        }
        block_offset += len1;
    }
}

/// Fill `buf` as far as the file allows; returns the number of bytes read
fn read_block(file: &mut std::fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn format_row_diff(error_msg: &str, offset: usize, row1: &[u8], row2: &[u8]) -> String {
    let mut text = format!(
        "{}:\n{:08x} {}\n{:08x} {}\n         ",
        error_msg,
        offset,
        hex::encode(row1),
        offset,
        hex::encode(row2)
    );
    for (a, b) in row1.iter().zip(row2) {
        let _ = write!(text, "{}", if a != b { "^^" } else { "  " });
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(
        a: &[u8],
        b: &[u8],
    ) -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let f1 = tmp.path().join("a.bin");
        let f2 = tmp.path().join("b.bin");
        std::fs::write(&f1, a).unwrap();
        std::fs::write(&f2, b).unwrap();
        (tmp, f1, f2)
    }

    #[test]
    fn test_identical_files() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let (_tmp, a, b) = write_pair(&data, &data);
        assert!(assert_files_equal(&a, &b, "mismatch").is_ok());
    }

    #[test]
    fn test_difference_shows_row() {
        let mut other: Vec<u8> = (0..0x2000u32).map(|i| i as u8).collect();
        let data = other.clone();
        other[0x1013] ^= 0xff;
        let (_tmp, a, b) = write_pair(&data, &other);

        let err = assert_files_equal(&a, &b, "fs mismatch").unwrap_err();
        let msg = err.to_string();
        let lines: Vec<&str> = msg.lines().collect();
        assert_eq!(lines[0], "fs mismatch:");
        assert!(lines[1].starts_with("00001010 101112131415"));
        assert!(lines[2].starts_with("00001010 101112ec1415"));
        assert_eq!(lines[3], format!("{}^^{}", " ".repeat(15), " ".repeat(24)));
    }

    #[test]
    fn test_length_difference() {
        let (_tmp, a, b) = write_pair(b"abc", b"abcd");
        let err = assert_files_equal(&a, &b, "m").unwrap_err();
        assert_eq!(err.to_string(), "m: file1 shorter than file2");

        let err = assert_files_equal(&b, &a, "m").unwrap_err();
        assert_eq!(err.to_string(), "m: file1 longer than file2");
    }
}
