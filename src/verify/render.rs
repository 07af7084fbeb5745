//! Hash-verified framebuffer output
//!
//! Render tests dump the framebuffer after the program halts and compare a
//! digest of it against the expected value. The expected digest's length
//! picks the algorithm: 40 hex digits is SHA-1, 64 is SHA-256. On mismatch
//! the raw dump is converted to a PNG for inspection; that step never changes
//! the verdict.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::common::config::RenderConfig;
use crate::common::{Error, Result};
use crate::exec::ProcessRunner;

/// Digest algorithm of an expected framebuffer hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha1,
    Sha256,
}

impl DigestKind {
    /// Identify the algorithm from a hex digest
    pub fn from_hex(expected: &str) -> Result<Self> {
        let expected = expected.trim();
        if !expected.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Config(format!(
                "render hash '{}' is not hexadecimal",
                expected
            )));
        }
        match expected.len() {
            40 => Ok(Self::Sha1),
            64 => Ok(Self::Sha256),
            len => Err(Error::Config(format!(
                "render hash '{}' has {} digits; expected 40 (SHA-1) or 64 (SHA-256)",
                expected, len
            ))),
        }
    }

    /// Lower-case hex digest of `data`
    pub fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

/// Lower-case hex SHA-256 of `data`
pub fn digest_hex(data: &[u8]) -> String {
    DigestKind::Sha256.digest_hex(data)
}

/// Compare the digest of `dump_file` with `expected`
///
/// On mismatch, renders the dump into `image_file` and fails with
/// [`Error::HashMismatch`].
pub async fn check_render(
    dump_file: &Path,
    expected: &str,
    image_file: &Path,
    render: &RenderConfig,
    runner: &ProcessRunner,
) -> Result<()> {
    let kind = DigestKind::from_hex(expected)?;
    let contents = std::fs::read(dump_file).map_err(|e| Error::file_read(dump_file, e))?;
    let actual = kind.digest_hex(&contents);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }

    tracing::debug!(%actual, %expected, "Framebuffer digest mismatch");
    if let Err(e) = render_image(dump_file, image_file, render, runner).await {
        tracing::warn!("Could not render {}: {}", image_file.display(), e);
    }

    Err(Error::HashMismatch {
        actual,
        image: image_file.display().to_string(),
    })
}

/// Convert a raw RGBA dump into a viewable image with the configured converter
pub async fn render_image(
    dump_file: &Path,
    image_file: &Path,
    render: &RenderConfig,
    runner: &ProcessRunner,
) -> Result<()> {
    let converter = which::which(&render.converter)
        .unwrap_or_else(|_| PathBuf::from(&render.converter));
    let args = vec![
        "-depth".to_string(),
        "8".to_string(),
        "-size".to_string(),
        format!("{}x{}", render.width, render.height),
        format!("rgba:{}", dump_file.display()),
        image_file.display().to_string(),
    ];
    runner
        .run(&converter, &args, Duration::from_secs(60), None)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex() {
        assert_eq!(
            digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_kind_from_length() {
        let sha1 = "a9993e364706816aba3e25717850c26c9cd0d89d";
        assert_eq!(DigestKind::from_hex(sha1).unwrap(), DigestKind::Sha1);
        assert_eq!(DigestKind::Sha1.digest_hex(b"abc"), sha1);
        assert_eq!(
            DigestKind::from_hex(&digest_hex(b"abc")).unwrap(),
            DigestKind::Sha256
        );

        let err = DigestKind::from_hex("ab12").unwrap_err();
        assert!(err.is_configuration());
        assert!(DigestKind::from_hex(&"g".repeat(40)).is_err());
    }

    fn no_converter() -> RenderConfig {
        RenderConfig {
            converter: "/nonexistent/convert".to_string(),
            ..RenderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_matching_digest_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let dump = tmp.path().join("fb.bin");
        std::fs::write(&dump, b"abc").unwrap();
        let expected = digest_hex(b"abc").to_uppercase();

        let result = check_render(
            &dump,
            &expected,
            &tmp.path().join("actual-output.png"),
            &no_converter(),
            &ProcessRunner::default(),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sha1_digest_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let dump = tmp.path().join("fb.bin");
        std::fs::write(&dump, b"abc").unwrap();

        let result = check_render(
            &dump,
            "a9993e364706816aba3e25717850c26c9cd0d89d",
            &tmp.path().join("actual-output.png"),
            &no_converter(),
            &ProcessRunner::default(),
        )
        .await;
        assert!(result.is_ok(), "{result:?}");
        assert!(!tmp.path().join("actual-output.png").exists());
    }

    #[tokio::test]
    async fn test_mismatch_fails_even_when_rendering_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dump = tmp.path().join("fb.bin");
        std::fs::write(&dump, [0u8; 64]).unwrap();
        let image = tmp.path().join("actual-output.png");

        let err = check_render(
            &dump,
            &"0".repeat(64),
            &image,
            &no_converter(),
            &ProcessRunner::default(),
        )
        .await
        .unwrap_err();
        match err {
            Error::HashMismatch { actual, image: path } => {
                assert_eq!(actual, digest_hex(&[0u8; 64]));
                assert!(path.ends_with("actual-output.png"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_dump_is_not_a_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let err = check_render(
            &tmp.path().join("fb.bin"),
            &"0".repeat(40),
            &tmp.path().join("out.png"),
            &no_converter(),
            &ProcessRunner::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
