use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::errors::{CseErrKind, CseResult};

pub fn compress(content: &[u8]) -> CseResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|err| CseErrKind::Unexpected(format!("unexpected compression error: {err:?}")))?;

    Ok(encoder
        .finish()
        .map_err(|err| CseErrKind::Unexpected(format!("unexpected compression error: {err:?}")))?)
}

pub fn decompress(content: &[u8]) -> CseResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(content);
    let mut result = Vec::<u8>::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|err| CseErrKind::Unexpected(format!("unexpected compression error: {err:?}")))?;
    Ok(result)
}

#[test]
fn compress_decompress() {
    assert_eq!(decompress(&compress(b"hello").unwrap()).unwrap(), b"hello");
}
