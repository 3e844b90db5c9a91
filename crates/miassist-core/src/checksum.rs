//! Package checksum for the validation request.

use md5::Context;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Streaming MD5 of the package file, as a lowercase hex string.
pub fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut ctx = Context::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_md5_known_vector() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "hello world").unwrap();
        let sum = md5_file(tmp.path()).unwrap();
        assert_eq!(sum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }
}
