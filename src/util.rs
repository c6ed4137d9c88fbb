//! Miscellaneous helpers: hex formatting, PEM armor, JSON merging, output files.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use serde_json::{Map, Value};

// ── Hex ───────────────────────────────────────────────────────────────────────

/// Lowercase hex octets joined by colons: `[0x3c, 0x5e]` → `"3c:5e"`.
pub fn colon_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

// ── PEM ───────────────────────────────────────────────────────────────────────

/// Armor DER bytes as a PEM `CERTIFICATE` block with 64-column lines and no
/// trailing newline.
pub fn pem_encode_certificate(der: &[u8]) -> String {
    let block = pem::Pem::new("CERTIFICATE", der.to_vec());
    let config = pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF);
    pem::encode_config(&block, config).trim_end().to_string()
}

// ── JSON ──────────────────────────────────────────────────────────────────────

/// Shallow union of two JSON objects; keys from `overlay` win.
pub fn merge_objects(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (k, v) in overlay {
        base.insert(k, v);
    }
    base
}

/// `value` as an object; anything else becomes an empty one.
pub fn object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Write `data` to `path`, or to stdout when `path` is `None` or `-`.
pub fn write_output(path: Option<&Path>, data: &[u8]) -> io::Result<()> {
    match path {
        Some(p) if p != Path::new("-") => {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(p, data)
        }
        _ => {
            let mut out = io::stdout().lock();
            out.write_all(data)?;
            out.flush()
        }
    }
}

/// Read `path`, or stdin when `path` is `-`.
pub fn read_input(path: &Path) -> io::Result<String> {
    if path == Path::new("-") {
        io::read_to_string(io::stdin())
    } else {
        fs::read_to_string(path)
    }
}

/// Bytes of `path`, or of stdin when `path` is `-`.
pub fn read_input_bytes(path: &Path) -> io::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().lock().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        fs::read(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn colon_hex_is_lowercase_and_delimited() {
        assert_eq!(colon_hex(&[0x3c, 0x5e, 0x1f, 0x0a]), "3c:5e:1f:0a");
        assert_eq!(colon_hex(&[0xff]), "ff");
        assert_eq!(colon_hex(&[]), "");
    }

    #[test]
    fn pem_lines_wrap_at_64() {
        let pem = pem_encode_certificate(&[0u8; 100]);
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines.first(), Some(&"-----BEGIN CERTIFICATE-----"));
        assert_eq!(lines.last(), Some(&"-----END CERTIFICATE-----"));
        assert_eq!(lines[1].len(), 64);
        assert!(lines[2].len() <= 64);
        assert!(!pem.ends_with('\n'));
    }

    #[test]
    fn armored_certificate_reads_back() {
        let pem = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/int.pem")).unwrap();
        let der = rustls_pemfile::certs(&mut pem.as_bytes()).next().unwrap().unwrap();
        let armored = pem_encode_certificate(&der);
        assert_eq!(armored, pem.trim_end());
        let back = rustls_pemfile::certs(&mut armored.as_bytes()).next().unwrap().unwrap();
        assert_eq!(back.as_ref(), der.as_ref());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = object_or_empty(json!({ "a": 1, "b": 2 }));
        let overlay = object_or_empty(json!({ "b": 3, "c": 4 }));
        assert_eq!(Value::Object(merge_objects(base, overlay)), json!({ "a": 1, "b": 3, "c": 4 }));
    }

    #[test]
    fn non_objects_become_empty() {
        assert!(object_or_empty(Value::Null).is_empty());
        assert!(object_or_empty(json!([1, 2])).is_empty());
    }
}
