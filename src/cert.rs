//! Certificate metadata extraction.
//!
//! Turns a PEM (or bare base64 / DER) X.509 certificate into the flat set of
//! display fields the PKI records carry.  Fields a certificate does not have
//! stay `None` and are left out of the serialized form entirely, so "no URI
//! SANs" never looks like "an empty list of URI SANs".

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::CertificateDer;
use serde::Serialize;
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use x509_parser::extensions::{GeneralName, KeyUsage, ParsedExtension};
use x509_parser::oid_registry::asn1_rs::{Error as Asn1Error, TaggedExplicit};
use x509_parser::prelude::*;

use crate::error::ParseError;
use crate::util;

/// Display metadata of one certificate.
///
/// Serial numbers and key identifiers are lowercase hex octets joined by `:`.
/// Timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedCertificateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// DNS and e-mail SANs, in certificate order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_sans: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_sans: Option<Vec<String>>,
    /// `<oid>;UTF8:<value>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_sans: Option<Vec<String>>,
    pub not_valid_before: i64,
    pub not_valid_after: i64,
    pub serial_number: String,
    /// SubjectKeyIdentifier, or SHA-1 of the public key bits when the
    /// extension is missing.
    pub subject_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_bits: Option<u32>,
    /// Certificates that followed the described one in the input, as PEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_chain: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_path_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<Vec<String>>,
}

/// Keys [`ParsedCertificateMetadata`] can contribute to a record.
pub const METADATA_KEYS: &[&str] = &[
    "common_name",
    "alt_names",
    "ip_sans",
    "uri_sans",
    "other_sans",
    "not_valid_before",
    "not_valid_after",
    "serial_number",
    "subject_key_id",
    "authority_key_id",
    "signature_bits",
    "ca_chain",
    "country",
    "province",
    "locality",
    "organization",
    "ou",
    "is_ca",
    "max_path_length",
    "key_usage",
];

impl ParsedCertificateMetadata {
    /// The metadata as a JSON object with absent fields omitted.
    pub fn to_json_map(&self) -> Map<String, Value> {
        util::object_or_empty(serde_json::to_value(self).unwrap_or_default())
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Describe the first certificate in `input`.
///
/// `input` is PEM text (any number of `CERTIFICATE` blocks, other blocks are
/// skipped) or, without PEM armor, the base64 of a DER certificate.
pub fn extract(input: &str) -> Result<ParsedCertificateMetadata, ParseError> {
    let ders = decode_certificates(input)?;
    describe(&ders)
}

/// Describe a raw DER certificate.
pub fn extract_der(der: &[u8]) -> Result<ParsedCertificateMetadata, ParseError> {
    describe(&[CertificateDer::from(der.to_vec())])
}

/// Run [`extract`] on the `certificate` field of a response `data` object.
///
/// `Ok(None)` when there is no non-empty certificate string to parse.
pub fn parse_pki_cert(data: &Value) -> Result<Option<ParsedCertificateMetadata>, ParseError> {
    match data.get("certificate").and_then(Value::as_str) {
        Some(pem) if !pem.trim().is_empty() => extract(pem).map(Some),
        _ => Ok(None),
    }
}

/// Decode every certificate in `input` to DER, in order of appearance.
pub fn decode_certificates(input: &str) -> Result<Vec<CertificateDer<'static>>, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }
    let ders = if input.contains("-----BEGIN") {
        rustls_pemfile::certs(&mut Cursor::new(input.as_bytes()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| ParseError::Pem(e.to_string()))?
    } else {
        let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let der = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ParseError::Base64(e.to_string()))?;
        vec![CertificateDer::from(der)]
    };
    if ders.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(ders)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn describe(ders: &[CertificateDer<'_>]) -> Result<ParsedCertificateMetadata, ParseError> {
    let (leaf, rest) = ders.split_first().ok_or(ParseError::Empty)?;
    let (_, cert) = parse_x509_certificate(leaf.as_ref())
        .map_err(|e| ParseError::Der(e.to_string()))?;

    let subject = cert.subject();
    let mut meta = ParsedCertificateMetadata {
        common_name:      first_attr(subject.iter_common_name()),
        not_valid_before: cert.validity().not_before.timestamp(),
        not_valid_after:  cert.validity().not_after.timestamp(),
        serial_number:    util::colon_hex(&cert.serial.to_bytes_be()),
        subject_key_id:   derived_key_id(cert.public_key().subject_public_key.as_ref()),
        signature_bits:   signature_bits(&cert.signature_algorithm.algorithm.to_id_string()),
        country:          joined_attr(subject.iter_country()),
        province:         joined_attr(subject.iter_state_or_province()),
        locality:         joined_attr(subject.iter_locality()),
        organization:     joined_attr(subject.iter_organization()),
        ou:               joined_attr(subject.iter_organizational_unit()),
        ..ParsedCertificateMetadata::default()
    };

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                meta.subject_key_id = util::colon_hex(ski.0);
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                if let Some(key_id) = &aki.key_identifier {
                    meta.authority_key_id = Some(util::colon_hex(key_id.0));
                }
            }
            ParsedExtension::SubjectAlternativeName(san) => {
                apply_sans(&mut meta, &san.general_names);
            }
            ParsedExtension::BasicConstraints(bc) => {
                meta.is_ca = Some(bc.ca);
                meta.max_path_length = bc.path_len_constraint;
            }
            ParsedExtension::KeyUsage(ku) => {
                meta.key_usage = Some(key_usage_names(ku));
            }
            _ => {}
        }
    }

    if !rest.is_empty() {
        meta.ca_chain = Some(
            rest.iter()
                .map(|der| util::pem_encode_certificate(der.as_ref()))
                .collect(),
        );
    }

    Ok(meta)
}

fn first_attr<'a, 'b: 'a>(
    mut iter: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Option<String> {
    iter.find_map(|attr| attr.as_str().ok().map(str::to_string))
}

fn joined_attr<'a, 'b: 'a>(
    iter: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Option<String> {
    let values: Vec<&str> = iter.filter_map(|attr| attr.as_str().ok()).collect();
    if values.is_empty() { None } else { Some(values.join(",")) }
}

fn derived_key_id(public_key_bits: &[u8]) -> String {
    util::colon_hex(&Sha1::digest(public_key_bits))
}

fn apply_sans(meta: &mut ParsedCertificateMetadata, names: &[GeneralName<'_>]) {
    let mut alt_names = Vec::new();
    let mut ip_sans = Vec::new();
    let mut uri_sans = Vec::new();
    let mut other_sans = Vec::new();

    for name in names {
        match name {
            GeneralName::DNSName(dns) => alt_names.push(dns.to_string()),
            GeneralName::RFC822Name(email) => alt_names.push(email.to_string()),
            GeneralName::IPAddress(raw) => {
                if let Some(ip) = parse_ip_address(raw) {
                    ip_sans.push(ip.to_string());
                }
            }
            GeneralName::URI(uri) => uri_sans.push(uri.to_string()),
            GeneralName::OtherName(oid, raw) => {
                let oid = oid.to_id_string();
                match other_name_utf8(raw) {
                    Some(value) => other_sans.push(format!("{oid};UTF8:{value}")),
                    None => other_sans.push(format!("{oid};HEX:{}", util::colon_hex(raw))),
                }
            }
            _ => {}
        }
    }

    meta.alt_names = non_empty(alt_names);
    meta.ip_sans = non_empty(ip_sans);
    meta.uri_sans = non_empty(uri_sans);
    meta.other_sans = non_empty(other_sans);
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    if v.is_empty() { None } else { Some(v) }
}

fn parse_ip_address(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).into()),
        16 => {
            let arr: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(arr).into())
        }
        _ => None,
    }
}

/// Value of an otherName SAN: `[0] EXPLICIT UTF8String`.
fn other_name_utf8(raw: &[u8]) -> Option<String> {
    TaggedExplicit::<String, Asn1Error, 0>::from_der(raw)
        .ok()
        .map(|(_, value)| value.into_inner())
}

/// Digest strength of a signature algorithm; `None` when the algorithm has no
/// fixed digest (Ed25519, RSA-PSS) or is unknown.
fn signature_bits(oid: &str) -> Option<u32> {
    match oid {
        "1.2.840.113549.1.1.5"   => Some(160), // sha1WithRSAEncryption
        "1.2.840.113549.1.1.14"  => Some(224), // sha224WithRSAEncryption
        "1.2.840.113549.1.1.11"  => Some(256), // sha256WithRSAEncryption
        "1.2.840.113549.1.1.12"  => Some(384), // sha384WithRSAEncryption
        "1.2.840.113549.1.1.13"  => Some(512), // sha512WithRSAEncryption
        "1.2.840.10045.4.1"      => Some(160), // ecdsa-with-SHA1
        "1.2.840.10045.4.3.1"    => Some(224), // ecdsa-with-SHA224
        "1.2.840.10045.4.3.2"    => Some(256), // ecdsa-with-SHA256
        "1.2.840.10045.4.3.3"    => Some(384), // ecdsa-with-SHA384
        "1.2.840.10045.4.3.4"    => Some(512), // ecdsa-with-SHA512
        "1.2.840.10040.4.3"      => Some(160), // dsa-with-sha1
        "2.16.840.1.101.3.4.3.2" => Some(256), // dsa-with-sha256
        _ => None,
    }
}

fn key_usage_names(ku: &KeyUsage) -> Vec<String> {
    let flags = [
        (ku.digital_signature(), "DigitalSignature"),
        (ku.non_repudiation(),   "ContentCommitment"),
        (ku.key_encipherment(),  "KeyEncipherment"),
        (ku.data_encipherment(), "DataEncipherment"),
        (ku.key_agreement(),     "KeyAgreement"),
        (ku.key_cert_sign(),     "CertSign"),
        (ku.crl_sign(),          "CRLSign"),
        (ku.encipher_only(),     "EncipherOnly"),
        (ku.decipher_only(),     "DecipherOnly"),
    ];
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROOT_PEM: &str = include_str!("../testdata/root.pem");
    const INT_PEM: &str = include_str!("../testdata/int.pem");
    const BARE_PEM: &str = include_str!("../testdata/bare.pem");
    const ROOT_DER_B64: &str = include_str!("../testdata/root.der.b64");

    const ROOT_KEY_ID: &str = "ab:f0:76:1f:05:a2:12:0d:df:0c:77:7c:f7:7e:bc:cd:ec:08:67:62";

    #[test]
    fn root_certificate_fields() {
        let meta = extract(ROOT_PEM).unwrap();
        assert_eq!(meta.common_name.as_deref(), Some("Hashicorp Test Root"));
        assert_eq!(
            meta.alt_names,
            Some(vec!["root.example.com".to_string(), "alt.example.com".to_string()])
        );
        assert_eq!(meta.ip_sans, Some(vec!["10.0.0.1".to_string(), "::1".to_string()]));
        assert_eq!(meta.uri_sans, Some(vec!["spiffe://example.org/root".to_string()]));
        assert_eq!(
            meta.other_sans,
            Some(vec!["1.3.6.1.4.1.311.20.2.3;UTF8:devops@example.com".to_string()])
        );
        assert_eq!(meta.not_valid_before, 1_792_146_508);
        assert_eq!(meta.not_valid_after, 2_107_506_508);
        assert_eq!(meta.serial_number, "3c:5e:1f:a0:9b:7d:22");
        assert_eq!(meta.subject_key_id, ROOT_KEY_ID);
        assert_eq!(meta.authority_key_id.as_deref(), Some(ROOT_KEY_ID));
        assert_eq!(meta.signature_bits, Some(256));
        assert_eq!(meta.country.as_deref(), Some("US"));
        assert_eq!(meta.organization.as_deref(), Some("Hashicorp"));
        assert_eq!(meta.ou.as_deref(), Some("Engineering"));
        assert_eq!(meta.province, None);
        assert_eq!(meta.is_ca, Some(true));
        assert_eq!(meta.max_path_length, Some(2));
        assert_eq!(
            meta.key_usage,
            Some(vec!["DigitalSignature".to_string(), "CertSign".to_string(), "CRLSign".to_string()])
        );
        assert_eq!(meta.ca_chain, None);
    }

    #[test]
    fn intermediate_has_no_sans() {
        let meta = extract(INT_PEM).unwrap();
        assert_eq!(meta.common_name.as_deref(), Some("Hashicorp Test Intermediate"));
        assert_eq!(meta.serial_number, "0a:01");
        assert_eq!(meta.signature_bits, Some(384));
        assert_eq!(
            meta.subject_key_id,
            "b9:d4:fa:5a:92:b9:73:1a:0f:c2:9c:55:a5:a9:f0:db:8c:2e:bc:a9"
        );
        assert_eq!(meta.authority_key_id.as_deref(), Some(ROOT_KEY_ID));
        assert_eq!(meta.is_ca, Some(true));
        assert_eq!(meta.max_path_length, None);
        assert_eq!(meta.alt_names, None);
        assert_eq!(meta.ip_sans, None);
        assert_eq!(meta.uri_sans, None);
        assert_eq!(meta.other_sans, None);
        assert_eq!(meta.not_valid_after, 1_949_826_508);
    }

    #[test]
    fn absent_fields_are_omitted_not_emptied() {
        let meta = extract(BARE_PEM).unwrap();
        assert_eq!(meta.common_name, None);
        assert_eq!(meta.organization.as_deref(), Some("No Name Inc"));
        assert_eq!(meta.serial_number, "ff");
        assert_eq!(meta.signature_bits, Some(512));
        assert_eq!(meta.authority_key_id, None);
        assert_eq!(meta.key_usage, None);
        assert_eq!(meta.is_ca, None);

        let map = meta.to_json_map();
        for key in ["common_name", "alt_names", "ip_sans", "uri_sans", "other_sans", "ca_chain", "authority_key_id"] {
            assert!(!map.contains_key(key), "{key} should be absent");
        }
        assert_eq!(map["serial_number"], json!("ff"));
    }

    #[test]
    fn key_id_derived_from_public_key_without_extension() {
        let meta = extract(BARE_PEM).unwrap();
        assert_eq!(
            meta.subject_key_id,
            "99:ba:18:2e:ff:63:87:b4:9e:50:64:6d:75:23:c4:97:e6:12:0e:fd"
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        for pem in [ROOT_PEM, INT_PEM, BARE_PEM] {
            assert_eq!(extract(pem).unwrap(), extract(pem).unwrap());
        }
    }

    #[test]
    fn chain_is_reencoded_as_pem() {
        let bundle = format!("{INT_PEM}{ROOT_PEM}");
        let meta = extract(&bundle).unwrap();
        assert_eq!(meta.common_name.as_deref(), Some("Hashicorp Test Intermediate"));
        assert_eq!(meta.ca_chain, Some(vec![ROOT_PEM.trim_end().to_string()]));
    }

    #[test]
    fn bundle_keys_are_skipped() {
        let key = include_str!("../testdata/client.key");
        let bundle = format!("{key}{ROOT_PEM}");
        assert_eq!(extract(&bundle).unwrap(), extract(ROOT_PEM).unwrap());
    }

    #[test]
    fn bare_base64_and_der_inputs() {
        let from_b64 = extract(ROOT_DER_B64).unwrap();
        assert_eq!(from_b64, extract(ROOT_PEM).unwrap());

        let der = STANDARD.decode(ROOT_DER_B64.trim()).unwrap();
        assert_eq!(extract_der(&der).unwrap(), from_b64);
    }

    #[test]
    fn malformed_inputs_are_parse_errors() {
        assert_eq!(extract("   "), Err(ParseError::Empty));
        assert!(matches!(extract("not a certificate!"), Err(ParseError::Base64(_))));
        assert!(matches!(extract("aGVsbG8gd29ybGQ="), Err(ParseError::Der(_))));
        assert_eq!(
            extract("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"),
            Err(ParseError::Empty)
        );
        assert!(extract_der(&[0x30, 0x03, 0x02, 0x01]).is_err());
    }

    #[test]
    fn other_name_value_decoding() {
        // [0] { UTF8String "ab" }
        assert_eq!(other_name_utf8(&[0xa0, 0x04, 0x0c, 0x02, b'a', b'b']), Some("ab".to_string()));
        // [0] { IA5String "ab" }
        assert_eq!(other_name_utf8(&[0xa0, 0x04, 0x16, 0x02, b'a', b'b']), None);
        // truncated
        assert_eq!(other_name_utf8(&[0xa0, 0x04, 0x0c, 0x02, b'a']), None);
        assert_eq!(other_name_utf8(&[]), None);
    }

    #[test]
    fn parse_pki_cert_reads_certificate_field() {
        let data = json!({ "certificate": ROOT_PEM, "issuer_id": "abc" });
        let meta = parse_pki_cert(&data).unwrap().unwrap();
        assert_eq!(meta.serial_number, "3c:5e:1f:a0:9b:7d:22");

        assert_eq!(parse_pki_cert(&json!({ "certificate": "" })), Ok(None));
        assert_eq!(parse_pki_cert(&json!({ "issuer_id": "abc" })), Ok(None));
        assert!(parse_pki_cert(&json!({ "certificate": "garbage!" })).is_err());
    }

    #[test]
    fn metadata_keys_cover_serialized_fields() {
        let full = extract(&format!("{ROOT_PEM}{INT_PEM}")).unwrap().to_json_map();
        for key in full.keys() {
            assert!(METADATA_KEYS.contains(&key.as_str()), "{key} missing from METADATA_KEYS");
        }
    }
}
