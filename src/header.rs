//! Acquisition metadata and the format-specific encoders that turn it into
//! `header`, `header2`, and `xheader` section payloads.
//!
//! The payloads are zlib-compressed text: tab-separated key/value rows for
//! `header` (ASCII) and `header2` (UTF-16LE with a byte-order mark), and a
//! small XML document for the libewf `xheader` extension. Identifiers are the
//! single/double letter codes established tooling expects (`c` case number,
//! `n` evidence number, `a` description, `e` examiner, ...).

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::{CompressionLevel, EwfError, EwfResult, Format};

/// Case metadata carried in the header sections. All fields are free-form
/// strings supplied by the caller; dates are conventionally written as
/// space-separated `"year month day hour minute second"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderValues {
    pub case_number: String,
    pub description: String,
    pub examiner_name: String,
    pub evidence_number: String,
    pub notes: String,
    pub acquiry_date: String,
    pub system_date: String,
    pub acquiry_operating_system: String,
    pub acquiry_software_version: String,
    /// Password hash; `"0"` when no password is set.
    pub password_hash: String,
}

impl Default for HeaderValues {
    fn default() -> Self {
        Self {
            case_number: String::new(),
            description: String::new(),
            examiner_name: String::new(),
            evidence_number: String::new(),
            notes: String::new(),
            acquiry_date: String::new(),
            system_date: String::new(),
            acquiry_operating_system: String::new(),
            acquiry_software_version: String::new(),
            password_hash: String::from("0"),
        }
    }
}

/// Hashes of the acquired media, filled in by the caller at finalize time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashValues {
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
}

/// One optical-media session, stored in the `session` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub session_type: u32,
    pub first_sector: u32,
}

/// A run of unreadable sectors, stored in the `error2` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiryError {
    pub first_sector: u32,
    pub sector_count: u32,
}

/// The serialized, already-compressed header section payloads, built once per
/// write context and reused for every segment that needs them.
pub(crate) struct HeaderSections {
    pub header: Vec<u8>,
    pub header2: Option<Vec<u8>>,
    pub xheader: Option<Vec<u8>>,
}

pub(crate) fn build_header_sections(
    values: &HeaderValues,
    format: Format,
    level: CompressionLevel,
) -> EwfResult<HeaderSections> {
    let header = compress_text(&header_string(values, format, level), false)?;
    let header2 = match format {
        Format::Encase4 | Format::Encase5 | Format::Encase6 | Format::Ewfx => {
            Some(compress_text(&header2_string(values), true)?)
        }
        _ => None,
    };
    let xheader = match format {
        Format::Ewfx => Some(compress_text(&xheader_string(values), false)?),
        _ => None,
    };
    Ok(HeaderSections {
        header,
        header2,
        xheader,
    })
}

fn compression_label(level: CompressionLevel) -> &'static str {
    match level {
        CompressionLevel::None => "n",
        CompressionLevel::Fast => "f",
        CompressionLevel::Default | CompressionLevel::Best => "b",
    }
}

fn header_string(values: &HeaderValues, format: Format, level: CompressionLevel) -> String {
    let v = values;
    match format {
        // The first generation has no application/OS version fields.
        Format::Ewf | Format::Smart | Format::Encase1 => format!(
            "1\r\nmain\r\nc\tn\ta\te\tt\tm\tu\tp\tr\r\n{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\r\n\r\n",
            v.case_number,
            v.evidence_number,
            v.description,
            v.examiner_name,
            v.notes,
            v.acquiry_date,
            v.system_date,
            v.password_hash,
            compression_label(level),
        ),
        _ => format!(
            "1\r\nmain\r\nc\tn\ta\te\tt\tav\tov\tm\tu\tp\tr\r\n{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\r\n\r\n",
            v.case_number,
            v.evidence_number,
            v.description,
            v.examiner_name,
            v.notes,
            v.acquiry_software_version,
            v.acquiry_operating_system,
            v.acquiry_date,
            v.system_date,
            v.password_hash,
            compression_label(level),
        ),
    }
}

fn header2_string(values: &HeaderValues) -> String {
    let v = values;
    format!(
        "1\nmain\na\tc\tn\te\tt\tav\tov\tm\tu\tp\n{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n\n",
        v.description,
        v.case_number,
        v.evidence_number,
        v.examiner_name,
        v.notes,
        v.acquiry_software_version,
        v.acquiry_operating_system,
        v.acquiry_date,
        v.system_date,
        v.password_hash,
    )
}

fn xheader_string(values: &HeaderValues) -> String {
    let v = values;
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xheader>\n");
    let fields = [
        ("case_number", &v.case_number),
        ("description", &v.description),
        ("examiner_name", &v.examiner_name),
        ("evidence_number", &v.evidence_number),
        ("notes", &v.notes),
        ("acquiry_date", &v.acquiry_date),
        ("system_date", &v.system_date),
        ("acquiry_operating_system", &v.acquiry_operating_system),
        ("acquiry_software_version", &v.acquiry_software_version),
    ];
    for (tag, value) in fields {
        if !value.is_empty() {
            xml.push_str(&format!("\t<{tag}>{value}</{tag}>\n"));
        }
    }
    xml.push_str("</xheader>\n\n");
    xml
}

/// Encodes `text` (UTF-16LE with BOM when `utf16`, bytes otherwise) and
/// deflates it into a zlib stream.
fn compress_text(text: &str, utf16: bool) -> EwfResult<Vec<u8>> {
    let bytes = if utf16 {
        let mut bytes = vec![0xff, 0xfe];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    } else {
        text.as_bytes().to_vec()
    };

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&bytes)
        .and_then(|_| encoder.finish())
        .map_err(|_| EwfError::CompressionFailed)
}
