//! Document metadata carry-over and XMP synchronization.
//!
//! The finished file keeps the input's Title/Author/Subject/Keywords and
//! creation date (with user overrides applied), gains our Creator/Producer
//! tags and a fresh ModDate, and mirrors everything into an XMP packet.
//! PDF/A outputs additionally reject metadata that XMP cannot represent.

use std::path::Path;

use chrono::{DateTime, Local, Offset};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::{OcrWeaveError, Result};
use crate::options::PipelineOptions;

pub const PROGRAM_NAME: &str = "ocrweave";
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The docinfo fields we carry from input to output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Docinfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creation_date: Option<String>,
}

/// Read the carryable docinfo from a PDF, stripping embedded NULs that some
/// producers leave behind.
pub fn read_docinfo(doc: &Document) -> Docinfo {
    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return Docinfo::default();
    };

    let field = |key: &[u8]| -> Option<String> {
        info.get(key).ok().and_then(decode_pdf_string)
    };
    Docinfo {
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        keywords: field(b"Keywords"),
        creation_date: field(b"CreationDate"),
    }
}

/// Decode a PDF text string object: UTF-16BE with BOM, or PDFDocEncoding
/// treated as Latin-1. NUL bytes are removed.
fn decode_pdf_string(obj: &Object) -> Option<String> {
    let Object::String(bytes, _) = obj else {
        return None;
    };
    let text = if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };
    let cleaned: String = text.chars().filter(|&c| c != '\0').collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Encode a string as a PDF text string: ASCII literal where possible,
/// UTF-16BE with BOM otherwise.
fn encode_pdf_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// `D:YYYYMMDDHHmmSS+HH'mm'` for the local time.
pub fn encode_pdf_date(now: DateTime<Local>) -> String {
    let offset_seconds = now.offset().fix().local_minus_utc();
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let abs = offset_seconds.abs();
    format!(
        "D:{}{}{:02}'{:02}'",
        now.format("%Y%m%d%H%M%S"),
        sign,
        abs / 3600,
        (abs % 3600) / 60
    )
}

static PDF_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^D:(\d{4})(\d{2})?(\d{2})?(\d{2})?(\d{2})?(\d{2})?(?:([+\-Z])(\d{2})?'?(\d{2})?'?)?",
    )
    .expect("static regex")
});

/// Convert a PDF date string into XMP's ISO-8601 form, best effort.
fn pdf_date_to_iso(date: &str) -> Option<String> {
    let caps = PDF_DATE.captures(date)?;
    let get = |n: usize, default: &str| -> String {
        caps.get(n).map_or(default.to_string(), |m| m.as_str().to_string())
    };
    let mut iso = format!(
        "{}-{}-{}T{}:{}:{}",
        get(1, "0000"),
        get(2, "01"),
        get(3, "01"),
        get(4, "00"),
        get(5, "00"),
        get(6, "00")
    );
    match caps.get(7).map(|m| m.as_str()) {
        Some("Z") | None => iso.push('Z'),
        Some(sign) => {
            iso.push_str(sign);
            iso.push_str(&get(8, "00"));
            iso.push(':');
            iso.push_str(&get(9, "00"));
        }
    }
    Some(iso)
}

/// Whether a metadata string survives the PDF/A XMP restrictions:
/// no private-use characters and nothing outside the BMP.
fn permitted_in_pdfa(text: &str) -> bool {
    text.chars().all(|c| {
        let cp = c as u32;
        cp < 0x10000 && !(0xE000..=0xF8FF).contains(&cp)
    })
}

/// Apply docinfo + XMP to `working`, in place.
pub fn apply_metadata(
    working: &mut Document,
    original: &Docinfo,
    options: &PipelineOptions,
    engine_tag: &str,
    engine_version: &str,
) -> Result<()> {
    let now = Local::now();
    let mod_date = encode_pdf_date(now);

    let mut docinfo = original.clone();
    if options.title.is_some() {
        docinfo.title = options.title.clone();
    }
    if options.author.is_some() {
        docinfo.author = options.author.clone();
    }
    if options.subject.is_some() {
        docinfo.subject = options.subject.clone();
    }
    if options.keywords.is_some() {
        docinfo.keywords = options.keywords.clone();
    }

    if options.output_type.is_pdfa() {
        for field in [
            &mut docinfo.title,
            &mut docinfo.author,
            &mut docinfo.subject,
            &mut docinfo.keywords,
        ] {
            if let Some(value) = field {
                if !permitted_in_pdfa(value) {
                    warn!(
                        "a metadata field contains characters that cannot be \
                         represented in PDF/A XMP and was not copied"
                    );
                    *field = None;
                }
            }
        }
    }

    let creator = format!(
        "{PROGRAM_NAME} {PROGRAM_VERSION} / Tesseract {engine_tag} {engine_version}"
    );
    let producer = format!("{PROGRAM_NAME} {PROGRAM_VERSION} (lopdf)");

    let mut info = dictionary! {
        "Creator" => encode_pdf_string(&creator),
        "Producer" => encode_pdf_string(&producer),
        "ModDate" => encode_pdf_string(&mod_date),
    };
    if let Some(title) = &docinfo.title {
        info.set("Title", encode_pdf_string(title));
    }
    if let Some(author) = &docinfo.author {
        info.set("Author", encode_pdf_string(author));
    }
    if let Some(subject) = &docinfo.subject {
        info.set("Subject", encode_pdf_string(subject));
    }
    if let Some(keywords) = &docinfo.keywords {
        info.set("Keywords", encode_pdf_string(keywords));
    }
    if let Some(creation) = &docinfo.creation_date {
        info.set("CreationDate", encode_pdf_string(creation));
    }
    let info_id = working.add_object(Object::Dictionary(info));
    working.trailer.set("Info", Object::Reference(info_id));

    let xmp = build_xmp(&docinfo, &creator, &producer, now);
    set_xmp(working, xmp.into_bytes())?;
    Ok(())
}

fn set_xmp(doc: &mut Document, packet: Vec<u8>) -> Result<()> {
    let metadata_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "Metadata",
            "Subtype" => "XML",
        },
        packet,
    ));
    let catalog_id = catalog_id(doc)?;
    let catalog = doc
        .get_dictionary_mut(catalog_id)
        .map_err(|e| OcrWeaveError::Other(format!("catalog unreadable: {e}")))?;
    catalog.set("Metadata", Object::Reference(metadata_id));
    Ok(())
}

fn catalog_id(doc: &Document) -> Result<ObjectId> {
    doc.trailer
        .get(b"Root")
        .ok()
        .and_then(|obj| obj.as_reference().ok())
        .ok_or_else(|| OcrWeaveError::Other("document has no Root".into()))
}

fn xml_escape(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '&' => "&amp;".chars().collect::<Vec<_>>(),
            '<' => "&lt;".chars().collect(),
            '>' => "&gt;".chars().collect(),
            '"' => "&quot;".chars().collect(),
            _ => vec![c],
        })
        .collect()
}

/// Build the XMP packet mirroring the docinfo.
///
/// If the input carried no creation date, `xmp:CreateDate` mirrors
/// `xmp:ModifyDate`, matching what the PDF/A normalizer would do.
fn build_xmp(docinfo: &Docinfo, creator: &str, producer: &str, now: DateTime<Local>) -> String {
    let modify_iso = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
    let create_iso = docinfo
        .creation_date
        .as_deref()
        .and_then(pdf_date_to_iso)
        .unwrap_or_else(|| modify_iso.clone());

    let mut body = String::new();
    if let Some(title) = &docinfo.title {
        body.push_str(&format!(
            "   <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>\n",
            xml_escape(title)
        ));
    }
    if let Some(author) = &docinfo.author {
        body.push_str(&format!(
            "   <dc:creator><rdf:Seq><rdf:li>{}</rdf:li></rdf:Seq></dc:creator>\n",
            xml_escape(author)
        ));
    }
    if let Some(subject) = &docinfo.subject {
        body.push_str(&format!(
            "   <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:description>\n",
            xml_escape(subject)
        ));
    }
    if let Some(keywords) = &docinfo.keywords {
        body.push_str(&format!(
            "   <pdf:Keywords>{}</pdf:Keywords>\n",
            xml_escape(keywords)
        ));
    }

    format!(
        "<?xpacket begin=\"\u{FEFF}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n\
         <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n\
         <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n\
         \x20 <rdf:Description rdf:about=\"\"\n\
         \x20     xmlns:dc=\"http://purl.org/dc/elements/1.1/\"\n\
         \x20     xmlns:pdf=\"http://ns.adobe.com/pdf/1.3/\"\n\
         \x20     xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\">\n\
         {body}\
         \x20  <pdf:Producer>{producer}</pdf:Producer>\n\
         \x20  <xmp:CreatorTool>{creator}</xmp:CreatorTool>\n\
         \x20  <xmp:ModifyDate>{modify}</xmp:ModifyDate>\n\
         \x20  <xmp:CreateDate>{create}</xmp:CreateDate>\n\
         \x20 </rdf:Description>\n\
         </rdf:RDF>\n\
         </x:xmpmeta>\n\
         <?xpacket end=\"w\"?>",
        body = body,
        producer = xml_escape(producer),
        creator = xml_escape(creator),
        modify = modify_iso,
        create = create_iso,
    )
}

/// Whether the finished file is big enough to deserve linearization.
pub fn should_linearize(path: &Path, options: &PipelineOptions) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() as f64 > options.fast_web_view * 1_000_000.0)
        .unwrap_or(false)
}
