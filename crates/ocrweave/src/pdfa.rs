//! PDF/A production support: the pdfmark stub fed to the normalizer, and the
//! post-conversion claim check.
//!
//! The stub declares an sRGB OutputIntent. The ICC profile itself is the one
//! bundled with the normalizer (`srgb.icc` on its library path), located at
//! interpretation time with `findlibfile`, so no binary profile ships with
//! this crate.

use std::path::Path;

use lopdf::{Document, Object};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{OcrWeaveError, Result};

/// The PostScript pdfmark program declaring the sRGB OutputIntent.
pub const SRGB_OUTPUT_INTENT_PS: &str = r#"%!
% Define an ICC profile stream from the interpreter's bundled sRGB profile.
[/_objdef {icc_PDFA} /type /stream /OBJ pdfmark
[{icc_PDFA} << /N 3 >> /PUT pdfmark
(srgb.icc) findlibfile
{ pop
  [{icc_PDFA} 2 index /PUT pdfmark
  pop
}
{ (ERROR: srgb.icc not found on library path) print flush
} ifelse

[/_objdef {OutputIntent_PDFA} /type /dict /OBJ pdfmark
[{OutputIntent_PDFA} <<
  /Type /OutputIntent
  /S /GTS_PDFA1
  /DestOutputProfile {icc_PDFA}
  /OutputConditionIdentifier (sRGB)
>> /PUT pdfmark

[{Catalog} << /OutputIntents [ {OutputIntent_PDFA} ] >> /PUT pdfmark
"#;

/// Write the pdfmark stub used during PDF/A conversion.
pub fn generate_pdfa_ps(output: &Path) -> Result<()> {
    // Everything in the stub is ASCII; the normalizer's PostScript reader
    // does not get to guess encodings.
    debug_assert!(SRGB_OUTPUT_INTENT_PS.is_ascii());
    std::fs::write(output, SRGB_OUTPUT_INTENT_PS)?;
    Ok(())
}

static PDFAID_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"pdfaid:part(?:="|>\s*)(\d+)"#).expect("static regex")
});
static PDFAID_CONFORMANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"pdfaid:conformance(?:="|>\s*)([ABU])"#).expect("static regex")
});

/// A PDF/A declaration read from a file's XMP metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfaClaim {
    pub part: String,
    pub conformance: String,
}

impl PdfaClaim {
    /// `"PDF/A-2B"` style label.
    pub fn label(&self) -> String {
        format!("PDF/A-{}{}", self.part, self.conformance)
    }
}

/// Check whether the file's XMP metadata claims PDF/A conformance.
///
/// This is only a marker check, not validation; a full validator is a
/// separate tool.
pub fn file_claims_pdfa(path: &Path) -> Result<Option<PdfaClaim>> {
    let doc = Document::load(path).map_err(|e| {
        OcrWeaveError::InvalidOutputPdf(format!("cannot reopen output: {e}"))
    })?;
    Ok(document_claims_pdfa(&doc))
}

pub fn document_claims_pdfa(doc: &Document) -> Option<PdfaClaim> {
    let catalog = doc.catalog().ok()?;
    let metadata = catalog.get(b"Metadata").ok()?;
    let stream = match metadata {
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Stream(stream) => stream,
            _ => return None,
        },
        Object::Stream(stream) => stream,
        _ => return None,
    };
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let xmp = String::from_utf8_lossy(&data);

    let part = PDFAID_PART.captures(&xmp)?.get(1)?.as_str().to_string();
    let conformance = PDFAID_CONFORMANCE
        .captures(&xmp)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "B".to_string());
    Some(PdfaClaim { part, conformance })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn doc_with_xmp(xmp: &str) -> Document {
        let mut doc = Document::with_version("1.5");
        let metadata_id = doc.add_object(Stream::new(
            dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
            xmp.as_bytes().to_vec(),
        ));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Metadata" => Object::Reference(metadata_id),
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_stub_is_ascii_and_mentions_intent() {
        assert!(SRGB_OUTPUT_INTENT_PS.is_ascii());
        assert!(SRGB_OUTPUT_INTENT_PS.contains("/GTS_PDFA1"));
        assert!(SRGB_OUTPUT_INTENT_PS.contains("OutputIntents"));
        assert!(SRGB_OUTPUT_INTENT_PS.contains("srgb.icc"));
    }

    #[test]
    fn test_claim_attribute_form() {
        let doc = doc_with_xmp(
            r#"<rdf:Description pdfaid:part="2" pdfaid:conformance="B"/>"#,
        );
        let claim = document_claims_pdfa(&doc).unwrap();
        assert_eq!(claim.part, "2");
        assert_eq!(claim.conformance, "B");
        assert_eq!(claim.label(), "PDF/A-2B");
    }

    #[test]
    fn test_claim_element_form() {
        let doc = doc_with_xmp(
            "<pdfaid:part>3</pdfaid:part><pdfaid:conformance>B</pdfaid:conformance>",
        );
        let claim = document_claims_pdfa(&doc).unwrap();
        assert_eq!(claim.part, "3");
    }

    #[test]
    fn test_no_claim_without_marker() {
        let doc = doc_with_xmp("<x:xmpmeta>no pdfa here</x:xmpmeta>");
        assert!(document_claims_pdfa(&doc).is_none());
    }

    #[test]
    fn test_no_claim_without_metadata() {
        let mut doc = Document::with_version("1.5");
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog" });
        doc.trailer.set("Root", catalog_id);
        assert!(document_claims_pdfa(&doc).is_none());
    }

    #[test]
    fn test_generate_ps_file() {
        let dir = tempfile::tempdir().unwrap();
        let ps = dir.path().join("pdfa.ps");
        generate_pdfa_ps(&ps).unwrap();
        let content = std::fs::read_to_string(&ps).unwrap();
        assert!(content.starts_with("%!"));
    }
}
