//! Copying object graphs between PDF documents.
//!
//! Replacing a page or grafting a font means carrying an object and
//! everything it references from a single-page source document into the base
//! document, renumbering along the way. The id map doubles as the visited
//! set, so reference cycles terminate.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{OcrWeaveError, Result};

/// Tracks identity between one source document and the destination.
#[derive(Debug, Default)]
pub struct Importer {
    map: HashMap<ObjectId, ObjectId>,
}

impl Importer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import the object behind `src_id` (with its whole reference closure)
    /// into `dst`, returning the destination id.
    pub fn import_ref(
        &mut self,
        dst: &mut Document,
        src: &Document,
        src_id: ObjectId,
    ) -> Result<ObjectId> {
        if let Some(&mapped) = self.map.get(&src_id) {
            return Ok(mapped);
        }
        // Reserve the id before descending so cycles resolve to it.
        let new_id = dst.new_object_id();
        self.map.insert(src_id, new_id);
        let object = src
            .get_object(src_id)
            .map_err(|e| OcrWeaveError::PdfMergeFailed {
                message: format!("dangling object {src_id:?}: {e}"),
            })?
            .clone();
        let converted = self.convert(dst, src, object)?;
        dst.objects.insert(new_id, converted);
        Ok(new_id)
    }

    /// Import a direct object, rewriting any references inside it.
    pub fn import_object(
        &mut self,
        dst: &mut Document,
        src: &Document,
        object: Object,
    ) -> Result<Object> {
        self.convert(dst, src, object)
    }

    /// Import a page dictionary, detached from its source page tree.
    ///
    /// The returned object is installed in `dst` with `/Parent` pointing at
    /// `new_parent`.
    pub fn import_page(
        &mut self,
        dst: &mut Document,
        src: &Document,
        src_page_id: ObjectId,
        new_parent: ObjectId,
    ) -> Result<ObjectId> {
        let mut page = src
            .get_dictionary(src_page_id)
            .map_err(|e| OcrWeaveError::PdfMergeFailed {
                message: format!("source page missing: {e}"),
            })?
            .clone();
        // The source /Parent would drag the whole source page tree along.
        page.remove(b"Parent");
        let converted = self.convert(dst, src, Object::Dictionary(page))?;
        let new_id = dst.add_object(converted);
        if let Ok(dict) = dst.get_dictionary_mut(new_id) {
            dict.set("Parent", Object::Reference(new_parent));
        }
        Ok(new_id)
    }

    fn convert(&mut self, dst: &mut Document, src: &Document, object: Object) -> Result<Object> {
        Ok(match object {
            Object::Reference(id) => Object::Reference(self.import_ref(dst, src, id)?),
            Object::Array(items) => {
                let mut converted = Vec::with_capacity(items.len());
                for item in items {
                    converted.push(self.convert(dst, src, item)?);
                }
                Object::Array(converted)
            }
            Object::Dictionary(dict) => Object::Dictionary(self.convert_dict(dst, src, &dict)?),
            Object::Stream(mut stream) => {
                let dict = self.convert_dict(dst, src, &stream.dict)?;
                stream.dict = dict;
                Object::Stream(stream)
            }
            other => other,
        })
    }

    fn convert_dict(
        &mut self,
        dst: &mut Document,
        src: &Document,
        dict: &Dictionary,
    ) -> Result<Dictionary> {
        let mut converted = Dictionary::new();
        for (key, value) in dict.iter() {
            let value = self.convert(dst, src, value.clone())?;
            converted.set(key.clone(), value);
        }
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn source_doc() -> (Document, ObjectId) {
        let mut src = Document::with_version("1.5");
        let shared = src.add_object(dictionary! { "Kind" => "Shared" });
        let stream = src.add_object(Stream::new(
            dictionary! { "Ref" => Object::Reference(shared) },
            b"stream data".to_vec(),
        ));
        let root = src.add_object(dictionary! {
            "A" => Object::Reference(shared),
            "B" => Object::Reference(shared),
            "S" => Object::Reference(stream),
            "Direct" => vec![Object::Reference(shared), 42.into()],
        });
        (src, root)
    }

    #[test]
    fn test_shared_objects_imported_once() {
        let (src, root) = source_doc();
        let mut dst = Document::with_version("1.5");
        let before = dst.objects.len();
        let mut importer = Importer::new();
        let new_root = importer.import_ref(&mut dst, &src, root).unwrap();

        // root + stream + shared = 3 new objects, not 4.
        assert_eq!(dst.objects.len() - before, 3);
        let dict = dst.get_dictionary(new_root).unwrap();
        let a = dict.get(b"A").unwrap().as_reference().unwrap();
        let b = dict.get(b"B").unwrap().as_reference().unwrap();
        assert_eq!(a, b, "shared target must map to a single object");
    }

    #[test]
    fn test_stream_content_preserved() {
        let (src, root) = source_doc();
        let mut dst = Document::with_version("1.5");
        let mut importer = Importer::new();
        let new_root = importer.import_ref(&mut dst, &src, root).unwrap();
        let dict = dst.get_dictionary(new_root).unwrap();
        let s = dict.get(b"S").unwrap().as_reference().unwrap();
        match dst.get_object(s).unwrap() {
            Object::Stream(stream) => assert_eq!(stream.content, b"stream data".to_vec()),
            _ => panic!("expected stream"),
        }
    }

    #[test]
    fn test_cycle_terminates() {
        let mut src = Document::with_version("1.5");
        let a_id = src.new_object_id();
        let b_id = src.add_object(dictionary! { "Parent" => Object::Reference(a_id) });
        src.objects.insert(
            a_id,
            Object::Dictionary(dictionary! { "Child" => Object::Reference(b_id) }),
        );

        let mut dst = Document::with_version("1.5");
        let mut importer = Importer::new();
        let new_a = importer.import_ref(&mut dst, &src, a_id).unwrap();
        let a_dict = dst.get_dictionary(new_a).unwrap();
        let new_b = a_dict.get(b"Child").unwrap().as_reference().unwrap();
        let b_dict = dst.get_dictionary(new_b).unwrap();
        assert_eq!(
            b_dict.get(b"Parent").unwrap().as_reference().unwrap(),
            new_a
        );
    }

    #[test]
    fn test_import_page_reparents() {
        let mut src = Document::with_version("1.5");
        let src_pages = src.add_object(dictionary! { "Type" => "Pages" });
        let src_page = src.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(src_pages),
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        });

        let mut dst = Document::with_version("1.5");
        let dst_pages = dst.add_object(dictionary! { "Type" => "Pages" });
        let mut importer = Importer::new();
        let new_page = importer
            .import_page(&mut dst, &src, src_page, dst_pages)
            .unwrap();
        let page = dst.get_dictionary(new_page).unwrap();
        assert_eq!(
            page.get(b"Parent").unwrap().as_reference().unwrap(),
            dst_pages
        );
        // The source page tree was not dragged along.
        assert!(!dst
            .objects
            .values()
            .any(|o| matches!(o, Object::Dictionary(d)
                if d.get(b"Type").ok().and_then(|t| t.as_name().ok()) == Some(b"Pages")
                    && d.len() == 1)));
    }
}
