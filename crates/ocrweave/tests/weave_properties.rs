//! End-to-end weaving invariants on synthesized documents: page counts,
//! geometry preservation, invisibility of the grafted layer, rotation
//! bookkeeping, and table-of-contents repair.

use lopdf::content::Content;
use lopdf::{Document, Object};
use ocrweave::hocr::{HocrLine, HocrPage, HocrWord};
use ocrweave::render::hocr_pdf::build_text_pdf;
use ocrweave::render::image_pdf::image_to_pdf;
use ocrweave::weave::{weave_layers, PageGraft, WeaveOptions};
use ocrweave::Resolution;
use std::path::{Path, PathBuf};

mod helpers;
use helpers::{build_pdf, mediabox, save, PageSpec};

fn text_layer(dir: &Path, words: &[&str]) -> PathBuf {
    let page = HocrPage {
        width: 1700.0,
        height: 2200.0,
        lines: vec![HocrLine {
            bbox: [100.0, 100.0, 1600.0, 180.0],
            words: words
                .iter()
                .enumerate()
                .map(|(n, word)| HocrWord {
                    bbox: [
                        100.0 + n as f64 * 300.0,
                        100.0,
                        350.0 + n as f64 * 300.0,
                        180.0,
                    ],
                    text: word.to_string(),
                    confidence: Some(90.0),
                })
                .collect(),
        }],
    };
    // 1700x2200 px at 200 DPI = 612x792 pt.
    let mut doc = build_text_pdf(&page, 200.0).unwrap();
    let path = dir.join("text-layer.pdf");
    doc.save(&path).unwrap();
    path
}

fn image_layer(dir: &Path) -> PathBuf {
    let png = dir.join("page.png");
    image::DynamicImage::new_luma8(1700, 2200).save(&png).unwrap();
    let pdf = dir.join("image-layer.pdf");
    image_to_pdf(&png, &pdf, Resolution::square(200.0)).unwrap();
    pdf
}

fn graft(page_index: usize, text: Option<PathBuf>, image: Option<PathBuf>) -> PageGraft {
    PageGraft {
        page_index,
        text_pdf: text,
        image_pdf: image,
        orientation_correction: 0,
        original_rotation: 0,
    }
}

#[test]
fn test_page_count_preserved() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let specs: Vec<PageSpec> = (0..4).map(|_| PageSpec::default()).collect();
    let base = save(&build_pdf(&specs, false), dir.path(), "base.pdf");
    let text = text_layer(dir.path(), &["hello"]);
    let output = dir.path().join("out.pdf");

    let grafts: Vec<PageGraft> = (0..4).map(|n| graft(n, Some(text.clone()), None)).collect();
    weave_layers(&base, &output, &grafts, WeaveOptions::default())?;

    let woven = Document::load(&output)?;
    assert_eq!(woven.get_pages().len(), 4);
    Ok(())
}

#[test]
fn test_geometry_preserved_in_lossless_mode() {
    let dir = tempfile::tempdir().unwrap();
    let base_doc = build_pdf(&[PageSpec::default()], false);
    let base = save(&base_doc, dir.path(), "base.pdf");
    let text = text_layer(dir.path(), &["word"]);
    let output = dir.path().join("out.pdf");

    weave_layers(
        &base,
        &output,
        &[graft(0, Some(text), None)],
        WeaveOptions::default(),
    )
    .unwrap();

    let woven = Document::load(&output).unwrap();
    let before = mediabox(&base_doc, 0);
    let after = mediabox(&woven, 0);
    for (a, b) in before.iter().zip(after.iter()) {
        assert!((a - b).abs() <= 0.1, "mediabox moved: {before:?} -> {after:?}");
    }
}

#[test]
fn test_grafted_text_is_invisible_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let base = save(&build_pdf(&[PageSpec::default()], false), dir.path(), "base.pdf");
    let text = text_layer(dir.path(), &["alpha", "beta", "gamma"]);
    let output = dir.path().join("out.pdf");
    weave_layers(
        &base,
        &output,
        &[graft(0, Some(text), None)],
        WeaveOptions::default(),
    )
    .unwrap();

    let woven = Document::load(&output).unwrap();
    let pages = woven.get_pages();
    let content = woven.get_page_content(pages[&1]).unwrap();
    let parsed = Content::decode(&content).unwrap();

    let mut mode = 0i64;
    let mut shown = 0;
    for op in &parsed.operations {
        match op.operator.as_str() {
            "BT" => mode = 0,
            "Tr" => mode = op.operands[0].as_i64().unwrap_or(mode),
            "Tj" | "TJ" | "'" | "\"" => {
                shown += 1;
                assert_eq!(mode, 3, "grafted text must render invisibly");
            }
            _ => {}
        }
    }
    assert_eq!(shown, 3);
}

#[test]
fn test_rotation_bookkeeping_all_cardinals() {
    // final /Rotate must equal (original - correction) mod 360 in lossless
    // mode, and 0 when the page was replaced by a corrected rasterization.
    for original in [0, 90, 180, 270] {
        for correction in [0, 90, 180, 270] {
            let dir = tempfile::tempdir().unwrap();
            let base = save(
                &build_pdf(
                    &[PageSpec {
                        rotation: original as i64,
                        ..Default::default()
                    }],
                    false,
                ),
                dir.path(),
                "base.pdf",
            );
            let text = text_layer(dir.path(), &["x"]);
            let output = dir.path().join("out.pdf");
            weave_layers(
                &base,
                &output,
                &[PageGraft {
                    page_index: 0,
                    text_pdf: Some(text),
                    image_pdf: None,
                    orientation_correction: correction,
                    original_rotation: original,
                }],
                WeaveOptions::default(),
            )
            .unwrap();

            let woven = Document::load(&output).unwrap();
            let pages = woven.get_pages();
            let page = woven.get_dictionary(pages[&1]).unwrap();
            let rotate = page.get(b"Rotate").unwrap().as_i64().unwrap();
            let expected = (original - correction).rem_euclid(360) as i64;
            assert_eq!(
                rotate, expected,
                "original {original}, correction {correction}"
            );
        }
    }
}

#[test]
fn test_replaced_page_rotate_is_zero() {
    let dir = tempfile::tempdir().unwrap();
    let base = save(
        &build_pdf(
            &[PageSpec {
                rotation: 180,
                ..Default::default()
            }],
            false,
        ),
        dir.path(),
        "base.pdf",
    );
    let image = image_layer(dir.path());
    let output = dir.path().join("out.pdf");
    weave_layers(
        &base,
        &output,
        &[PageGraft {
            page_index: 0,
            text_pdf: None,
            image_pdf: Some(image),
            orientation_correction: 180,
            original_rotation: 180,
        }],
        WeaveOptions::default(),
    )
    .unwrap();

    let woven = Document::load(&output).unwrap();
    let pages = woven.get_pages();
    let page = woven.get_dictionary(pages[&1]).unwrap();
    assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 0);
}

#[test]
fn test_toc_follows_replaced_pages() {
    let dir = tempfile::tempdir().unwrap();
    let specs: Vec<PageSpec> = (0..2).map(|_| PageSpec::default()).collect();
    let base = save(&build_pdf(&specs, true), dir.path(), "base.pdf");
    let image = image_layer(dir.path());
    let output = dir.path().join("out.pdf");

    weave_layers(
        &base,
        &output,
        &[
            graft(0, None, Some(image.clone())),
            graft(1, None, Some(image)),
        ],
        WeaveOptions::default(),
    )
    .unwrap();

    let woven = Document::load(&output).unwrap();
    let page_ids: Vec<_> = woven.get_pages().into_values().collect();

    // Every outline destination must reference a live page object.
    let catalog = woven.catalog().unwrap();
    let outlines_id = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
    let outlines = woven.get_dictionary(outlines_id).unwrap();
    let mut item = outlines.get(b"First").unwrap().as_reference().ok();
    let mut checked = 0;
    while let Some(item_id) = item {
        let node = woven.get_dictionary(item_id).unwrap();
        let dest = node.get(b"Dest").unwrap().as_array().unwrap();
        let target = dest[0].as_reference().unwrap();
        assert!(
            page_ids.contains(&target),
            "outline destination points at a dead object"
        );
        checked += 1;
        item = node.get(b"Next").ok().and_then(|n| n.as_reference().ok());
    }
    assert_eq!(checked, 2);
}

#[test]
fn test_skip_pages_are_untouched() {
    // A page with no graft keeps its content stream byte-identical.
    let dir = tempfile::tempdir().unwrap();
    let base_doc = build_pdf(&[PageSpec::default(), PageSpec::default()], false);
    let base = save(&base_doc, dir.path(), "base.pdf");
    let text = text_layer(dir.path(), &["only page one"]);
    let output = dir.path().join("out.pdf");

    weave_layers(
        &base,
        &output,
        &[graft(0, Some(text), None), graft(1, None, None)],
        WeaveOptions::default(),
    )
    .unwrap();

    let woven = Document::load(&output).unwrap();
    let before_pages: Vec<_> = base_doc.get_pages().into_values().collect();
    let after_pages: Vec<_> = woven.get_pages().into_values().collect();
    let before = base_doc.get_page_content(before_pages[1]).unwrap();
    let after = woven.get_page_content(after_pages[1]).unwrap();
    assert_eq!(before, after, "skipped page content changed");
}

#[test]
fn test_weave_is_idempotent_for_no_op_grafts() {
    // Weaving with no text and no image layers must not change page count
    // or geometry, twice in a row.
    let dir = tempfile::tempdir().unwrap();
    let base = save(&build_pdf(&[PageSpec::default()], false), dir.path(), "base.pdf");
    let first = dir.path().join("first.pdf");
    weave_layers(&base, &first, &[graft(0, None, None)], WeaveOptions::default()).unwrap();
    let second = dir.path().join("second.pdf");
    weave_layers(&first, &second, &[graft(0, None, None)], WeaveOptions::default()).unwrap();

    let doc1 = Document::load(&first).unwrap();
    let doc2 = Document::load(&second).unwrap();
    assert_eq!(doc1.get_pages().len(), doc2.get_pages().len());
    assert_eq!(mediabox(&doc1, 0), mediabox(&doc2, 0));
    let pages1: Vec<_> = doc1.get_pages().into_values().collect();
    let pages2: Vec<_> = doc2.get_pages().into_values().collect();
    assert_eq!(
        doc1.get_page_content(pages1[0]).unwrap(),
        doc2.get_page_content(pages2[0]).unwrap()
    );
}

#[test]
fn test_sidecar_form_feeds_match_page_count() {
    // Property: a merged sidecar for n pages contains n-1 form feeds.
    let dir = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for n in 0..5 {
        if n == 2 {
            files.push(None); // page skipped before OCR
        } else {
            let path = dir.path().join(format!("{n}.txt"));
            std::fs::write(&path, format!("text of page {}", n + 1)).unwrap();
            files.push(Some(path));
        }
    }
    let out = dir.path().join("sidecar.txt");
    ocrweave::sidecar::write_sidecar(&files, Some(&out)).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.matches('\x0c').count(), 4);
    assert!(text.starts_with("text of page 1"));
    assert!(text.contains("[OCR skipped on page 3]"));
}

#[test]
fn test_object_unused_by_weave_does_not_leak() {
    // Replacement must not leave the old page's image object in the output.
    let dir = tempfile::tempdir().unwrap();
    let base = save(&build_pdf(&[PageSpec::default()], false), dir.path(), "base.pdf");
    let image = image_layer(dir.path());
    let output = dir.path().join("out.pdf");
    weave_layers(
        &base,
        &output,
        &[graft(0, None, Some(image))],
        WeaveOptions::default(),
    )
    .unwrap();

    let woven = Document::load(&output).unwrap();
    // Exactly one image xobject should remain: the replacement's.
    let image_count = woven
        .objects
        .values()
        .filter(|obj| match obj {
            Object::Stream(stream) => {
                stream
                    .dict
                    .get(b"Subtype")
                    .ok()
                    .and_then(|s| s.as_name().ok())
                    == Some(b"Image")
            }
            _ => false,
        })
        .count();
    assert_eq!(image_count, 1);
}
