//! Pipeline executor: schedules per-page work, fans results into the
//! weaver, and finishes metadata, PDF/A conversion, and output placement.
//!
//! Ordering: the inspector completes before any worker starts; page workers
//! are unordered among themselves; the weaver consumes results in strict
//! page order; the sidecar merger runs concurrently with weaving; the
//! metadata finisher begins only after both are done. The caller's output
//! file is written only after every check has passed.

pub mod page;
pub mod triage;
pub mod workdir;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::classify::decide_page;
use crate::error::{OcrWeaveError, Result};
use crate::exec::{ghostscript, qpdf, tesseract};
use crate::metadata::{self, apply_metadata, read_docinfo, should_linearize};
use crate::options::{OcrMode, OutputTarget, OutputType, PdfRenderer, PipelineOptions};
use crate::pdfa::{file_claims_pdfa, generate_pdfa_ps};
use crate::pdfinfo::PdfInfo;
use crate::sidecar::write_sidecar;
use crate::weave::{weave_layers, PageGraft, WeaveOptions};
use page::{process_page, PageJob, PageWorkResult};
use workdir::WorkDir;

/// Run the whole conversion described by `options`.
pub async fn run_pipeline(mut options: PipelineOptions) -> Result<()> {
    options.validate()?;
    let options = Arc::new(options);
    let workdir = WorkDir::new(options.keep_temporary_files)?;
    debug!("working directory: {}", workdir.path().display());

    // Triage: accept a PDF as-is, wrap a single image into one.
    let working_input = if triage::is_pdf(&options.input_file)? {
        if options.image_dpi.is_some() {
            warn!("--image-dpi is ignored because the input file is a PDF, not an image");
        }
        options.input_file.clone()
    } else {
        let origin = workdir.file("origin.pdf");
        triage::image_to_single_page_pdf(&options.input_file, &origin, &options)?;
        origin
    };

    // Inspect before anything else touches the file.
    let pdfinfo = {
        let input = working_input.clone();
        let detailed = options.ocr_mode == OcrMode::RedoOcr;
        tokio::task::spawn_blocking(move || PdfInfo::inspect(&input, detailed))
            .await
            .map_err(join_error)??
    };
    if pdfinfo.is_empty() {
        return Err(OcrWeaveError::input("input PDF has no pages"));
    }
    validate_pdfinfo(&pdfinfo, &options)?;

    // Classify every page up front; PriorOcrFound aborts here, before any
    // expensive work.
    let mut decisions = Vec::with_capacity(pdfinfo.len());
    for pageinfo in pdfinfo.pages() {
        decisions.push(decide_page(pageinfo, &options)?);
    }

    // Fail fast when a required external tool is absent, but only if this
    // run will actually invoke it.
    if decisions.iter().any(|d| d.needs_ocr()) {
        let gs_version = ghostscript::version().await?;
        let tess_version = tesseract::version().await?;
        debug!("found ghostscript {gs_version}, tesseract {tess_version}");
        if options.clean {
            let unpaper_version = crate::exec::unpaper::version().await?;
            debug!("found unpaper {unpaper_version}");
        }
    }

    // Fan out page workers, bounded by the computed worker count.
    let n_pages = pdfinfo.len();
    let workers = options.worker_count(n_pages);
    info!(
        pages = n_pages,
        workers,
        "processing {} page(s) with {} worker(s)",
        n_pages,
        workers
    );
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks: JoinSet<Result<PageWorkResult>> = JoinSet::new();
    for (pageinfo, decision) in pdfinfo.pages().iter().zip(decisions.into_iter()) {
        let job = PageJob {
            page_index: pageinfo.page_index,
            pageinfo: pageinfo.clone(),
            decision,
            options: Arc::clone(&options),
            input_pdf: working_input.clone(),
            workdir: workdir.path().to_path_buf(),
        };
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| OcrWeaveError::Interrupted)?;
            process_page(job).await
        });
    }

    // Fan in: any worker failure cancels the rest and propagates.
    let mut results: Vec<Option<PageWorkResult>> = (0..n_pages).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(result)) => {
                let index = result.page_index;
                results[index] = Some(result);
            }
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(join_error(e));
            }
        }
    }
    let results: Vec<PageWorkResult> = results
        .into_iter()
        .enumerate()
        .map(|(n, r)| {
            r.ok_or_else(|| OcrWeaveError::Other(format!("page {} produced no result", n + 1)))
        })
        .collect::<Result<_>>()?;

    // Weave and sidecar run concurrently; both must finish before the
    // metadata finisher starts.
    let woven = workdir.file("weave.pdf");
    let grafts: Vec<PageGraft> = results
        .iter()
        .map(|r| PageGraft {
            page_index: r.page_index,
            text_pdf: r.text_layer_pdf.clone(),
            image_pdf: r.visible_image_pdf.clone(),
            orientation_correction: r.orientation_correction,
            original_rotation: r.original_rotation,
        })
        .collect();
    let weave_task = {
        let base = working_input.clone();
        let output = woven.clone();
        let weave_options = WeaveOptions {
            strip_old_text: options.ocr_mode == OcrMode::RedoOcr,
        };
        tokio::task::spawn_blocking(move || weave_layers(&base, &output, &grafts, weave_options))
    };
    let sidecar_task = {
        let sidecar = options.sidecar.clone();
        let files: Vec<Option<PathBuf>> = results.iter().map(|r| r.sidecar_text.clone()).collect();
        tokio::task::spawn_blocking(move || match sidecar {
            Some(OutputTarget::Path(path)) => write_sidecar(&files, Some(&path)),
            Some(OutputTarget::Stdout) => write_sidecar(&files, None),
            None => Ok(()),
        })
    };
    let (weave_result, sidecar_result) = tokio::join!(weave_task, sidecar_task);
    weave_result.map_err(join_error)??;
    sidecar_result.map_err(join_error)??;

    if options.output_type == OutputType::None {
        info!("output type 'none': no output PDF produced");
        return Ok(());
    }

    // Metadata carry + XMP.
    let engine_tag = match options.pdf_renderer {
        PdfRenderer::Hocr => "OCR",
        _ => "OCR-PDF",
    };
    let engine_version = match tesseract::version().await {
        Ok(version) => version,
        Err(e) => {
            warn!("could not determine OCR engine version: {e}");
            "unknown".to_string()
        }
    };
    let metafix = workdir.file("metafix.pdf");
    {
        let original_input = working_input.clone();
        let woven = woven.clone();
        let metafix = metafix.clone();
        let options = Arc::clone(&options);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let original = lopdf::Document::load(&original_input)
                .map_err(|e| OcrWeaveError::input_from("cannot reread input", e))?;
            let docinfo = read_docinfo(&original);
            drop(original);
            let mut working = lopdf::Document::load(&woven)
                .map_err(|e| OcrWeaveError::Other(format!("cannot reopen woven file: {e}")))?;
            apply_metadata(&mut working, &docinfo, &options, engine_tag, &engine_version)?;
            working
                .save(&metafix)
                .map_err(|e| OcrWeaveError::Other(format!("cannot save metadata pass: {e}")))?;
            Ok(())
        })
        .await
        .map_err(join_error)??;
    }

    // PDF/A normalization, when requested, with the claim check that decides
    // success.
    let finished = if options.output_type.is_pdfa() {
        let ps_stub = workdir.file("pdfa.ps");
        generate_pdfa_ps(&ps_stub)?;
        let pdfa_out = workdir.file("pdfa.pdf");
        ghostscript::generate_pdfa(
            &[metafix.as_path(), ps_stub.as_path()],
            &pdfa_out,
            ghostscript::PdfaCompression::Auto,
            pdfinfo.min_version(),
            options.output_type.pdfa_part(),
        )
        .await?;
        match file_claims_pdfa(&pdfa_out)? {
            Some(claim) => {
                info!("output is {}", claim.label());
                pdfa_out
            }
            None => {
                return Err(OcrWeaveError::PdfaConversionFailed(
                    "the converted file does not claim PDF/A conformance".into(),
                ));
            }
        }
    } else {
        metafix
    };

    // Output sanity check before anything is copied out of the workdir.
    {
        let finished = finished.clone();
        let expected_pages = n_pages;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let doc = lopdf::Document::load(&finished).map_err(|e| {
                OcrWeaveError::InvalidOutputPdf(format!("output failed to parse: {e}"))
            })?;
            let produced = doc.get_pages().len();
            if produced != expected_pages {
                return Err(OcrWeaveError::InvalidOutputPdf(format!(
                    "output has {produced} pages, expected {expected_pages}"
                )));
            }
            Ok(())
        })
        .await
        .map_err(join_error)??;
    }

    let finished = if should_linearize(&finished, &options) {
        info!("linearizing for fast web view");
        let linearized = workdir.file("linearized.pdf");
        qpdf::linearize(&finished, &linearized).await?;
        linearized
    } else {
        finished
    };

    deliver_output(&finished, &options.output_file).await?;
    info!("{} {} finished", metadata::PROGRAM_NAME, metadata::PROGRAM_VERSION);
    Ok(())
}

/// Copy the finished file to its destination. The destination is written in
/// one pass only after the pipeline fully succeeded.
async fn deliver_output(finished: &Path, target: &OutputTarget) -> Result<()> {
    match target {
        OutputTarget::Stdout => {
            let finished = finished.to_path_buf();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let mut input = std::fs::File::open(&finished)?;
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                std::io::copy(&mut input, &mut lock)?;
                use std::io::Write;
                lock.flush()?;
                Ok(())
            })
            .await
            .map_err(join_error)??;
        }
        OutputTarget::Path(path) => {
            std::fs::copy(finished, path).map_err(|e| OcrWeaveError::OutputFileAccess {
                path: path.clone(),
                message: e.to_string(),
            })?;
            info!("output written to {}", path.display());
        }
    }
    Ok(())
}

fn validate_pdfinfo(pdfinfo: &PdfInfo, options: &PipelineOptions) -> Result<()> {
    if pdfinfo.needs_rendering() {
        return Err(OcrWeaveError::input(
            "this PDF contains dynamic XFA forms and can only be read by \
             Adobe Acrobat or Adobe Reader",
        ));
    }
    if pdfinfo.has_userunit() && options.output_type.is_pdfa() {
        return Err(OcrWeaveError::input(
            "this input file uses a PDF feature (UserUnit) that the PDF/A \
             normalizer cannot output. Use --output-type pdf instead",
        ));
    }
    if pdfinfo.has_acroform() {
        if options.ocr_mode == OcrMode::RedoOcr {
            return Err(OcrWeaveError::input(
                "this PDF has a user fillable form. --redo-ocr is not possible \
                 on such files",
            ));
        }
        warn!(
            "this PDF has a fillable form. Chances are it is a pure digital \
             document that does not need OCR"
        );
        if options.ocr_mode != OcrMode::ForceOcr {
            info!(
                "use --force-ocr to produce an image of the form and all filled \
                 form fields. The output PDF will be 'flattened' and no longer \
                 fillable"
            );
        }
    }
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> OcrWeaveError {
    OcrWeaveError::Other(format!("task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdfinfo::{PageInfo, Tristate};
    use lopdf::dictionary;

    fn empty_pdfinfo_doc(userunit: f64) -> PdfInfo {
        // Synthesize a PdfInfo by inspecting a real one-page document.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pdf");
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut page = lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => lopdf::Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        if (userunit - 1.0).abs() > f64::EPSILON {
            page.set("UserUnit", lopdf::Object::Real(userunit as f32));
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            lopdf::Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => vec![lopdf::Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => lopdf::Object::Reference(pages_id),
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(&path).unwrap();
        PdfInfo::inspect(&path, false).unwrap()
    }

    #[test]
    fn test_userunit_blocks_pdfa() {
        let pdfinfo = empty_pdfinfo_doc(2.0);
        let options = PipelineOptions::default(); // pdfa output
        assert!(validate_pdfinfo(&pdfinfo, &options).is_err());

        let plain = PipelineOptions {
            output_type: OutputType::Pdf,
            ..Default::default()
        };
        assert!(validate_pdfinfo(&pdfinfo, &plain).is_ok());
    }

    #[test]
    fn test_normal_page_passes_validation() {
        let pdfinfo = empty_pdfinfo_doc(1.0);
        let options = PipelineOptions::default();
        assert!(validate_pdfinfo(&pdfinfo, &options).is_ok());
    }

    #[tokio::test]
    async fn test_run_pipeline_rejects_encrypted_marker() {
        // A PDF whose trailer carries /Encrypt is refused with the encrypted
        // error before any external tool runs.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enc.pdf");
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => lopdf::Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            lopdf::Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => vec![lopdf::Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => lopdf::Object::Reference(pages_id),
        });
        doc.trailer.set("Root", catalog_id);
        let enc_id = doc.add_object(lopdf::dictionary! { "Filter" => "Standard" });
        doc.trailer.set("Encrypt", lopdf::Object::Reference(enc_id));
        doc.save(&path).unwrap();

        let options = PipelineOptions {
            input_file: path,
            output_file: OutputTarget::Path(dir.path().join("out.pdf")),
            ..Default::default()
        };
        let err = run_pipeline(options).await.unwrap_err();
        assert!(matches!(err, OcrWeaveError::EncryptedPdf));
        assert_eq!(err.exit_code().as_i32(), 8);
    }

    #[tokio::test]
    async fn test_run_pipeline_prior_ocr_found() {
        // A page with interior text in normal mode fails with exit code 6
        // before invoking any external tool.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text.pdf");
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = lopdf::content::Content {
            operations: vec![
                lopdf::content::Operation::new("BT", vec![]),
                lopdf::content::Operation::new(
                    "Tf",
                    vec![lopdf::Object::Name(b"F1".to_vec()), lopdf::Object::Real(12.0)],
                ),
                lopdf::content::Operation::new(
                    "Td",
                    vec![lopdf::Object::Integer(300), lopdf::Object::Integer(400)],
                ),
                lopdf::content::Operation::new(
                    "Tj",
                    vec![lopdf::Object::string_literal("existing text")],
                ),
                lopdf::content::Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(lopdf::Stream::new(
            lopdf::dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => lopdf::Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => lopdf::Object::Reference(content_id),
        });
        doc.objects.insert(
            pages_id,
            lopdf::Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => vec![lopdf::Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => lopdf::Object::Reference(pages_id),
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(&path).unwrap();

        let options = PipelineOptions {
            input_file: path,
            output_file: OutputTarget::Path(dir.path().join("out.pdf")),
            ..Default::default()
        };
        let err = run_pipeline(options).await.unwrap_err();
        assert_eq!(err.exit_code().as_i32(), 6);
    }

    #[test]
    fn test_pageinfo_clone_for_jobs() {
        // PageJob requires owned PageInfo; make sure cloning keeps fields.
        let page = PageInfo {
            page_index: 3,
            mediabox: [0.0, 0.0, 612.0, 792.0],
            user_unit: 1.0,
            rotation: 90,
            has_text: Tristate::No,
            has_vector: Tristate::Unknown,
            images: Vec::new(),
            text_boxes: Vec::new(),
        };
        let clone = page.clone();
        assert_eq!(clone.page_index, 3);
        assert_eq!(clone.rotation, 90);
    }
}
