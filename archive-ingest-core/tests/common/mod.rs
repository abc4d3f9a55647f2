#![allow(dead_code)]

use lopdf::{dictionary, Document, Object};
use std::fs;
use std::path::{Path, PathBuf};

/// Bytes of a minimal, valid PDF with `pages` blank A4 pages.
pub fn pdf_bytes(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            });
            Object::Reference(page_id)
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(pages as i64),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("serialise test pdf");
    buf
}

/// Writes `bytes` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, bytes).expect("write test file");
    path
}

pub fn write_pdf(root: &Path, rel: &str, pages: u32) -> PathBuf {
    write_file(root, rel, &pdf_bytes(pages))
}

pub fn write_corrupt_pdf(root: &Path, rel: &str) -> PathBuf {
    write_file(root, rel, b"%PDF-1.4\nthis is not really a pdf body\n")
}
