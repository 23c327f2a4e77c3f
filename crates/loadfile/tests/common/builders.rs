//! Builders for upload payloads.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// A well-formed invoice document with the given folio.
pub fn invoice_xml(folio: u32) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Comprobante Folio="{folio}" Total="1620.00">
  <Emisor Nombre="Acme Corporation"/>
  <Conceptos>
    <Concepto Descripcion="Widget" Importe="1620.00"/>
  </Conceptos>
</Comprobante>
"#
    )
    .into_bytes()
}

/// An XML document with an unclosed element.
pub fn malformed_xml() -> Vec<u8> {
    b"<Comprobante><Emisor></Comprobante>".to_vec()
}

/// Builder for in-memory zip archives.
pub struct ZipBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    /// Add a file entry.
    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.writer
            .start_file(name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        self.writer.write_all(data).expect("Failed to write zip entry");
        self
    }

    /// Add a directory entry.
    pub fn directory(mut self, name: &str) -> Self {
        self.writer
            .add_directory(name, SimpleFileOptions::default())
            .expect("Failed to add zip directory");
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.writer
            .finish()
            .expect("Failed to finish zip")
            .into_inner()
    }
}

impl Default for ZipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes that carry a zip extension but no central directory.
pub fn corrupt_zip() -> Vec<u8> {
    b"PK\x03\x04 this archive was truncated in transit".to_vec()
}
