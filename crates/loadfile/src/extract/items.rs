//! Lazy enumeration of the items inside a stored blob.

use std::io::{Read, Seek};

use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{ExtractError, ItemError};
use crate::jobs::ErrorCode;
use crate::storage::BlobKind;

/// Default per-item size cap (50 MiB).
pub const DEFAULT_MAX_ITEM_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_item_bytes: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
        }
    }
}

/// One raw item: an archive entry or the single uploaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug)]
pub enum Entry {
    Item(Item),
    /// The entry exists but its bytes could not be produced.
    Unreadable { name: String, error: ItemError },
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Item(item) => &item.name,
            Entry::Unreadable { name, .. } => name,
        }
    }
}

enum Source<R: Read + Seek> {
    Archive {
        archive: ZipArchive<R>,
        next_index: usize,
    },
    Document {
        reader: Option<R>,
    },
}

/// Finite, non-restartable iterator over the items of one blob. Archive
/// entries are decompressed only when reached.
pub struct ItemIter<R: Read + Seek> {
    source: Source<R>,
    blob_name: String,
    limits: ExtractionLimits,
}

/// Opens a blob for item enumeration. A corrupt archive fails here, before
/// any item is produced.
pub fn open_items<R: Read + Seek>(
    reader: R,
    kind: BlobKind,
    blob_name: &str,
    limits: ExtractionLimits,
) -> Result<ItemIter<R>, ExtractError> {
    let source = match kind {
        BlobKind::Archive => {
            let archive = ZipArchive::new(reader).map_err(|e| match e {
                ZipError::Io(source) => ExtractError::ReadBlob {
                    name: blob_name.to_string(),
                    source,
                },
                other => ExtractError::CorruptArchive {
                    name: blob_name.to_string(),
                    reason: other.to_string(),
                },
            })?;
            log::debug!("Opened archive {} with {} entries", blob_name, archive.len());
            Source::Archive {
                archive,
                next_index: 0,
            }
        }
        BlobKind::Document => Source::Document {
            reader: Some(reader),
        },
    };

    Ok(ItemIter {
        source,
        blob_name: blob_name.to_string(),
        limits,
    })
}

impl<R: Read + Seek> ItemIter<R> {
    fn next_archive_entry(
        archive: &mut ZipArchive<R>,
        index: usize,
        blob_name: &str,
        limits: ExtractionLimits,
    ) -> Option<Result<Entry, ExtractError>> {
        let name_hint = archive.name_for_index(index).map(str::to_string);
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(ZipError::Io(source)) => {
                return Some(Err(ExtractError::ReadBlob {
                    name: blob_name.to_string(),
                    source,
                }))
            }
            Err(e) => {
                let name = name_hint.unwrap_or_else(|| format!("entry #{}", index));
                return Some(Ok(Entry::Unreadable {
                    name,
                    error: ItemError::new(ErrorCode::ItemUnreadable, e.to_string()),
                }));
            }
        };

        if file.is_dir() {
            return None;
        }

        let name = file.name().to_string();
        if file.size() > limits.max_item_bytes {
            return Some(Ok(too_large(name, file.size(), limits)));
        }

        match read_capped(&mut file, limits.max_item_bytes) {
            Ok(Some(content)) => Some(Ok(Entry::Item(Item { name, content }))),
            Ok(None) => Some(Ok(too_large(name, file.size(), limits))),
            Err(e) => Some(Ok(Entry::Unreadable {
                name,
                error: ItemError::new(ErrorCode::ItemUnreadable, e.to_string()),
            })),
        }
    }
}

impl<R: Read + Seek> Iterator for ItemIter<R> {
    type Item = Result<Entry, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Archive {
                archive,
                next_index,
            } => {
                while *next_index < archive.len() {
                    let index = *next_index;
                    *next_index += 1;
                    // Directory entries yield nothing; keep scanning.
                    if let Some(entry) =
                        Self::next_archive_entry(archive, index, &self.blob_name, self.limits)
                    {
                        return Some(entry);
                    }
                }
                None
            }
            Source::Document { reader } => {
                let mut reader = reader.take()?;
                let name = self.blob_name.clone();
                match read_capped(&mut reader, self.limits.max_item_bytes) {
                    Ok(Some(content)) => Some(Ok(Entry::Item(Item { name, content }))),
                    Ok(None) => Some(Ok(too_large(
                        name,
                        self.limits.max_item_bytes + 1,
                        self.limits,
                    ))),
                    Err(source) => Some(Err(ExtractError::ReadBlob { name, source })),
                }
            }
        }
    }
}

/// Reads at most `max` bytes. `Ok(None)` means the input was longer.
fn read_capped<R: Read>(reader: &mut R, max: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut content = Vec::new();
    reader.take(max.saturating_add(1)).read_to_end(&mut content)?;
    if content.len() as u64 > max {
        Ok(None)
    } else {
        Ok(Some(content))
    }
}

fn too_large(name: String, size: u64, limits: ExtractionLimits) -> Entry {
    Entry::Unreadable {
        name,
        error: ItemError::new(
            ErrorCode::ItemTooLarge,
            format!("item exceeds {} bytes", limits.max_item_bytes),
        )
        .with_context(serde_json::json!({
            "size": size,
            "limit": limits.max_item_bytes,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn names(iter: ItemIter<Cursor<Vec<u8>>>) -> Vec<String> {
        iter.map(|e| e.unwrap().name().to_string()).collect()
    }

    #[test]
    fn test_archive_yields_entries_in_order() {
        let bytes = build_zip(&[("a.xml", b"<a/>"), ("b.xml", b"<b/>")]);
        let iter = open_items(
            Cursor::new(bytes),
            BlobKind::Archive,
            "batch.zip",
            ExtractionLimits::default(),
        )
        .unwrap();
        assert_eq!(names(iter), vec!["a.xml", "b.xml"]);
    }

    #[test]
    fn test_archive_skips_directories() {
        let bytes = build_zip(&[("docs/", b""), ("docs/a.xml", b"<a/>")]);
        let iter = open_items(
            Cursor::new(bytes),
            BlobKind::Archive,
            "batch.zip",
            ExtractionLimits::default(),
        )
        .unwrap();
        assert_eq!(names(iter), vec!["docs/a.xml"]);
    }

    #[test]
    fn test_archive_item_content() {
        let bytes = build_zip(&[("a.xml", b"<a>1</a>")]);
        let mut iter = open_items(
            Cursor::new(bytes),
            BlobKind::Archive,
            "batch.zip",
            ExtractionLimits::default(),
        )
        .unwrap();
        match iter.next().unwrap().unwrap() {
            Entry::Item(item) => assert_eq!(item.content, b"<a>1</a>"),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_corrupt_archive_is_structural() {
        let result = open_items(
            Cursor::new(b"this is not a zip file".to_vec()),
            BlobKind::Archive,
            "batch.zip",
            ExtractionLimits::default(),
        );
        match result {
            Err(e) => assert_eq!(e.code(), ErrorCode::ArchiveCorrupt),
            Ok(_) => panic!("corrupt archive opened"),
        }
    }

    #[test]
    fn test_empty_archive_yields_nothing() {
        let bytes = build_zip(&[]);
        let iter = open_items(
            Cursor::new(bytes),
            BlobKind::Archive,
            "empty.zip",
            ExtractionLimits::default(),
        )
        .unwrap();
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn test_unopenable_entry_keeps_its_name() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(
                "secret.xml",
                SimpleFileOptions::default().with_deprecated_encryption(b"hunter2"),
            )
            .unwrap();
        writer.write_all(b"<a/>").unwrap();
        writer
            .start_file("plain.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<b/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let mut iter = open_items(
            Cursor::new(bytes),
            BlobKind::Archive,
            "batch.zip",
            ExtractionLimits::default(),
        )
        .unwrap();

        match iter.next().unwrap().unwrap() {
            Entry::Unreadable { name, error } => {
                assert_eq!(name, "secret.xml");
                assert_eq!(error.code, ErrorCode::ItemUnreadable);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
        assert_eq!(iter.next().unwrap().unwrap().name(), "plain.xml");
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_oversized_entry_is_per_item() {
        let big = vec![b'x'; 64];
        let bytes = build_zip(&[("big.xml", &big), ("small.xml", b"<a/>")]);
        let mut iter = open_items(
            Cursor::new(bytes),
            BlobKind::Archive,
            "batch.zip",
            ExtractionLimits { max_item_bytes: 16 },
        )
        .unwrap();

        match iter.next().unwrap().unwrap() {
            Entry::Unreadable { name, error } => {
                assert_eq!(name, "big.xml");
                assert_eq!(error.code, ErrorCode::ItemTooLarge);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(matches!(iter.next().unwrap().unwrap(), Entry::Item(_)));
    }

    #[test]
    fn test_document_yields_single_item() {
        let mut iter = open_items(
            Cursor::new(b"<invoice/>".to_vec()),
            BlobKind::Document,
            "invoice.xml",
            ExtractionLimits::default(),
        )
        .unwrap();
        match iter.next().unwrap().unwrap() {
            Entry::Item(item) => {
                assert_eq!(item.name, "invoice.xml");
                assert_eq!(item.content, b"<invoice/>");
            }
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_oversized_document() {
        let mut iter = open_items(
            Cursor::new(vec![b' '; 32]),
            BlobKind::Document,
            "invoice.xml",
            ExtractionLimits { max_item_bytes: 8 },
        )
        .unwrap();
        match iter.next().unwrap().unwrap() {
            Entry::Unreadable { error, .. } => assert_eq!(error.code, ErrorCode::ItemTooLarge),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_read_capped_boundary() {
        let exact = read_capped(&mut Cursor::new(vec![0u8; 8]), 8).unwrap();
        assert_eq!(exact.map(|c| c.len()), Some(8));
        assert!(read_capped(&mut Cursor::new(vec![0u8; 9]), 8)
            .unwrap()
            .is_none());
    }
}
