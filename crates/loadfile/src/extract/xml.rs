//! Well-formedness validation for XML items.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;

use super::items::Item;
use crate::error::{ConfigError, ItemError};
use crate::jobs::ErrorCode;

/// An item that passed validation and is ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedItem {
    pub name: String,
    /// Local name of the document element.
    pub root_element: String,
    pub element_count: u64,
    pub content: Vec<u8>,
}

pub trait ItemValidator: Send + Sync {
    fn validate(&self, item: Item) -> Result<ValidatedItem, ItemError>;
}

/// Accepts any well-formed XML document with a single root element,
/// optionally requiring a specific root local name.
#[derive(Debug, Clone, Default)]
pub struct XmlValidator {
    expected_root: Option<String>,
}

impl XmlValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expected_root(root: &str) -> Result<Self, ConfigError> {
        if !is_valid_element_name(root) {
            return Err(ConfigError::Validation {
                message: format!("'{}' is not a valid XML element name", root),
            });
        }
        Ok(Self {
            expected_root: Some(root.to_string()),
        })
    }

    pub fn expected_root(&self) -> Option<&str> {
        self.expected_root.as_deref()
    }
}

impl ItemValidator for XmlValidator {
    fn validate(&self, item: Item) -> Result<ValidatedItem, ItemError> {
        if item.content.iter().all(u8::is_ascii_whitespace) {
            return Err(ItemError::new(ErrorCode::XmlEmpty, "document is empty"));
        }

        let (root_element, element_count) = scan(&item.content)?;

        if let Some(expected) = &self.expected_root {
            if &root_element != expected {
                return Err(ItemError::new(
                    ErrorCode::XmlUnexpectedRoot,
                    format!("expected root <{}>, found <{}>", expected, root_element),
                )
                .with_context(json!({ "expected": expected, "found": root_element })));
            }
        }

        Ok(ValidatedItem {
            name: item.name,
            root_element,
            element_count,
            content: item.content,
        })
    }
}

fn malformed(message: impl Into<String>, position: u64) -> ItemError {
    ItemError::new(ErrorCode::XmlMalformed, message).with_context(json!({ "position": position }))
}

/// Walks every event once, returning the root's local name and the number
/// of elements.
fn scan(content: &[u8]) -> Result<(String, u64), ItemError> {
    let mut reader = Reader::from_reader(content);
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut root: Option<String> = None;
    let mut elements: u64 = 0;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed(e.to_string(), reader.error_position() as u64))?;

        match event {
            Event::Start(_) | Event::Empty(_) if depth == 0 && root.is_some() => {
                return Err(malformed(
                    "multiple root elements",
                    reader.buffer_position() as u64,
                ));
            }
            Event::Start(start) => {
                if depth == 0 {
                    root = Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
                }
                depth += 1;
                elements += 1;
            }
            Event::Empty(start) => {
                if depth == 0 {
                    root = Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
                }
                elements += 1;
            }
            Event::End(_) => {
                if depth == 0 {
                    return Err(malformed("unmatched end tag", reader.buffer_position() as u64));
                }
                depth -= 1;
            }
            Event::Text(text) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(malformed(
                        "text outside the root element",
                        reader.buffer_position() as u64,
                    ));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(malformed(
                    "CDATA outside the root element",
                    reader.buffer_position() as u64,
                ));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if depth != 0 {
        return Err(malformed("unclosed element at end of input", reader.buffer_position() as u64));
    }

    match root {
        Some(root) => Ok((root, elements)),
        None => Err(malformed("no root element", reader.buffer_position() as u64)),
    }
}

fn is_valid_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
