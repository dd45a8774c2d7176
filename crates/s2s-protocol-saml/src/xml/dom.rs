//! Minimal element tree built from quick-xml events.
//!
//! Elements and attributes are addressed by local name. Namespace
//! declarations are dropped and prefixes are ignored. Every element keeps
//! the byte range it was read from, so signatures can be checked against
//! the exact source text of the element the tree resolved.

use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{SamlError, SamlResult};

/// An XML element with its attributes, children and text content.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
    /// Source bytes of the whole element, end tag included.
    pub span: Range<usize>,
    /// Offset just past the start tag.
    pub start_tag_end: usize,
}

impl XmlElement {
    /// Parses a document and returns its root element.
    ///
    /// Documents carrying a DTD are rejected.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            let before = position(&reader)?;
            match reader.read_event()? {
                Event::Start(start) => {
                    let mut element = Self::from_start(&start)?;
                    element.start_tag_end = position(&reader)?;
                    element.span = tag_start(xml, before)?..element.start_tag_end;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let mut element = Self::from_start(&start)?;
                    element.start_tag_end = position(&reader)?;
                    element.span = tag_start(xml, before)?..element.start_tag_end;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let mut element = stack
                        .pop()
                        .ok_or_else(|| SamlError::XmlParse("unbalanced end tag".to_string()))?;
                    element.span.end = position(&reader)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::DocType(_) => {
                    return Err(SamlError::XmlParse("DTDs are not allowed".to_string()));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SamlError::XmlParse("unexpected end of document".to_string()));
        }
        root.ok_or_else(|| SamlError::XmlParse("empty document".to_string()))
    }

    fn from_start(start: &BytesStart<'_>) -> SamlResult<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute?;
            let raw_key = attribute.key.as_ref();
            if raw_key == b"xmlns" || raw_key.starts_with(b"xmlns:") {
                continue;
            }
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    /// Returns the value of the attribute with the given local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Returns all children with the given local name.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Returns the trimmed text content.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// This element and all of its descendants, breadth first.
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut all = vec![self];
        let mut next = 0;
        while next < all.len() {
            let current = all[next];
            all.extend(current.children.iter());
            next += 1;
        }
        all
    }

    /// Number of elements in this subtree carrying `ID="id"`, whatever
    /// their name or quoting.
    pub fn count_id(&self, id: &str) -> usize {
        self.descendants()
            .into_iter()
            .filter(|e| e.attr("ID") == Some(id))
            .count()
    }
}

/// Current byte offset of the reader in the source text.
fn position(reader: &Reader<&[u8]>) -> SamlResult<usize> {
    usize::try_from(reader.buffer_position())
        .map_err(|_| SamlError::XmlParse("document too large".to_string()))
}

/// Offset of the `<` opening the tag read after `from`. Only skipped
/// whitespace can precede it.
fn tag_start(xml: &str, from: usize) -> SamlResult<usize> {
    xml.get(from..)
        .and_then(|rest| rest.find('<'))
        .map(|offset| from + offset)
        .ok_or_else(|| SamlError::XmlParse("tag start not found".to_string()))
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> SamlResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(SamlError::XmlParse("multiple root elements".to_string())),
    }
    Ok(())
}
