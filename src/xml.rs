/// Tagged-tree XML documents
///
/// Both track dialects are read into the same `Element` tree with
/// quick-xml's event reader and written back with its indenting writer.
/// Lookups match on local names, so `gpxtpx:hr` and `ns3:hr` both answer
/// to `"hr"`.

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fmt::Display;

use crate::error::{Result, TcxError};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Qualified name exactly as written, prefix included
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// The `xmlns` declared on this element
    pub fn default_namespace(&self) -> Option<&str> {
        self.attribute("xmlns")
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.local_name() == local)
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(element) if element.local_name() == local => Some(element),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.local_name() == local)
    }

    /// First match in document order, at any depth below this element.
    pub fn find(&self, local: &str) -> Option<&Element> {
        for element in self.elements() {
            if element.local_name() == local {
                return Some(element);
            }
            if let Some(found) = element.find(local) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_mut(&mut self, local: &str) -> Option<&mut Element> {
        for node in self.children.iter_mut() {
            if let Node::Element(element) = node {
                if element.local_name() == local {
                    return Some(element);
                }
                if let Some(found) = element.find_mut(local) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// All matches in document order, at any depth below this element.
    pub fn descendants<'a>(&'a self, local: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_descendants(local, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, local: &str, found: &mut Vec<&'a Element>) {
        for element in self.elements() {
            if element.local_name() == local {
                found.push(element);
            }
            element.collect_descendants(local, found);
        }
    }

    /// Mutable matches in document order. A match is not searched further,
    /// so nested elements of the same name are not returned.
    pub fn find_all_mut(&mut self, local: &str) -> Vec<&mut Element> {
        let mut found = Vec::new();
        collect_mut(self, local, &mut found);
        found
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Inserts `child` after the last child element named in `after`,
    /// or first when none of them are present.
    pub fn insert_after(&mut self, child: Element, after: &[&str]) {
        let position = self
            .children
            .iter()
            .rposition(|node| match node {
                Node::Element(e) => after.contains(&e.local_name()),
                _ => false,
            })
            .map(|i| i + 1)
            .unwrap_or(0);
        self.children.insert(position, Node::Element(child));
    }

    pub fn remove_children(&mut self, local: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|node| !matches!(node, Node::Element(e) if e.local_name() == local));
        before - self.children.len()
    }

    pub fn remove_descendants(&mut self, local: &str) -> usize {
        let mut removed = self.remove_children(local);
        for node in self.children.iter_mut() {
            if let Node::Element(element) = node {
                removed += element.remove_descendants(local);
            }
        }
        removed
    }

    /// Concatenated text and CDATA content of direct children, trimmed
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            match node {
                Node::Text(t) | Node::CData(t) => text.push_str(t),
                _ => {}
            }
        }
        text.trim().to_string()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    pub fn set_cdata(&mut self, text: impl Into<String>) {
        let text = text.into();
        // A terminator inside the payload would end the section early
        self.children = if text.contains("]]>") {
            vec![Node::Text(text)]
        } else {
            vec![Node::CData(text)]
        };
    }
}

fn collect_mut<'a>(element: &'a mut Element, local: &str, found: &mut Vec<&'a mut Element>) {
    for node in element.children.iter_mut() {
        if let Node::Element(child) = node {
            if child.local_name() == local {
                found.push(child);
            } else {
                collect_mut(child, local, found);
            }
        }
    }
}

fn parse_error(position: impl Display, error: impl Display) -> TcxError {
    TcxError::Parse(format!("at byte {}: {}", position, error))
}

fn write_error(error: impl Display) -> TcxError {
    TcxError::Write(error.to_string())
}

fn open_element(start: &BytesStart) -> Result<Element> {
    let name = String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|e| TcxError::Parse(format!("element name is not UTF-8: {}", e)))?;
    let mut element = Element::new(name);

    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| TcxError::Parse(format!("bad attribute on <{}>: {}", element.name, e)))?;
        let key = String::from_utf8(attribute.key.as_ref().to_vec())
            .map_err(|e| TcxError::Parse(format!("attribute name is not UTF-8: {}", e)))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| TcxError::Parse(format!("bad attribute value for {}: {}", key, e)))?;
        element.attributes.push((key, value.into_owned()));
    }

    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(TcxError::Parse(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

/// Parses a complete document into its root element.
pub fn parse(input: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| parse_error(reader.buffer_position(), e))?;

        match event {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| TcxError::Parse("closing tag without an open element".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| parse_error(reader.buffer_position(), e))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.into_owned()));
                }
            }
            Event::CData(data) => {
                let data = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| parse_error(reader.buffer_position(), e))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::CData(data));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    let comment = String::from_utf8_lossy(&comment).into_owned();
                    parent.children.push(Node::Comment(comment));
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(TcxError::Parse(format!("unclosed element <{}>", open.name)));
    }

    root.ok_or_else(|| TcxError::Parse("document has no root element".into()))
}

/// Serializes `root` with an XML declaration and two-space indentation.
pub fn to_bytes(root: &Element) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_error)?;
    write_element(&mut writer, root)?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(write_error);
    }

    writer.write_event(Event::Start(start)).map_err(write_error)?;
    for node in &element.children {
        match node {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?,
            Node::CData(text) => writer
                .write_event(Event::CData(BytesCData::new(text.as_str())))
                .map_err(write_error)?,
            Node::Comment(text) => writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                .map_err(write_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(write_error)
}
