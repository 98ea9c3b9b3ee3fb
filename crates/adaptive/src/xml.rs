use std::collections::HashMap;

use quick_xml::{events::Event, Reader};

use crate::error::{AdaptiveError, AdaptiveResult};

/// An element of a parsed XML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Direct children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

/// Builds a [`Node`] tree out of the event stream of a document.
pub struct DomParser;

impl DomParser {
    pub fn parse(data: &[u8]) -> AdaptiveResult<Node> {
        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Node> = Vec::new();
        let mut root = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let node = element(&e)?;
                    stack.push(node);
                }
                Event::Empty(e) => {
                    let node = element(&e)?;
                    close(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| {
                        AdaptiveError::XmlParseError("unexpected closing tag".to_string())
                    })?;
                    close(&mut stack, &mut root, node)?;
                }
                Event::Text(e) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(AdaptiveError::XmlParseError(format!(
                "document ended inside <{}>",
                stack.last().map(|n| n.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| AdaptiveError::XmlParseError("no root element".to_string()))
    }
}

fn element(e: &quick_xml::events::BytesStart) -> AdaptiveResult<Node> {
    let mut node = Node::new(String::from_utf8_lossy(e.local_name().as_ref()));
    for attribute in e.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        node.attributes.insert(key, value);
    }
    Ok(node)
}

fn close(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> AdaptiveResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(AdaptiveError::XmlParseError(
                "multiple root elements".to_string(),
            ))
        }
    }
    Ok(())
}
