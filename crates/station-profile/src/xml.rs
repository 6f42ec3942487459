//! Minimal element tree over quick-xml. Attributes are not used by the
//! profile format and are dropped.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into(), children: Vec::new() }
    }

    pub fn push(&mut self, child: Element) -> &mut Element {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn leaf(&mut self, name: impl Into<String>, text: impl ToString) {
        self.children.push(Element::with_text(name, text.to_string()));
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// Parsed text of a child element; missing or malformed reads as `None`.
    pub fn value<T: FromStr>(&self, name: &str) -> Option<T> {
        self.text_of(name)?.parse().ok()
    }
}

pub fn parse(doc: &str) -> Result<Element> {
    let mut reader = Reader::from_str(doc);
    reader.trim_text(true);
    let mut stack: Vec<Element> = Vec::new();

    loop {
        let pos = reader.buffer_position();
        match reader.read_event().with_context(|| format!("xml error near byte {pos}"))? {
            Event::Start(e) => stack.push(Element::new(String::from_utf8_lossy(e.name().as_ref()))),
            Event::Empty(e) => {
                let el = Element::new(String::from_utf8_lossy(e.name().as_ref()));
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None => return Ok(el),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(_) => {
                let done = stack.pop().context("unbalanced end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => return Ok(done),
                }
            }
            Event::Eof => bail!("document has no root element"),
            _ => {}
        }
    }
}

fn write_element(w: &mut Writer<Vec<u8>>, el: &Element) -> Result<()> {
    if el.children.is_empty() && el.text.is_empty() {
        w.write_event(Event::Empty(BytesStart::new(el.name.as_str())))?;
        return Ok(());
    }
    w.write_event(Event::Start(BytesStart::new(el.name.as_str())))?;
    if !el.text.is_empty() {
        w.write_event(Event::Text(BytesText::new(&el.text)))?;
    }
    for c in &el.children {
        write_element(w, c)?;
    }
    w.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
    Ok(())
}

pub fn render(root: &Element) -> Result<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    write_element(&mut w, root)?;
    let mut out = String::from_utf8(w.into_inner())?;
    out.push('\n');
    Ok(out)
}
