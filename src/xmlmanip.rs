// XML tag injection and search helpers used to build Tangier requests and read responses
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::Writer;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

// Error types for XML handling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    BadSchema(String),

    #[error("{0}")]
    BadTag(String),

    #[error("XML write error: {0}")]
    Write(String),

    #[error("No value at path: {0}")]
    Path(String),
}

// A parsed XML element. Only what request templating and response reading need:
// attributes in document order, concatenated text, and child elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    // First direct child with the given tag name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    // Depth-first search by local name, ignoring any namespace prefix.
    pub fn descendant(&self, local_name: &str) -> Option<&Element> {
        for child in &self.children {
            if child.local_name() == local_name {
                return Some(child);
            }
            if let Some(found) = child.descendant(local_name) {
                return Some(found);
            }
        }
        None
    }

    pub fn local_name(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map_or(self.name.as_str(), |(_, local)| local)
    }

    // Insert a child at `index`, appending when the index is past the end.
    pub fn insert_child(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    pub fn parse(xml: &str) -> Result<Element, XmlError> {
        // Text is trimmed per element on close; entity references arrive as separate events.
        let mut reader = Reader::from_str(xml);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    stack.push(start_to_element(&e)?);
                }
                Ok(Event::Empty(e)) => {
                    let element = start_to_element(&e)?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or_else(|| {
                        XmlError::Parse(format!(
                            "unexpected closing tag at position {}",
                            reader.buffer_position()
                        ))
                    })?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Ok(Event::Text(e)) => {
                    if let Some(current) = stack.last_mut() {
                        let raw = std::str::from_utf8(&e)
                            .map_err(|err| XmlError::Parse(err.to_string()))?;
                        let text = unescape(raw).map_err(|err| XmlError::Parse(err.to_string()))?;
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(current) = stack.last_mut() {
                        let raw = std::str::from_utf8(&e)
                            .map_err(|err| XmlError::Parse(err.to_string()))?;
                        current.text.push_str(raw);
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    if let Some(current) = stack.last_mut() {
                        let name = std::str::from_utf8(&e)
                            .map_err(|err| XmlError::Parse(err.to_string()))?;
                        current.text.push_str(&resolve_reference(name)?);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(XmlError::Parse(format!(
                        "error at position {}: {}",
                        reader.error_position(),
                        e
                    )))
                }
                _ => (),
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Parse(format!(
                "unclosed tag <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| XmlError::Parse("document has no root element".to_string()))
    }

    // Compact serialization, as used for request payloads.
    pub fn to_xml(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.text.is_empty() && self.children.is_empty() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| XmlError::Write(e.to_string()));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| XmlError::Write(e.to_string()))?;
        if !self.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&self.text)))
                .map_err(|e| XmlError::Write(e.to_string()))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| XmlError::Write(e.to_string()))
    }
}

fn start_to_element(start: &BytesStart) -> Result<Element, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| XmlError::Parse(e.to_string()))?
        .to_string();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| XmlError::Parse(e.to_string()))?;
        let raw = std::str::from_utf8(&attr.value).map_err(|e| XmlError::Parse(e.to_string()))?;
        let value = unescape(raw).map_err(|e| XmlError::Parse(e.to_string()))?;
        element.attributes.push((key.to_string(), value.into_owned()));
    }
    Ok(element)
}

fn close_element(
    mut element: Element,
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
) -> Result<(), XmlError> {
    let trimmed = element.text.trim();
    if trimmed.len() != element.text.len() {
        element.text = trimmed.to_string();
    }
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(XmlError::Parse(format!(
                "multiple root elements, found <{}>",
                element.name
            )))
        }
    }
    Ok(())
}

fn resolve_reference(name: &str) -> Result<String, XmlError> {
    if let Some(entity) = resolve_predefined_entity(name) {
        return Ok(entity.to_string());
    }
    let code = match name.strip_prefix('#') {
        Some(hex) if hex.starts_with('x') || hex.starts_with('X') => {
            u32::from_str_radix(&hex[1..], 16).ok()
        }
        Some(dec) => dec.parse::<u32>().ok(),
        None => None,
    };
    code.and_then(char::from_u32)
        .map(|c| c.to_string())
        .ok_or_else(|| XmlError::Parse(format!("unknown entity reference &{};", name)))
}

// Indented rendering for logs and debugging output.
pub fn pretty_print(xml: &str) -> Result<String, XmlError> {
    let element = Element::parse(xml)?;
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    element.write_to(&mut writer)?;
    String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tag injection
// ---------------------------------------------------------------------------

// Value of an injected tag: plain text, or an element with attributes and either
// text or nested tags.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Element(ElementTag),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementTag {
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub inner: Option<Tags>,
}

impl ElementTag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn inner(mut self, tags: Tags) -> Self {
        self.inner = Some(tags);
        self
    }
}

impl From<ElementTag> for TagValue {
    fn from(tag: ElementTag) -> Self {
        TagValue::Element(tag)
    }
}

impl From<&str> for TagValue {
    fn from(text: &str) -> Self {
        TagValue::Text(text.to_string())
    }
}

impl From<String> for TagValue {
    fn from(text: String) -> Self {
        TagValue::Text(text)
    }
}

impl From<&String> for TagValue {
    fn from(text: &String) -> Self {
        TagValue::Text(text.clone())
    }
}

// Ordered tags to inject. A key `name__suffix` produces a `<name>` element, which is
// how repeated siblings (`provider__0`, `provider__1`) are expressed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tags(Vec<(String, TagValue)>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn extend(&mut self, other: Tags) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<TagValue>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Tags(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// Element name for a tag key: everything before the first `__`.
pub fn tag_name(key: &str) -> &str {
    key.split("__").next().unwrap_or(key)
}

#[derive(Debug, Clone, Copy)]
pub struct InjectOptions<'a> {
    // Parent tag receiving the new children; empty means the root.
    pub parent_tag: &'a str,
    pub injection_index: usize,
    // Insert even when a same-named child already exists.
    pub creative: bool,
}

impl Default for InjectOptions<'_> {
    fn default() -> Self {
        Self {
            parent_tag: "",
            injection_index: 0,
            creative: true,
        }
    }
}

/// Inject `tags` under `parent_tag` starting at `injection_index` and return the
/// serialized document.
pub fn inject_tags(
    xml: &str,
    parent_tag: &str,
    injection_index: usize,
    tags: &Tags,
) -> Result<String, XmlError> {
    inject_tags_with(
        xml,
        InjectOptions {
            parent_tag,
            injection_index,
            ..Default::default()
        },
        tags,
    )
}

pub fn inject_tags_with(
    xml: &str,
    options: InjectOptions<'_>,
    tags: &Tags,
) -> Result<String, XmlError> {
    let mut root = Element::parse(xml)?;
    inject_into(&mut root, options, tags)?;
    root.to_xml()
}

pub fn inject_into(
    root: &mut Element,
    options: InjectOptions<'_>,
    tags: &Tags,
) -> Result<(), XmlError> {
    let parent = if options.parent_tag.is_empty() {
        root
    } else {
        root.find_mut(options.parent_tag).ok_or_else(|| {
            XmlError::BadSchema(format!(
                "No <{}/> tag included in the given schema.",
                options.parent_tag
            ))
        })?
    };

    let mut index = options.injection_index;
    for (key, value) in tags.iter() {
        let name = tag_name(key);
        if !options.creative && parent.find(name).is_some() {
            continue;
        }

        let mut element = Element::new(name);
        match value {
            TagValue::Text(text) => element.text = text.clone(),
            TagValue::Element(tag) => {
                if tag.text.is_some() && tag.inner.is_some() {
                    return Err(XmlError::BadTag(
                        "Elements that contain elements may not also contain text attributes \
                         (XML formatting does not allow it.)"
                            .to_string(),
                    ));
                }
                element.attributes = tag.attributes.clone();
                element.text = tag.text.clone().unwrap_or_default();
                if let Some(inner) = &tag.inner {
                    inject_into(&mut element, InjectOptions::default(), inner)?;
                }
            }
        }
        parent.insert_child(index, element);
        index += 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

// Mapping view of an XML document: attributes are `@name` keys, text beside
// attributes or children is `#text`, repeated children collapse into a list.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlValue {
    Text(String),
    Map(Record),
    List(Vec<XmlValue>),
}

impl XmlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            XmlValue::Text(text) => Some(text),
            XmlValue::Map(record) => record.text("#text"),
            XmlValue::List(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&Record> {
        match self {
            XmlValue::Map(record) => Some(record),
            _ => None,
        }
    }

    // A single mapping or every mapping of a list, for elements that repeat.
    pub fn maps(&self) -> Vec<&Record> {
        match self {
            XmlValue::Map(record) => vec![record],
            XmlValue::List(items) => items.iter().filter_map(XmlValue::as_map).collect(),
            XmlValue::Text(_) => Vec::new(),
        }
    }

    fn from_element(element: &Element) -> XmlValue {
        if element.attributes.is_empty() && element.children.is_empty() {
            return XmlValue::Text(element.text.clone());
        }

        let mut record = Record::default();
        for (key, value) in &element.attributes {
            record.insert(format!("@{}", key), XmlValue::Text(value.clone()));
        }
        for child in &element.children {
            let value = XmlValue::from_element(child);
            match record.get_mut(&child.name) {
                Some(XmlValue::List(items)) => items.push(value),
                Some(existing) => {
                    let first = std::mem::replace(existing, XmlValue::List(Vec::new()));
                    *existing = XmlValue::List(vec![first, value]);
                }
                None => record.insert(child.name.clone(), value),
            }
        }
        if !element.text.is_empty() {
            record.insert("#text", XmlValue::Text(element.text.clone()));
        }
        XmlValue::Map(record)
    }
}

impl Serialize for XmlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            XmlValue::Text(text) => serializer.serialize_str(text),
            XmlValue::Map(record) => record.serialize(serializer),
            XmlValue::List(items) => items.serialize(serializer),
        }
    }
}

// Insertion-ordered mapping of element keys to values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entries: Vec<(String, XmlValue)>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&XmlValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut XmlValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    // Text of a key, looking through `#text` for elements with attributes.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(XmlValue::as_text)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: XmlValue) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(existing) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &XmlValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    Contains,
    NotEquals,
}

// A `key <comparison> value` test applied to text values found under `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub key: String,
    pub comparison: Comparison,
    pub value: String,
}

impl Predicate {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            comparison: Comparison::Equals,
            value: value.into(),
        }
    }

    pub fn contains(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            comparison: Comparison::Contains,
            value: value.into(),
        }
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            comparison: Comparison::NotEquals,
            value: value.into(),
        }
    }

    // Parse the `key__contains` / `key__ne` / `key__eq` / `key` forms.
    pub fn parse(expression: &str, value: impl Into<String>) -> Self {
        let (key, comparison) = match expression.rsplit_once("__") {
            Some((key, "contains")) => (key, Comparison::Contains),
            Some((key, "ne")) => (key, Comparison::NotEquals),
            Some((key, "eq")) => (key, Comparison::Equals),
            _ => (expression, Comparison::Equals),
        };
        Self {
            key: key.to_string(),
            comparison,
            value: value.into(),
        }
    }

    pub fn matches_text(&self, text: &str) -> bool {
        match self.comparison {
            Comparison::Equals => text == self.value,
            Comparison::Contains => text.contains(&self.value),
            Comparison::NotEquals => text != self.value,
        }
    }

    fn matches(&self, value: &XmlValue) -> bool {
        match value {
            XmlValue::List(items) => items
                .iter()
                .filter_map(XmlValue::as_text)
                .any(|text| self.matches_text(text)),
            other => other.as_text().is_some_and(|text| self.matches_text(text)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(index) => write!(f, "{}", index),
        }
    }
}

// A response document in mapping form, searchable by predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlSchema {
    root: Record,
}

impl XmlSchema {
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let element = Element::parse(xml)?;
        Ok(Self::from_element(&element))
    }

    pub fn from_element(element: &Element) -> Self {
        let mut root = Record::default();
        root.insert(element.name.clone(), XmlValue::from_element(element));
        Self { root }
    }

    pub fn root(&self) -> &Record {
        &self.root
    }

    // Every mapping holding `predicate.key` with a matching value, in document order.
    pub fn search(&self, predicate: &Predicate) -> Vec<Record> {
        let mut found = Vec::new();
        walk_record(&self.root, &mut Vec::new(), predicate, &mut |_, record| {
            found.push(record.clone())
        });
        found
    }

    // `__`-joined paths of every matching value.
    pub fn locate(&self, predicate: &Predicate) -> Vec<String> {
        let mut paths = Vec::new();
        walk_record(&self.root, &mut Vec::new(), predicate, &mut |path, _| {
            let mut segments: Vec<String> = path.iter().map(Segment::to_string).collect();
            segments.push(predicate.key.clone());
            paths.push(segments.join("__"));
        });
        paths
    }

    pub fn retrieve(&self, path: &str) -> Result<XmlValue, XmlError> {
        let mut segments = path.split("__");
        let first = segments
            .next()
            .ok_or_else(|| XmlError::Path(path.to_string()))?;
        let mut current = self
            .root
            .get(first)
            .ok_or_else(|| XmlError::Path(path.to_string()))?;

        for segment in segments {
            current = match current {
                XmlValue::Map(record) => record.get(segment),
                XmlValue::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                XmlValue::Text(_) => None,
            }
            .ok_or_else(|| XmlError::Path(path.to_string()))?;
        }
        Ok(current.clone())
    }
}

fn walk_record<F>(record: &Record, path: &mut Vec<Segment>, predicate: &Predicate, visit: &mut F)
where
    F: FnMut(&[Segment], &Record),
{
    if record
        .get(&predicate.key)
        .is_some_and(|value| predicate.matches(value))
    {
        visit(path, record);
    }
    for (key, value) in record.iter() {
        path.push(Segment::Key(key.to_string()));
        walk_value(value, path, predicate, visit);
        path.pop();
    }
}

fn walk_value<F>(value: &XmlValue, path: &mut Vec<Segment>, predicate: &Predicate, visit: &mut F)
where
    F: FnMut(&[Segment], &Record),
{
    match value {
        XmlValue::Map(record) => walk_record(record, path, predicate, visit),
        XmlValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(Segment::Index(index));
                walk_value(item, path, predicate, visit);
                path.pop();
            }
        }
        XmlValue::Text(_) => {}
    }
}

// Search `xml` and sort the matches by the integer value of the predicate key.
// With `show_all` false only the greatest match is kept. `None` when nothing matches.
pub fn search_schema(
    xml: &str,
    predicate: &Predicate,
    show_all: bool,
) -> Result<Option<Vec<Record>>, XmlError> {
    let schema = XmlSchema::parse(xml)?;
    let mut items = schema.search(predicate);
    if items.is_empty() {
        return Ok(None);
    }
    items.sort_by_key(|record| {
        record
            .text(&predicate.key)
            .and_then(|text| text.trim().parse::<i64>().ok())
            .unwrap_or(i64::MIN)
    });
    if !show_all {
        items = items.pop().into_iter().collect();
    }
    Ok(Some(items))
}
