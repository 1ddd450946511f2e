use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors that can occur while decoding an RSS document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("Malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The input ended with elements still open.
    #[error("Document ended inside <{0}>")]
    Truncated(String),

    /// No `<channel>` element under the document root.
    #[error("Document has no <channel> element")]
    MissingChannel,
}

/// A decoded RSS `<channel>`.
///
/// Only lives for the duration of one fetch; items are turned into posts
/// or discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub items: Vec<Item>,
}

/// A decoded RSS `<item>`. Absent elements are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Raw `<pubDate>` text; interpreted by the ingester
    pub pub_date: String,
}

/// Depth of `<channel>` below the document root element.
const CHANNEL_DEPTH: usize = 2;
const ITEM_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    Description,
    Language,
    PubDate,
}

/// Matches on the full element name, so prefixed elements such as
/// `<atom:link>` are never mistaken for their RSS namesakes.
fn channel_field(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"description" => Some(Field::Description),
        b"language" => Some(Field::Language),
        _ => None,
    }
}

fn item_field(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"description" => Some(Field::Description),
        b"pubDate" => Some(Field::PubDate),
        _ => None,
    }
}

/// Text being collected for one field element.
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

/// Store `text` unless the field already holds a non-empty value.
fn assign(slot: &mut String, text: &str) {
    let text = text.trim();
    if slot.is_empty() && !text.is_empty() {
        *slot = text.to_string();
    }
}

impl Channel {
    fn assign(&mut self, field: Field, text: &str) {
        match field {
            Field::Title => assign(&mut self.title, text),
            Field::Link => assign(&mut self.link, text),
            Field::Description => assign(&mut self.description, text),
            Field::Language => assign(&mut self.language, text),
            Field::PubDate => {}
        }
    }
}

impl Item {
    fn assign(&mut self, field: Field, text: &str) {
        match field {
            Field::Title => assign(&mut self.title, text),
            Field::Link => assign(&mut self.link, text),
            Field::Description => assign(&mut self.description, text),
            Field::PubDate => assign(&mut self.pub_date, text),
            Field::Language => {}
        }
    }
}

/// Decoder state while walking the event stream.
#[derive(Default)]
struct ChannelBuilder {
    /// Names of the currently open elements
    open: Vec<String>,
    channel: Option<Channel>,
    in_channel: bool,
    item: Option<Item>,
    capture: Option<Capture>,
}

impl ChannelBuilder {
    fn depth(&self) -> usize {
        self.open.len()
    }

    /// A field element of the current channel or item starts at `depth`.
    fn field_at(&self, name: &[u8], depth: usize) -> Option<Field> {
        if !self.in_channel || self.capture.is_some() {
            return None;
        }
        match &self.item {
            Some(_) if depth == ITEM_DEPTH + 1 => item_field(name),
            None if depth == CHANNEL_DEPTH + 1 => channel_field(name),
            _ => None,
        }
    }

    fn start(&mut self, name: &[u8]) {
        self.open.push(String::from_utf8_lossy(name).into_owned());

        if let Some(field) = self.field_at(name, self.depth()) {
            self.capture = Some(Capture {
                field,
                depth: self.depth(),
                text: String::new(),
            });
        } else if self.depth() == CHANNEL_DEPTH && name == b"channel" && self.channel.is_none() {
            self.channel = Some(Channel::default());
            self.in_channel = true;
        } else if self.in_channel && self.depth() == ITEM_DEPTH && name == b"item" {
            self.item = Some(Item::default());
        }
    }

    /// A self-closing element contributes no text; only `<item/>` and
    /// `<channel/>` matter.
    fn empty(&mut self, name: &[u8]) {
        let depth = self.depth() + 1;
        if depth == CHANNEL_DEPTH && name == b"channel" && self.channel.is_none() {
            self.channel = Some(Channel::default());
        } else if self.in_channel && self.capture.is_none() && depth == ITEM_DEPTH && name == b"item"
        {
            if let Some(channel) = self.channel.as_mut() {
                channel.items.push(Item::default());
            }
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn end(&mut self) {
        if self
            .capture
            .as_ref()
            .is_some_and(|capture| capture.depth == self.depth())
        {
            if let Some(capture) = self.capture.take() {
                match (self.item.as_mut(), self.channel.as_mut()) {
                    (Some(item), _) => item.assign(capture.field, &capture.text),
                    (None, Some(channel)) => channel.assign(capture.field, &capture.text),
                    (None, None) => {}
                }
            }
        } else if self.in_channel && self.depth() == ITEM_DEPTH && self.capture.is_none() {
            if let (Some(item), Some(channel)) = (self.item.take(), self.channel.as_mut()) {
                channel.items.push(item);
            }
        } else if self.in_channel && self.depth() == CHANNEL_DEPTH {
            self.in_channel = false;
        }

        self.open.pop();
    }
}

/// Decode an RSS 2.0 document.
///
/// Only `<channel>` (a child of the root element) and its `<item>` children
/// are read. Unknown and prefixed elements are skipped, as is markup nested
/// inside a field, whose text is kept. Missing fields become empty strings
/// and the first non-empty occurrence of a field wins. Nothing is validated
/// beyond the document structure: items without a link or with an
/// unparsable date are returned as-is, in document order.
pub fn parse_feed(bytes: &[u8]) -> Result<Channel, ParseError> {
    // SEC-002: quick-xml resolves only the predefined XML entities; any
    // custom entity reference fails to unescape.
    let mut reader = Reader::from_reader(bytes);
    let mut builder = ChannelBuilder::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => builder.start(e.name().as_ref()),
            Event::Empty(e) => builder.empty(e.name().as_ref()),
            Event::End(_) => builder.end(),
            Event::Text(e) if builder.capture.is_some() => builder.text(&e.unescape()?),
            Event::CData(e) if builder.capture.is_some() => {
                builder.text(&e.decode().map_err(quick_xml::Error::from)?)
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = builder.open.pop() {
        return Err(ParseError::Truncated(open));
    }
    builder.channel.ok_or(ParseError::MissingChannel)
}
