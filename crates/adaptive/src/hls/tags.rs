use super::attribute::{parse_attributes, split_first_unquoted, Attribute};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    ExtInf,
    ByteRange,
    Discontinuity,
    DiscontinuitySequence,
    EndList,
    IFramesOnly,
    IndependentSegments,
    Key,
    Map,
    Media,
    MediaSequence,
    PlaylistType,
    ProgramDateTime,
    SessionKey,
    Start,
    StreamInf,
    IFrameStreamInf,
    TargetDuration,
    Version,
    /// A bare URI line.
    Uri,
}

enum Shape {
    Simple,
    SingleValue,
    Attributes,
    ValuesList,
}

impl TagKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "EXTINF" => Self::ExtInf,
            "EXT-X-BYTERANGE" => Self::ByteRange,
            "EXT-X-DISCONTINUITY" => Self::Discontinuity,
            "EXT-X-DISCONTINUITY-SEQUENCE" => Self::DiscontinuitySequence,
            "EXT-X-ENDLIST" => Self::EndList,
            "EXT-X-I-FRAMES-ONLY" => Self::IFramesOnly,
            "EXT-X-INDEPENDENT-SEGMENTS" => Self::IndependentSegments,
            "EXT-X-KEY" => Self::Key,
            "EXT-X-MAP" => Self::Map,
            "EXT-X-MEDIA" => Self::Media,
            "EXT-X-MEDIA-SEQUENCE" => Self::MediaSequence,
            "EXT-X-PLAYLIST-TYPE" => Self::PlaylistType,
            "EXT-X-PROGRAM-DATE-TIME" => Self::ProgramDateTime,
            "EXT-X-SESSION-KEY" => Self::SessionKey,
            "EXT-X-START" => Self::Start,
            "EXT-X-STREAM-INF" => Self::StreamInf,
            "EXT-X-I-FRAME-STREAM-INF" => Self::IFrameStreamInf,
            "EXT-X-TARGETDURATION" => Self::TargetDuration,
            "EXT-X-VERSION" => Self::Version,
            _ => return None,
        })
    }

    fn shape(&self) -> Shape {
        match self {
            Self::Discontinuity | Self::EndList | Self::IFramesOnly | Self::IndependentSegments => {
                Shape::Simple
            }
            Self::ByteRange
            | Self::DiscontinuitySequence
            | Self::MediaSequence
            | Self::PlaylistType
            | Self::ProgramDateTime
            | Self::TargetDuration
            | Self::Version
            | Self::Uri => Shape::SingleValue,
            Self::Key
            | Self::Map
            | Self::Media
            | Self::SessionKey
            | Self::Start
            | Self::StreamInf
            | Self::IFrameStreamInf => Shape::Attributes,
            Self::ExtInf => Shape::ValuesList,
        }
    }

    /// Tags announcing a variant stream.
    pub fn is_stream_declaration(&self) -> bool {
        matches!(self, Self::StreamInf)
    }
}

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Simple(TagKind),
    SingleValue {
        kind: TagKind,
        value: Attribute,
    },
    Attributes {
        kind: TagKind,
        attributes: Vec<Attribute>,
    },
    /// `EXTINF:<duration>,<title>`, exposed as `DURATION` and `TITLE` attributes.
    ValuesList {
        kind: TagKind,
        attributes: Vec<Attribute>,
    },
}

impl Tag {
    /// Parses one line. Blank lines, comments and unknown tags yield `None`.
    pub fn parse_line(line: &str) -> Option<Tag> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('#') {
            return Some(Tag::uri(line));
        }
        if !line.starts_with("#EXT") {
            return None;
        }

        let (name, value) = match line[1..].split_once(':') {
            Some((name, value)) => (name, value.trim()),
            None => (&line[1..], ""),
        };
        let kind = TagKind::from_name(name)?;

        match kind.shape() {
            Shape::Simple => Some(Tag::Simple(kind)),
            Shape::SingleValue => Some(Tag::SingleValue {
                kind,
                value: Attribute::new("", value),
            }),
            Shape::Attributes => {
                let attributes = parse_attributes(value);
                if attributes.is_empty() {
                    log::warn!("Dropped malformed tag: {line}");
                    return None;
                }
                Some(Tag::Attributes { kind, attributes })
            }
            Shape::ValuesList => {
                let (duration, title) = split_first_unquoted(value);
                let mut attributes = vec![Attribute::new("DURATION", duration.trim())];
                if let Some(title) = title {
                    attributes.push(Attribute::new("TITLE", title.trim()));
                }
                Some(Tag::ValuesList { kind, attributes })
            }
        }
    }

    pub fn uri<S: Into<String>>(uri: S) -> Tag {
        Tag::SingleValue {
            kind: TagKind::Uri,
            value: Attribute::new("", uri),
        }
    }

    pub fn kind(&self) -> TagKind {
        match self {
            Tag::Simple(kind) => *kind,
            Tag::SingleValue { kind, .. }
            | Tag::Attributes { kind, .. }
            | Tag::ValuesList { kind, .. } => *kind,
        }
    }

    pub fn value(&self) -> Option<&Attribute> {
        match self {
            Tag::SingleValue { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        match self {
            Tag::Attributes { attributes, .. } | Tag::ValuesList { attributes, .. } => {
                attributes.iter().find(|a| a.name == name)
            }
            _ => None,
        }
    }

    /// Quoted-string value of an attribute.
    pub fn string(&self, name: &str) -> Option<String> {
        self.attribute(name).map(|a| a.quoted_string())
    }

    pub(crate) fn push_attribute(&mut self, attribute: Attribute) {
        if let Tag::Attributes { attributes, .. } | Tag::ValuesList { attributes, .. } = self {
            attributes.push(attribute);
        }
    }
}
