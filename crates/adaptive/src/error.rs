use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdaptiveError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Missing #EXTM3U signature")]
    InvalidSignature,

    #[error("Invalid m3u8 file: {0}")]
    M3u8ParseError(String),

    #[error("Invalid mpd file: {0}")]
    MpdParsing(String),

    #[error("Malformed xml document: {0}")]
    XmlParseError(String),

    #[error("Unsupported manifest: {0}")]
    UnsupportedManifest(String),

    #[error("No usable representation found")]
    NoRepresentation,

    #[error("All representations of adaptation set {0} failed")]
    AllRepresentationsFailed(String),

    #[error("Invalid AES-128 key: {0:?}")]
    InvalidAes128Key(Vec<u8>),

    #[error("Unsupported encryption method: {0}")]
    UnsupportedEncryption(String),

    #[error("Stream is not seekable")]
    NotSeekable,

    #[error("Stream can not be paused")]
    NotPausable,

    #[error("Length of the stream is unknown")]
    UnknownLength,

    #[error("Unknown stream: {0}")]
    UnknownStream(usize),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Pkcs7 unpad error")]
    UnpadError(#[from] UnpadError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttrError(#[from] quick_xml::events::attributes::AttrError),

    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
}

pub type AdaptiveResult<T> = Result<T, AdaptiveError>;
