use url::{ParseError, Url};

use crate::{AdaptiveError, AdaptiveResult, ByteRange};

/// Resolves a `BaseURL`, `@media` or `@sourceURL` value against its parent.
///
/// A relative value inherits the parent query when it has none of its own, so signed
/// manifest URLs keep working for the segments they list.
pub(crate) fn resolve_url(parent: &Url, value: &str) -> AdaptiveResult<Url> {
    match Url::parse(value) {
        Ok(absolute) => return Ok(absolute),
        Err(ParseError::RelativeUrlWithoutBase) => {}
        Err(e) => return Err(e.into()),
    }

    let mut resolved = parent.join(value)?;
    if resolved.query().is_none() {
        resolved.set_query(parent.query());
    }
    Ok(resolved)
}

/// Parses `first-last` or `first-` (RFC 7233 byte-range-spec) as used by `@mediaRange`
/// and `Initialization@range`. `last` is inclusive.
pub(crate) fn parse_byte_range_spec(value: &str) -> AdaptiveResult<ByteRange> {
    let invalid = || AdaptiveError::MpdParsing(format!("Invalid byte range {value:?}"));

    let (first, last) = value.split_once('-').ok_or_else(invalid)?;
    let first: u64 = first.trim().parse().map_err(|_| invalid())?;
    let last = match last.trim() {
        "" => None,
        last => Some(last.parse::<u64>().map_err(|_| invalid())?),
    };

    let length = match last {
        Some(last) if last < first => return Err(invalid()),
        Some(last) => Some((last - first).saturating_add(1)),
        None => None,
    };
    Ok(ByteRange::new(first, length))
}
