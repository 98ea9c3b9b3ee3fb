/// One `NAME=value` pair of an attributed tag. The value is kept as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn decimal(&self) -> Option<u64> {
        self.value.trim().parse().ok()
    }

    pub fn floating_point(&self) -> Option<f64> {
        self.value.trim().parse().ok()
    }

    /// `0x`-prefixed hexadecimal sequence. Odd lengths are padded on the left.
    pub fn hex_sequence(&self) -> Option<Vec<u8>> {
        let value = self.value.trim();
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))?;
        if digits.is_empty() {
            return None;
        }
        if digits.len() % 2 == 1 {
            hex::decode(format!("0{digits}")).ok()
        } else {
            hex::decode(digits).ok()
        }
    }

    /// `<length>[@<offset>]`
    pub fn byte_range(&self) -> Option<(u64, Option<u64>)> {
        let value = self.quoted_string();
        match value.split_once('@') {
            Some((length, offset)) => Some((
                length.trim().parse().ok()?,
                Some(offset.trim().parse().ok()?),
            )),
            None => Some((value.trim().parse().ok()?, None)),
        }
    }

    /// `<width>x<height>`
    pub fn resolution(&self) -> Option<(u32, u32)> {
        let (width, height) = self.value.trim().split_once(['x', 'X'])?;
        Some((width.parse().ok()?, height.parse().ok()?))
    }

    /// The value with surrounding quotes removed and escapes resolved.
    pub fn quoted_string(&self) -> String {
        let value = self.value.trim();
        let inner = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        let mut result = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    result.push(escaped);
                    continue;
                }
            }
            result.push(c);
        }
        result
    }

    pub fn unescape_quotes(&self) -> Attribute {
        Attribute::new(self.name.clone(), self.quoted_string())
    }
}

/// Splits `NAME=value,NAME="quoted, value"` into attributes.
///
/// Scanning stops at the first name that is not followed by `=`.
pub fn parse_attributes(input: &str) -> Vec<Attribute> {
    let mut attributes = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ',' || c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_') {
            name.push(c.to_ascii_uppercase());
        }
        if name.is_empty() || chars.next_if_eq(&'=').is_none() {
            break;
        }

        let mut value = String::new();
        let mut quoted = false;
        while let Some(c) = chars.next_if(|c| quoted || *c != ',') {
            match c {
                '"' => quoted = !quoted,
                '\\' if quoted => {
                    value.push(c);
                    if let Some(next) = chars.next() {
                        value.push(next);
                    }
                    continue;
                }
                _ => {}
            }
            value.push(c);
        }

        attributes.push(Attribute::new(name, value.trim()));
    }

    attributes
}

/// Splits on the first comma that is not inside quotes.
pub(crate) fn split_first_unquoted(input: &str) -> (&str, Option<&str>) {
    let mut quoted = false;
    for (index, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => return (&input[..index], Some(&input[index + 1..])),
            _ => {}
        }
    }
    (input, None)
}
