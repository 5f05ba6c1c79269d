use encoding_rs::Encoding;

/// Extracts the charset parameter from a Content-Type value.
///
/// Only labels that `encoding_rs` recognises are trusted; anything else is
/// treated as unspecified.
pub fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches(|c| c == '"' || c == '\'');
        Encoding::for_label(label.as_bytes())
    })
}

/// Decodes a body to text. Without a known encoding the bytes are read as
/// UTF-8, replacing invalid sequences.
pub fn decode_body(body: &[u8], encoding: Option<&'static Encoding>) -> String {
    match encoding {
        Some(encoding) => encoding.decode(body).0.into_owned(),
        None => String::from_utf8_lossy(body).into_owned(),
    }
}
