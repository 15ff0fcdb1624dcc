//! SSML documents for the cloud voice service.

/// Locale of a cloud voice short name: `"fr-FR-DeniseNeural"` → `"fr-FR"`.
pub fn voice_locale(voice: &str) -> &str {
    let mut dashes = voice.match_indices('-').map(|(i, _)| i);
    match (dashes.next(), dashes.next()) {
        (Some(_), Some(second)) => &voice[..second],
        _ => "en-US",
    }
}

/// Escape text for use inside an XML element or attribute.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // not allowed in XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

/// Speak `text` with `voice` at neutral prosody.
///
/// Rate and volume stay at their defaults; tone and mood are applied to the
/// returned audio afterwards.
pub fn build_ssml(text: &str, voice: &str) -> String {
    let locale = voice_locale(voice);
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{locale}'>\
         <voice name='{voice}'><prosody rate='+0%' volume='+0%'>{text}</prosody></voice></speak>",
        locale = escape_xml(locale),
        voice = escape_xml(voice),
        text = escape_xml(text),
    )
}
