/// Clipboard data format
///
/// Supplied by the caller on every operation; determines the MIME type
/// (Wayland) or target atom (X11) used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// UTF-8 text (`text/plain;charset=utf-8`, X11 `UTF8_STRING`)
    Text,
    /// PNG-encoded image data (`image/png`)
    Image,
}

/// Legacy plain-text names offered alongside the canonical text MIME type
/// for interoperability with older clients (ICCCM targets and pre-MIME
/// Wayland apps).
pub(crate) const TEXT_ALIASES: &[&str] = &["text/plain", "TEXT", "STRING", "UTF8_STRING"];

impl Format {
    /// Canonical MIME type announced for this format
    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Text => "text/plain;charset=utf-8",
            Format::Image => "image/png",
        }
    }

    /// X11 target atom name requested/served for this format
    ///
    /// X11 convention uses the `UTF8_STRING` target for text rather than a
    /// MIME string; images go by their MIME name.
    pub(crate) fn x11_target(self) -> &'static str {
        match self {
            Format::Text => "UTF8_STRING",
            Format::Image => "image/png",
        }
    }

    /// MIME names this format can be read from, in preference order
    pub(crate) fn accepted_mime_types(self) -> &'static [&'static str] {
        match self {
            Format::Text => &[
                "text/plain;charset=utf-8",
                "UTF8_STRING",
                "text/plain",
                "STRING",
                "TEXT",
            ],
            Format::Image => &["image/png"],
        }
    }
}

/// Pick the best MIME type to request for `format` out of the types a
/// clipboard owner announced, or `None` if it offers nothing usable.
pub(crate) fn select_mime<'a>(format: Format, announced: &'a [String]) -> Option<&'a str> {
    for wanted in format.accepted_mime_types() {
        if let Some(found) = announced.iter().find(|m| m.as_str() == *wanted) {
            return Some(found.as_str());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_types() {
        assert_eq!(Format::Text.mime_type(), "text/plain;charset=utf-8");
        assert_eq!(Format::Image.mime_type(), "image/png");
        assert_eq!(Format::Text.x11_target(), "UTF8_STRING");
        assert_eq!(Format::Image.x11_target(), "image/png");
    }

    #[test]
    fn test_select_mime_prefers_canonical() {
        let announced = vec![
            "text/plain".to_string(),
            "text/plain;charset=utf-8".to_string(),
            "TEXT".to_string(),
        ];
        assert_eq!(
            select_mime(Format::Text, &announced),
            Some("text/plain;charset=utf-8")
        );
    }

    #[test]
    fn test_select_mime_falls_back_to_aliases() {
        let announced = vec!["STRING".to_string(), "application/x-foo".to_string()];
        assert_eq!(select_mime(Format::Text, &announced), Some("STRING"));
    }

    #[test]
    fn test_select_mime_rejects_wrong_format() {
        // A text-only owner must not satisfy an image read, and vice versa
        let text_only = vec!["text/plain;charset=utf-8".to_string()];
        assert_eq!(select_mime(Format::Image, &text_only), None);

        let image_only = vec!["image/png".to_string()];
        assert_eq!(select_mime(Format::Text, &image_only), None);
    }
}
