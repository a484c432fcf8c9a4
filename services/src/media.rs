use mime::Mime;

/// Content of unknown type, left to the extraction engine to detect.
///
pub const BINARY: &str = "application/octet-stream";

/// HTML documents.
///
pub const HTML: &str = "text/html";

/// XHTML documents.
///
pub const XHTML: &str = "application/xhtml+xml";

/// Comma separated values.
///
pub const CSV: &str = "text/csv";

/// RDF serialized as XML.
///
pub const RDF_XML: &str = "application/rdf+xml";

/// RDF serialized as Turtle.
///
pub const TURTLE: &str = "text/turtle";

/// RDF serialized as N-Triples.
///
pub const N_TRIPLE: &str = "text/rdf+nt";

/// The registered media type of N-Triples.
///
pub const N_TRIPLE2: &str = "application/n-triples";

/// RDF serialized as N-Quads.
///
pub const N_QUADS: &str = "application/n-quads";

/// RDF serialized as Notation3.
///
pub const N3: &str = "text/rdf+n3";

/// RDF serialized as JSON-LD.
///
pub const JSON_LD: &str = "application/ld+json";

/// Character encoding of every extraction result.
///
pub const OUTPUT_ENCODING: &str = "UTF-8";

/// Media type of every extraction result.
///
pub const OUTPUT: &str = "text/turtle;charset=UTF-8";

/// Media types accepted as input.
///
pub static INPUT_FORMATS: [&str; 11] = [
    BINARY, HTML, XHTML, CSV, RDF_XML, TURTLE, N_TRIPLE, N_TRIPLE2, N_QUADS, N3, JSON_LD,
];

/// Media types produced as output.
///
pub static OUTPUT_FORMATS: [&str; 1] = [OUTPUT];

/// Returns the lowercase `type/subtype` part of `media_type`, dropping any parameters.
///
/// Returns `None` if `media_type` isn't a valid media type.
///
pub fn essence(media_type: &str) -> Option<String> {
    media_type.trim()
        .parse::<Mime>()
        .ok()
        .map(|mime| mime.essence_str().to_ascii_lowercase())
}

/// Whether content of `media_type` can be transformed.
///
/// Parameters such as `charset` are ignored.
///
pub fn is_supported_input(media_type: &str) -> bool {
    essence(media_type)
        .map(|essence| INPUT_FORMATS.contains(&essence.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_essence() {
        assert_eq!(essence("text/html; charset=ISO-8859-1"), Some("text/html".to_string()));
        assert_eq!(essence(" Text/CSV "), Some("text/csv".to_string()));
        assert_eq!(essence("not a media type"), None);
    }

    #[test]
    fn test_supported_inputs() {
        for media_type in INPUT_FORMATS {
            assert!(is_supported_input(media_type), "{} should be supported", media_type);
        }
        assert!(is_supported_input("application/xhtml+xml;charset=utf-8"));
    }

    #[test]
    fn test_unsupported_inputs() {
        assert!(!is_supported_input("application/pdf"));
        assert!(!is_supported_input("image/png"));
        assert!(!is_supported_input(""));
    }

    #[test]
    fn test_output_is_turtle() {
        assert_eq!(essence(OUTPUT), Some(TURTLE.to_string()));
    }
}
