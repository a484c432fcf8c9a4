use url::Url;

/// Derives the logical URI of an inbound document.
///
/// An absolute `content_location` is used as is, and a relative one is resolved by appending it to `request_url`.
/// Without a content location, the request id is appended to `request_url` instead, so every request gets a distinct
/// URI under the transformer's endpoint. A content location that is only a fragment refers into that per-request URI.
///
/// # Arguments
///
/// * `request_url` - The URL the request was received on.
/// * `request_id` - Identifier of the request.
/// * `content_location` - The location the request declares for its content, if any.
///
pub fn document_uri(request_url: &str, request_id: &str, content_location: Option<&str>) -> String {
    match content_location.map(str::trim).filter(|location| !location.is_empty()) {
        Some(location) if is_absolute(location) => location.to_string(),
        Some(location) if location.starts_with('#') => append(&append(request_url, request_id), location),
        Some(location) => append(request_url, location),
        None => append(request_url, request_id),
    }
}

fn is_absolute(location: &str) -> bool {
    Url::parse(location).is_ok()
}

/// Appends `reference` to `base` with exactly one separator between them, unless `reference` is a fragment.
///
fn append(base: &str, reference: &str) -> String {
    if reference.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') && reference.starts_with('/') {
        format!("{}{}", base, &reference[1..])
    } else if base.ends_with('/') || reference.starts_with('/') || reference.starts_with('#') {
        format!("{}{}", base, reference)
    } else {
        format!("{}/{}", base, reference)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_absolute_content_location_wins() {
        assert_eq!(
            document_uri("http://host/transform", "42", Some("http://example.org/doc.html")),
            "http://example.org/doc.html"
        );
        assert_eq!(document_uri("http://host/transform", "42", Some("urn:isbn:123")), "urn:isbn:123");
    }

    #[test]
    fn test_relative_content_location() {
        assert_eq!(document_uri("http://host/abc", "42", Some("doc.html")), "http://host/abc/doc.html");
        assert_eq!(document_uri("http://host/abc/", "42", Some("doc.html")), "http://host/abc/doc.html");
        assert_eq!(document_uri("http://host/abc", "42", Some("/doc.html")), "http://host/abc/doc.html");
        assert_eq!(document_uri("http://host/abc/", "42", Some("/doc.html")), "http://host/abc/doc.html");
    }

    #[test]
    fn test_fragment_content_location_refers_into_request() {
        assert_eq!(document_uri("http://host/", "abc", Some("#frag")), "http://host/abc#frag");
        assert_eq!(document_uri("http://host/transform", "42", Some("#frag")), "http://host/transform/42#frag");
        assert_eq!(document_uri("http://host/transform", "", Some("#frag")), "http://host/transform#frag");
    }

    #[test]
    fn test_request_id_appended_without_content_location() {
        assert_eq!(document_uri("http://host/abc", "42", None), "http://host/abc/42");
        assert_eq!(document_uri("http://host/abc/", "42", None), "http://host/abc/42");
        assert_eq!(document_uri("http://host/abc/", "/42", None), "http://host/abc/42");
        assert_eq!(document_uri("http://host/abc", "/42", None), "http://host/abc/42");
        assert_eq!(document_uri("http://host/abc", "#42", None), "http://host/abc#42");
    }

    #[test]
    fn test_blank_content_location_is_ignored() {
        assert_eq!(document_uri("http://host/abc", "42", Some("  ")), "http://host/abc/42");
    }

    #[test]
    fn test_empty_request_id() {
        assert_eq!(document_uri("http://host/abc", "", None), "http://host/abc");
    }
}
