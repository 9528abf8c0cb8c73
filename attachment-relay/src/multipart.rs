//! Hand-rolled `multipart/form-data` framing for GraphQL file uploads.
//!
//! The target service accepts two conventions on its upload endpoints, so the
//! body is built byte by byte from an ordered list of [`Part`]s instead of
//! going through a generic form encoder. [`encode`] is the only routine that
//! writes framing bytes; both [`MultipartLayout`]s go through it.
//!
//! Wire shape, with `B` the boundary:
//!
//! ```text
//! --B\r\n
//! Content-Disposition: form-data; name="query"\r\n
//! \r\n
//! <content>\r\n
//! --B\r\n
//! ...
//! --B--\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use serde::Deserialize;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

const CRLF: &[u8] = b"\r\n";
const BOUNDARY_PREFIX: &str = "----RelayFormBoundary";
const BOUNDARY_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BOUNDARY_SUFFIX_LEN: usize = 24;

#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Text {
        name: String,
        value: String,
    },
    Binary {
        name: String,
        file_name: String,
        content_type: String,
        data: Bytes,
    },
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Part::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn pdf(name: impl Into<String>, file_name: impl Into<String>, data: Bytes) -> Self {
        Part::Binary {
            name: name.into(),
            file_name: file_name.into(),
            content_type: PDF_CONTENT_TYPE.to_string(),
            data,
        }
    }

    fn contains(&self, needle: &[u8]) -> bool {
        match self {
            Part::Text { name, value } => {
                contains(name.as_bytes(), needle) || contains(value.as_bytes(), needle)
            }
            Part::Binary {
                name,
                file_name,
                content_type,
                data,
            } => {
                contains(name.as_bytes(), needle)
                    || contains(file_name.as_bytes(), needle)
                    || contains(content_type.as_bytes(), needle)
                    || contains(data, needle)
            }
        }
    }

    fn content_len(&self) -> usize {
        match self {
            Part::Text { value, .. } => value.len(),
            Part::Binary { data, .. } => data.len(),
        }
    }
}

/// An encoded body together with the boundary it was framed with.
///
/// The `Content-Type` header is only ever derived from this value, so the
/// header and the framing cannot disagree.
#[derive(Clone, Debug)]
pub struct MultipartBody {
    boundary: String,
    body: Bytes,
}

impl MultipartBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

/// The two multipart conventions accepted by the target service.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MultipartLayout {
    /// GraphQL multipart request spec: `operations`, `map`, `0`.
    Standard,
    /// The service's own convention: `query`, `map`, `image`.
    #[default]
    Vendor,
}

impl MultipartLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultipartLayout::Standard => "standard",
            MultipartLayout::Vendor => "vendor",
        }
    }

    /// Ordered parts carrying `mutation` and the file for this layout.
    ///
    /// `mutation` must declare a `$file: File!` variable.
    pub fn parts(&self, mutation: &str, file_name: &str, payload: Bytes) -> Vec<Part> {
        match self {
            MultipartLayout::Standard => {
                let operations = serde_json::json!({
                    "query": mutation,
                    "variables": { "file": null },
                });
                vec![
                    Part::text("operations", operations.to_string()),
                    Part::text("map", r#"{"0":["variables.file"]}"#),
                    Part::pdf("0", file_name, payload),
                ]
            }
            MultipartLayout::Vendor => vec![
                Part::text("query", mutation),
                Part::text("map", r#"{"image":"variables.file"}"#),
                Part::pdf("image", file_name, payload),
            ],
        }
    }

    pub fn encode(&self, mutation: &str, file_name: &str, payload: Bytes) -> MultipartBody {
        encode_parts(self.parts(mutation, file_name, payload))
    }
}

/// Frames `parts` with a fresh boundary that occurs in none of them.
pub fn encode_parts(parts: Vec<Part>) -> MultipartBody {
    let boundary = choose_boundary(&parts, generate_boundary);
    let body = encode(&parts, &boundary);
    MultipartBody { boundary, body }
}

/// Writes `parts` framed by `boundary`. Pure; the caller guarantees the
/// boundary does not occur inside any part.
pub fn encode(parts: &[Part], boundary: &str) -> Bytes {
    let capacity = parts
        .iter()
        .map(|p| p.content_len() + boundary.len() + 128)
        .sum::<usize>()
        + boundary.len()
        + 8;
    let mut buf = BytesMut::with_capacity(capacity);

    for part in parts {
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(CRLF);

        match part {
            Part::Text { name, value } => {
                buf.put_slice(format!("Content-Disposition: form-data; name=\"{name}\"").as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(CRLF);
                buf.put_slice(value.as_bytes());
            }
            Part::Binary {
                name,
                file_name,
                content_type,
                data,
            } => {
                buf.put_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\""
                    )
                    .as_bytes(),
                );
                buf.put_slice(CRLF);
                buf.put_slice(format!("Content-Type: {content_type}").as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(CRLF);
                buf.put_slice(data);
            }
        }
        buf.put_slice(CRLF);
    }

    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"--");
    buf.put_slice(CRLF);

    buf.freeze()
}

fn generate_boundary() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..BOUNDARY_SUFFIX_LEN)
        .map(|_| BOUNDARY_ALPHABET[rng.gen_range(0..BOUNDARY_ALPHABET.len())] as char)
        .collect();
    format!("{BOUNDARY_PREFIX}{suffix}")
}

fn choose_boundary(parts: &[Part], mut generate: impl FnMut() -> String) -> String {
    loop {
        let candidate = generate();
        if !parts.iter().any(|p| p.contains(candidate.as_bytes())) {
            return candidate;
        }
        tracing::debug!("multipart boundary collided with part content, regenerating");
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    pub(crate) struct ParsedPart {
        pub headers: Vec<(String, String)>,
        pub content: Vec<u8>,
    }

    impl ParsedPart {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Minimal strict multipart reader, enough to check framing.
    pub(crate) fn parse(body: &[u8], boundary: &str) -> Vec<ParsedPart> {
        let opening = format!("--{boundary}\r\n");
        let delimiter = format!("\r\n--{boundary}");
        assert!(body.starts_with(opening.as_bytes()), "body must open with the boundary");

        let mut rest = &body[opening.len()..];
        let mut parts = Vec::new();
        loop {
            let end = find(rest, delimiter.as_bytes()).expect("part delimiter");
            let raw = &rest[..end];
            let header_end = find(raw, b"\r\n\r\n").expect("blank line after headers");
            let headers = std::str::from_utf8(&raw[..header_end])
                .expect("utf-8 headers")
                .split("\r\n")
                .map(|line| {
                    let (k, v) = line.split_once(": ").expect("header line");
                    (k.to_string(), v.to_string())
                })
                .collect();
            parts.push(ParsedPart {
                headers,
                content: raw[header_end + 4..].to_vec(),
            });

            rest = &rest[end + delimiter.len()..];
            if rest == b"--\r\n" {
                break;
            }
            assert!(rest.starts_with(CRLF), "delimiter must be followed by CRLF");
            rest = &rest[2..];
        }
        parts
    }

    fn awkward_payload() -> Bytes {
        let mut data: Vec<u8> = (0..=255u8).collect();
        data.extend_from_slice(b"\r\n--\r\n\r\n%PDF-1.7\r\n--not-a-boundary--\r\n");
        Bytes::from(data)
    }

    const MUTATION: &str = r#"mutation ($file: File!) { add_file_to_column (item_id: 555, column_id: "file_col_9", file: $file) { id } }"#;

    #[test]
    fn test_exact_framing() {
        let parts = vec![
            Part::text("query", "q"),
            Part::pdf("image", "a.pdf", Bytes::from_static(b"%PDF")),
        ];
        let body = encode(&parts, "XYZ");
        let expected = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"query\"\r\n\
\r\n\
q\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"image\"; filename=\"a.pdf\"\r\n\
Content-Type: application/pdf\r\n\
\r\n\
%PDF\r\n\
--XYZ--\r\n";
        assert_eq!(body.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_vendor_layout_round_trip() {
        let payload = awkward_payload();
        let encoded = MultipartLayout::Vendor.encode(MUTATION, "estimate.pdf", payload.clone());
        let parts = parse(encoded.body(), encoded.boundary());

        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0].header("Content-Disposition"),
            Some(r#"form-data; name="query""#)
        );
        assert_eq!(parts[0].content, MUTATION.as_bytes());
        assert_eq!(
            parts[1].header("Content-Disposition"),
            Some(r#"form-data; name="map""#)
        );
        assert_eq!(parts[1].content, br#"{"image":"variables.file"}"#);
        assert_eq!(
            parts[2].header("Content-Disposition"),
            Some(r#"form-data; name="image"; filename="estimate.pdf""#)
        );
        assert_eq!(parts[2].header("Content-Type"), Some("application/pdf"));
        assert_eq!(parts[2].content, payload.as_ref());
    }

    #[test]
    fn test_standard_layout_round_trip() {
        let payload = awkward_payload();
        let encoded = MultipartLayout::Standard.encode(MUTATION, "a.pdf", payload.clone());
        let parts = parse(encoded.body(), encoded.boundary());

        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0].header("Content-Disposition"),
            Some(r#"form-data; name="operations""#)
        );
        let operations: serde_json::Value = serde_json::from_slice(&parts[0].content).unwrap();
        assert_eq!(operations["query"], MUTATION);
        assert!(operations["variables"]["file"].is_null());

        let map: serde_json::Value = serde_json::from_slice(&parts[1].content).unwrap();
        assert_eq!(map, serde_json::json!({"0": ["variables.file"]}));

        assert_eq!(
            parts[2].header("Content-Disposition"),
            Some(r#"form-data; name="0"; filename="a.pdf""#)
        );
        assert_eq!(parts[2].header("Content-Type"), Some("application/pdf"));
        assert_eq!(parts[2].content, payload.as_ref());
    }

    #[test]
    fn test_content_type_matches_boundary() {
        let encoded = MultipartLayout::Vendor.encode(MUTATION, "a.pdf", Bytes::from_static(b"x"));
        assert_eq!(
            encoded.content_type(),
            format!("multipart/form-data; boundary={}", encoded.boundary())
        );
        assert_eq!(encoded.content_length(), encoded.body().len());
        assert!(encoded.body().ends_with(format!("--{}--\r\n", encoded.boundary()).as_bytes()));
    }

    #[test]
    fn test_boundaries_are_unique_per_body() {
        let a = MultipartLayout::Vendor.encode(MUTATION, "a.pdf", Bytes::from_static(b"x"));
        let b = MultipartLayout::Vendor.encode(MUTATION, "a.pdf", Bytes::from_static(b"x"));
        assert_ne!(a.boundary(), b.boundary());
        assert!(a.boundary().starts_with(BOUNDARY_PREFIX));
    }

    #[test]
    fn test_colliding_boundary_is_regenerated() {
        let parts = vec![Part::pdf("image", "a.pdf", Bytes::from_static(b"..--taken--.."))];
        let mut candidates = vec!["second".to_string(), "--taken".to_string()];
        let chosen = choose_boundary(&parts, || candidates.pop().unwrap());
        assert_eq!(chosen, "second");
    }
}
