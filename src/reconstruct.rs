//! Rebuilds a target URL from catch-all route segments.
//!
//! Each segment is percent-decoded on its own and the decoded segments are
//! joined with `/`. Decoding the joined string instead would turn an encoded
//! `%2F` inside a segment into a new path boundary, so the order matters.
//!
//! ```rust
//! use pagechat::reconstruct::reconstruct_url;
//!
//! let segments = ["https%3A%2F%2Fexample.com", "wiki", "Tom_Harley"];
//! let url = reconstruct_url(Some(&segments[..])).unwrap();
//! assert_eq!(url.as_str(), "https://example.com/wiki/Tom_Harley");
//! ```

use percent_encoding::percent_decode_str;

use crate::error::IndexError;
use crate::models::CanonicalUrl;

/// Decode each segment independently and join with `/`.
///
/// `None` stands for a routing state where no segments were captured at
/// all; it fails with [`IndexError::InvalidUrlPath`] rather than producing
/// an empty URL. So does an empty list.
pub fn reconstruct_url<S: AsRef<str>>(segments: Option<&[S]>) -> Result<CanonicalUrl, IndexError> {
    let segments = segments
        .ok_or_else(|| IndexError::InvalidUrlPath("no url segments captured".to_string()))?;
    if segments.is_empty() {
        return Err(IndexError::InvalidUrlPath(
            "url path must not be empty".to_string(),
        ));
    }

    let decoded = segments
        .iter()
        .map(|s| decode_segment(s.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CanonicalUrl::new(decoded.join("/")))
}

/// Split a raw, still-encoded request path into route segments.
///
/// The leading `/` is dropped; interior empty segments (`a//b`) are kept so
/// that joining them back reproduces the path exactly.
pub fn split_route_path(raw_path: &str) -> Vec<&str> {
    let trimmed = raw_path.strip_prefix('/').unwrap_or(raw_path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

/// Percent-decode one segment. Rejects `%` escapes that are not followed by
/// two hex digits and byte sequences that are not UTF-8.
fn decode_segment(segment: &str) -> Result<String, IndexError> {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while let Some(pos) = bytes[i..].iter().position(|b| *b == b'%') {
        let at = i + pos;
        let valid = bytes
            .get(at + 1..at + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(IndexError::InvalidUrlPath(format!(
                "malformed percent-encoding in segment '{}'",
                segment
            )));
        }
        i = at + 3;
    }

    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| {
            IndexError::InvalidUrlPath(format!("segment '{}' is not valid UTF-8", segment))
        })
}
