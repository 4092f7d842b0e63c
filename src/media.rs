//! Content-type classification for the image-serving path.
//!
//! Listing and streaming both consult this one whitelist check, so the
//! "is this displayable" decision cannot drift between the two.

/// Return true if `content_type` is in the configured whitelist.
///
/// Comparison is case-insensitive and ignores MIME parameters, so
/// `image/PNG; charset=binary` matches a whitelist entry of `image/png`.
pub fn is_displayable_image(content_type: &str, whitelist: &[String]) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    whitelist
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(essence))
}
