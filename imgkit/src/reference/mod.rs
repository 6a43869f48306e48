//! Image references in the Docker `[domain/]name[:tag][@digest]` form

mod digest_set;
mod image_reference;
mod name;
mod tag;

pub use digest_set::DigestSet;
pub use image_reference::{ImageReference, DEFAULT_DOMAIN};
pub use name::Name;
pub use tag::Tag;

use regex::Regex;

lazy_static::lazy_static! {
    static ref SHORT_IDENTIFIER_RE: Regex = Regex::new(r"^(?:sha256:)?[a-f0-9]{6,64}$").unwrap();
}

/// `true` for strings which can be an image ID prefix, e.g. `2cf24dba5fb0` or `sha256:2cf24d`
pub fn is_short_identifier(input: &str) -> bool {
    SHORT_IDENTIFIER_RE.is_match(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_identifier() {
        assert!(is_short_identifier("2cf24dba5fb0"));
        assert!(is_short_identifier("sha256:2cf24d"));
        assert!(!is_short_identifier("2cf24"));
        assert!(!is_short_identifier("ubuntu"));
        assert!(!is_short_identifier("sha512:2cf24dba5fb0"));
    }
}
