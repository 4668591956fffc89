use crate::models::TargetName;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Characters escaped inside a single URL path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Route prefix under which finalized artifacts are served.
pub const FILES_ROUTE: &str = "/files";

/// Externally reachable URL of a finalized artifact.
pub fn artifact_url(public_base_url: &str, name: &TargetName) -> String {
    format!(
        "{}{}/{}",
        public_base_url.trim_end_matches('/'),
        FILES_ROUTE,
        utf8_percent_encode(name.as_str(), PATH_SEGMENT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_url() {
        let name = TargetName::parse("movie.mp4").unwrap();
        assert_eq!(
            artifact_url("http://localhost:3000", &name),
            "http://localhost:3000/files/movie.mp4"
        );
        assert_eq!(
            artifact_url("http://localhost:3000/", &name),
            "http://localhost:3000/files/movie.mp4"
        );
    }

    #[test]
    fn test_artifact_url_escapes_name() {
        let name = TargetName::parse("my report #1?.pdf").unwrap();
        assert_eq!(
            artifact_url("https://cdn.example.com", &name),
            "https://cdn.example.com/files/my%20report%20%231%3F.pdf"
        );
    }
}
