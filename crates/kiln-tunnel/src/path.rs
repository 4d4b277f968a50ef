//! The tunnel's path scheme, header names, and content-type constants
//!, shared verbatim between `kiln-exposure`'s router and
//! `kiln-client`'s request builder so the two sides can't drift apart.

use kiln_core::Id;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// The exposure server's path prefix when none is configured.
pub const DEFAULT_BASE_PATH: &str = "/__runner";

/// The default bearer-token header name.
pub const DEFAULT_AUTH_HEADER: &str = "x-runner-token";

/// The header carrying the serialized `{ asyncContextId -> value }` map.
pub const CONTEXT_HEADER: &str = "x-runner-context";

/// The multipart part name carrying the serialized input manifest.
pub const MANIFEST_PART_NAME: &str = "__manifest";

/// Characters a path segment must escape beyond the ASCII control set —
/// deliberately conservative (anything not alphanumeric or one of a small
/// safe punctuation set) since task/event ids are author-chosen strings,
/// not already-validated URL components.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encodes a single path segment (an id), matching `encodeURIComponent`
/// closely enough for the ids this runtime deals with (dotted identifiers).
#[must_use]
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// The task route for `id` under `base_path`.
#[must_use]
pub fn task_path(base_path: &str, id: &Id) -> String {
    format!("{base_path}/task/{}", encode_segment(id.as_str()))
}

/// The event route for `id` under `base_path`.
#[must_use]
pub fn event_path(base_path: &str, id: &Id) -> String {
    format!("{base_path}/event/{}", encode_segment(id.as_str()))
}

/// Parses `{basePath}/task/{id}` or `{basePath}/event/{id}` back into a
/// `(RouteKind, decoded id)` pair, returning `None` for anything outside
/// that shape (the exposure router's 404-vs-403 split needs this distinction
/// before it knows whether the id exists at all).
#[must_use]
pub fn parse_route(base_path: &str, path: &str) -> Option<(RouteKind, String)> {
    let rest = path.strip_prefix(base_path)?;
    let rest = rest.strip_prefix('/')?;
    let (kind, encoded_id) = rest.split_once('/')?;
    let kind = match kind {
        "task" => RouteKind::Task,
        "event" => RouteKind::Event,
        _ => return None,
    };
    let decoded = percent_encoding::percent_decode_str(encoded_id)
        .decode_utf8()
        .ok()?
        .into_owned();
    if decoded.is_empty() {
        return None;
    }
    Some((kind, decoded))
}

/// Which route kind a parsed path pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// `{basePath}/task/{id}`.
    Task,
    /// `{basePath}/event/{id}`.
    Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_ids() {
        let id = Id::new("t.double");
        let path = task_path(DEFAULT_BASE_PATH, &id);
        assert_eq!(path, "/__runner/task/t.double");
        assert_eq!(
            parse_route(DEFAULT_BASE_PATH, &path),
            Some((RouteKind::Task, "t.double".to_string()))
        );
    }

    #[test]
    fn escapes_reserved_characters() {
        let id = Id::new("weird id/with space");
        let path = task_path(DEFAULT_BASE_PATH, &id);
        assert!(!path[DEFAULT_BASE_PATH.len() + "/task/".len()..].contains(' '));
        let (kind, decoded) = parse_route(DEFAULT_BASE_PATH, &path).unwrap();
        assert_eq!(kind, RouteKind::Task);
        assert_eq!(decoded, "weird id/with space");
    }

    #[test]
    fn rejects_paths_outside_base() {
        assert!(parse_route(DEFAULT_BASE_PATH, "/other/task/t").is_none());
        assert!(parse_route(DEFAULT_BASE_PATH, "/__runner/unknown/t").is_none());
    }
}
