use uuid::Uuid;

use super::{StorageError, StorageResult};

/// Canonical object key layout, bit-exact across backends:
///
/// ```text
/// screenshots/{projectId}/{bugId}/original.png
/// screenshots/{projectId}/{bugId}/thumbnail.jpg
/// replays/{projectId}/{bugId}/metadata.json
/// replays/{projectId}/{bugId}/chunks/{index}.json.gz
/// attachments/{projectId}/{bugId}/{sanitizedFilename}
/// ```
pub const SCREENSHOT_PREFIX: &str = "screenshots";
pub const REPLAY_PREFIX: &str = "replays";
pub const ATTACHMENT_PREFIX: &str = "attachments";

pub fn screenshot_key(project_id: Uuid, bug_id: Uuid) -> String {
    format!("{SCREENSHOT_PREFIX}/{project_id}/{bug_id}/original.png")
}

pub fn thumbnail_key(project_id: Uuid, bug_id: Uuid) -> String {
    format!("{SCREENSHOT_PREFIX}/{project_id}/{bug_id}/thumbnail.jpg")
}

pub fn replay_metadata_key(project_id: Uuid, bug_id: Uuid) -> String {
    format!("{REPLAY_PREFIX}/{project_id}/{bug_id}/metadata.json")
}

pub fn replay_chunk_key(project_id: Uuid, bug_id: Uuid, index: u32) -> String {
    format!("{REPLAY_PREFIX}/{project_id}/{bug_id}/chunks/{index}.json.gz")
}

pub fn replay_prefix(project_id: Uuid, bug_id: Uuid) -> String {
    format!("{REPLAY_PREFIX}/{project_id}/{bug_id}")
}

pub fn report_prefixes(project_id: Uuid, bug_id: Uuid) -> [String; 3] {
    [
        format!("{SCREENSHOT_PREFIX}/{project_id}/{bug_id}"),
        format!("{REPLAY_PREFIX}/{project_id}/{bug_id}"),
        format!("{ATTACHMENT_PREFIX}/{project_id}/{bug_id}"),
    ]
}

pub fn project_prefixes(project_id: Uuid) -> [String; 3] {
    [
        format!("{SCREENSHOT_PREFIX}/{project_id}"),
        format!("{REPLAY_PREFIX}/{project_id}"),
        format!("{ATTACHMENT_PREFIX}/{project_id}"),
    ]
}

pub fn attachment_key(project_id: Uuid, bug_id: Uuid, filename: &str) -> String {
    format!(
        "{ATTACHMENT_PREFIX}/{project_id}/{bug_id}/{}",
        sanitize_filename(filename)
    )
}

/// Path-traversal defense for caller-supplied filenames: drop `..`
/// sequences, strip separators, and replace anything outside
/// `[A-Za-z0-9._-]` with `_`. An empty result becomes `attachment`.
pub fn sanitize_filename(filename: &str) -> String {
    let mut cleaned = filename.replace("..", "");
    cleaned.retain(|c| c != '/' && c != '\\');
    let cleaned: String = cleaned
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed
    }
}

/// Keys embed tenant and report ids; anything that is not a UUID never
/// reaches the filesystem or the bucket.
pub fn validate_ids(project_id: &str, bug_id: &str) -> StorageResult<(Uuid, Uuid)> {
    let project = Uuid::parse_str(project_id)
        .map_err(|_| StorageError::Validation(format!("invalid project id '{project_id}'")))?;
    let bug = Uuid::parse_str(bug_id)
        .map_err(|_| StorageError::Validation(format!("invalid bug report id '{bug_id}'")))?;
    Ok((project, bug))
}

/// Accept either a bare storage key or a full URL from older rows and
/// return the key. Everything before the first canonical top-level
/// segment, bucket and host included, is stripped.
pub fn storage_key_from_url(value: &str) -> Option<String> {
    for prefix in [SCREENSHOT_PREFIX, REPLAY_PREFIX, ATTACHMENT_PREFIX] {
        let marker = format!("{prefix}/");
        if let Some(pos) = value.find(&marker) {
            // A match mid-URL must sit on a path boundary.
            if pos == 0 || value.as_bytes()[pos - 1] == b'/' {
                return Some(value[pos..].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_keys() {
        let p = Uuid::parse_str("6a6e70a5-3a9f-4e8e-9d0e-111111111111").unwrap();
        let b = Uuid::parse_str("9b8c60b4-2b8e-4d7d-8c9f-222222222222").unwrap();
        assert_eq!(
            screenshot_key(p, b),
            format!("screenshots/{p}/{b}/original.png")
        );
        assert_eq!(thumbnail_key(p, b), format!("screenshots/{p}/{b}/thumbnail.jpg"));
        assert_eq!(replay_metadata_key(p, b), format!("replays/{p}/{b}/metadata.json"));
        assert_eq!(replay_chunk_key(p, b, 3), format!("replays/{p}/{b}/chunks/3.json.gz"));
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("report (final).pdf"), "report__final_.pdf");
        assert_eq!(sanitize_filename("фото отчёт.png"), "__________.png");
        assert_eq!(sanitize_filename(""), "attachment");
        assert_eq!(sanitize_filename("../.."), "attachment");
    }

    #[test]
    fn sanitized_names_never_escape() {
        for hostile in ["../../../etc/passwd", "..\\win\\cmd.exe", "a/../../b", "./.."] {
            let name = sanitize_filename(hostile);
            assert!(!name.contains(".."), "{name}");
            assert!(!name.contains('/'), "{name}");
            assert!(!name.contains('\\'), "{name}");
        }
    }

    #[test]
    fn key_from_url_strips_host_and_bucket() {
        let key = "screenshots/11111111-1111-1111-1111-111111111111/22222222-2222-2222-2222-222222222222/original.png";
        assert_eq!(storage_key_from_url(key).as_deref(), Some(key));
        assert_eq!(
            storage_key_from_url(&format!("https://cdn.example.com/bucket/{key}")).as_deref(),
            Some(key)
        );
        assert_eq!(
            storage_key_from_url(&format!("http://minio:9000/bugspotter/{key}")).as_deref(),
            Some(key)
        );
        assert_eq!(storage_key_from_url("https://example.com/unrelated/path.png"), None);
    }

    #[test]
    fn ids_must_be_uuids() {
        assert!(validate_ids("not-a-uuid", "22222222-2222-2222-2222-222222222222").is_err());
        assert!(validate_ids(
            "11111111-1111-1111-1111-111111111111",
            "../../escape"
        )
        .is_err());
    }
}
