//! Validation of attachment references sent alongside a prompt.

use std::collections::HashSet;

use serde_json::Value;

use super::error::ServiceError;
use crate::routes::models::{AttachmentKind, AttachmentRef};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Normalize a client supplied attachment list.
///
/// `null` (or a missing value) means no attachments. Anything other than an
/// array of objects with a non-empty `path` is rejected. Duplicate paths are
/// dropped, keeping the first occurrence. Feeding the output back in yields
/// the same list.
pub fn normalize_attachments(value: Option<&Value>) -> Result<Vec<AttachmentRef>, ServiceError> {
    let entries = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ServiceError::validation("attachments must be an array"));
        }
    };

    let mut seen = HashSet::new();
    let mut attachments = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let object = entry.as_object().ok_or_else(|| {
            ServiceError::validation(format!("attachment {index} must be an object"))
        })?;

        let path = object
            .get("path")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| {
                ServiceError::validation(format!("attachment {index} is missing a path"))
            })?;

        if !seen.insert(path.to_string()) {
            continue;
        }

        let filename = non_empty_str(object.get("filename"))
            .map(str::to_owned)
            .unwrap_or_else(|| last_segment(path).to_string());
        let mime_type = non_empty_str(object.get("mime_type"))
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        let kind = match object.get("kind").and_then(Value::as_str) {
            Some("image") => AttachmentKind::Image,
            _ => AttachmentKind::File,
        };

        attachments.push(AttachmentRef {
            path: path.to_string(),
            filename,
            mime_type,
            kind,
        });
    }

    Ok(attachments)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn last_segment(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
}
