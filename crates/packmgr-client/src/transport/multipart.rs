//! Minimal `multipart/form-data` encoder for backends without built-in support.

use crate::request::FilePart;

/// An encoded multipart body and its matching `Content-Type` header.
pub(super) struct MultipartBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Encode a single file part.
pub(super) fn encode(part: &FilePart) -> MultipartBody {
    let boundary = format!("----packmgr{}", uuid::Uuid::new_v4().simple());

    let mut bytes = Vec::with_capacity(part.bytes.len() + 256);
    bytes.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    bytes.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            quote(&part.field),
            quote(&part.file_name)
        )
        .as_bytes(),
    );
    bytes.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
    bytes.extend_from_slice(&part.bytes);
    bytes.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    MultipartBody {
        content_type: format!("multipart/form-data; boundary={}", boundary),
        bytes,
    }
}
