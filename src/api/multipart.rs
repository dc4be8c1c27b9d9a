//! Minimal `multipart/form-data` reader for image uploads.
//!
//! Only what browsers and `curl -F` send is handled: CRLF line endings,
//! a `Content-Disposition` header per part, no nested multiparts.

use anyhow::{anyhow, Result};

#[derive(Debug, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub data: &'a [u8],
}

/// Extract the boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let next_delimiter = format!("\r\n--{boundary}").into_bytes();

    let mut pos = find(body, delimiter, 0)
        .ok_or_else(|| anyhow!("multipart body has no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();
    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart boundary line"));
        }
        let start = pos + 2;
        let end = find(body, &next_delimiter, start)
            .ok_or_else(|| anyhow!("multipart body is not terminated"))?;
        parts.push(parse_part(&body[start..end])?);
        pos = end + next_delimiter.len();
    }
}

/// Bytes of the named file field, or of the first part carrying a filename.
pub fn file_field<'a>(parts: &[Part<'a>], field: &str) -> Option<&'a [u8]> {
    parts
        .iter()
        .find(|part| part.name.as_deref() == Some(field))
        .or_else(|| parts.iter().find(|part| part.filename.is_some()))
        .map(|part| part.data)
}

fn parse_part(raw: &[u8]) -> Result<Part<'_>> {
    let split =
        find(raw, b"\r\n\r\n", 0).ok_or_else(|| anyhow!("multipart part has no headers"))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let data = &raw[split + 4..];

    let mut part = Part {
        name: None,
        filename: None,
        data,
    };
    for line in head.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        for param in value.split(';').skip(1) {
            if let Some((k, v)) = param.trim().split_once('=') {
                let v = v.trim().trim_matches('"').to_string();
                match k.trim() {
                    "name" => part.name = Some(v),
                    "filename" => part.filename = Some(v),
                    _ => {}
                }
            }
        }
    }
    Ok(part)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}
