use serde::Serialize;
use std::fmt;
use std::path::Path;

pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// How a served file should be presented by the caller's response layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "filename", rename_all = "snake_case")]
pub enum Disposition {
    Inline,
    Attachment(String),
}

impl Disposition {
    pub fn for_download(filename: Option<&str>) -> Self {
        match filename.map(str::trim).filter(|f| !f.is_empty()) {
            Some(f) => Self::Attachment(f.to_string()),
            None => Self::Inline,
        }
    }
}

/// `Content-Disposition` header value.
impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::Attachment(name) => {
                let ascii: String = name
                    .chars()
                    .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' { c } else { '_' })
                    .collect();
                write!(f, "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}", percent_encode(name))
            }
        }
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("a/B.JPG"), "image/jpeg");
        assert_eq!(content_type_for("x.png"), "image/png");
        assert_eq!(content_type_for("x.gif"), "image/gif");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn disposition_header() {
        assert_eq!(Disposition::for_download(None).to_string(), "inline");
        assert_eq!(Disposition::for_download(Some("  ")).to_string(), "inline");
        assert_eq!(
            Disposition::for_download(Some("my cat.jpg")).to_string(),
            "attachment; filename=\"my cat.jpg\"; filename*=UTF-8''my%20cat.jpg"
        );
        assert_eq!(
            Disposition::for_download(Some("猫\".png")).to_string(),
            "attachment; filename=\"__.png\"; filename*=UTF-8''%E7%8C%AB%22.png"
        );
    }
}
