use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder line reported for files that fail text validation
pub const UNREADABLE_FILE_MESSAGE: &str = "File is not human-readable";

/// Line count used when a request doesn't carry a usable one
pub const DEFAULT_LINE_COUNT: usize = 20;

/// How many qualifying lines to collect from a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLimit {
    Count(usize),
    /// Read back to the start of the file
    All,
}

impl LineLimit {
    /// Interpret the `lines` request parameter: `-1` is unbounded, anything
    /// absent, unparsable or otherwise non-positive falls back to `default`.
    pub fn from_param(raw: Option<&str>, default: usize) -> Self {
        match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
            Some(-1) => LineLimit::All,
            Some(n) if n > 0 => LineLimit::Count(n as usize),
            _ => LineLimit::Count(default),
        }
    }

    /// Inverse of `from_param`, used when forwarding a request to a peer
    pub fn to_param(self) -> String {
        match self {
            LineLimit::Count(n) => n.to_string(),
            LineLimit::All => "-1".to_string(),
        }
    }

    pub fn is_reached(self, collected: usize) -> bool {
        match self {
            LineLimit::Count(n) => collected >= n,
            LineLimit::All => false,
        }
    }
}

impl Default for LineLimit {
    fn default() -> Self {
        LineLimit::Count(DEFAULT_LINE_COUNT)
    }
}

/// The three request parameters every local or cluster request carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: LineLimit,
    /// Extensions to skip, each including its leading dot (e.g. `.gz`)
    pub excluded: Vec<String>,
    pub search: Option<String>,
}

impl LogQuery {
    /// Build a query from raw request parameters. An empty search string is
    /// the same as no search.
    pub fn from_params(
        lines: Option<&str>,
        excluded_file_types: Option<&str>,
        search: Option<&str>,
        default_lines: usize,
    ) -> Self {
        Self {
            limit: LineLimit::from_param(lines, default_lines),
            excluded: parse_excluded(excluded_file_types.unwrap_or("")),
            search: search.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Exact match on the extension, leading dot included
    pub fn is_excluded(&self, extension: &str) -> bool {
        self.excluded.iter().any(|e| e == extension)
    }

    /// Query-string pairs for forwarding this query to a peer's `/logs`
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("lines", self.limit.to_param())];
        if !self.excluded.is_empty() {
            params.push(("excludedFileTypes", self.excluded.join(",")));
        }
        if let Some(search) = &self.search {
            params.push(("search", search.clone()));
        }
        params
    }
}

/// Split a comma-separated extension list. Entries are not trimmed or
/// normalized, so `.log` never matches ` .log` or `log`.
pub fn parse_excluded(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

/// A directory entry as handed to the collector
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileEntry {
    /// Extension including the leading dot, or "" when there is none.
    /// Only the last component counts: `app.log.gz` has extension `.gz`.
    pub fn extension(&self) -> String {
        match self.name.rfind('.') {
            Some(idx) => self.name[idx..].to_string(),
            None => String::new(),
        }
    }
}

/// What reading a single file produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBody {
    /// Qualifying lines, newest first
    Text(Vec<String>),
    /// Content failed text validation
    Binary,
    /// The file could not be opened or read
    Error(String),
}

/// Result for one file in a local request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireFileContent", from = "WireFileContent")]
pub struct FileContent {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub body: FileBody,
}

impl FileContent {
    pub fn new(entry: &FileEntry, body: FileBody) -> Self {
        Self {
            name: entry.path.to_string_lossy().into_owned(),
            size_bytes: entry.size,
            modified: DateTime::<Utc>::from(entry.modified),
            body,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, FileBody::Text(_))
    }

    /// Lines as they appear on the wire: real lines for text, the sentinel
    /// for binary content, nothing for errors.
    pub fn lines(&self) -> Vec<String> {
        match &self.body {
            FileBody::Text(lines) => lines.clone(),
            FileBody::Binary => vec![UNREADABLE_FILE_MESSAGE.to_string()],
            FileBody::Error(_) => Vec::new(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.body {
            FileBody::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Legacy JSON layout of a file result
#[derive(Debug, Serialize, Deserialize)]
struct WireFileContent {
    #[serde(rename = "fileName")]
    name: String,
    #[serde(rename = "fileSizeBytes", default)]
    size_bytes: u64,
    #[serde(rename = "isUtf8", default)]
    is_utf8: bool,
    #[serde(rename = "lastModified")]
    modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    content: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<FileContent> for WireFileContent {
    fn from(file: FileContent) -> Self {
        let is_utf8 = file.is_text();
        let (content, error) = match file.body {
            FileBody::Text(lines) => (lines, None),
            FileBody::Binary => (vec![UNREADABLE_FILE_MESSAGE.to_string()], None),
            FileBody::Error(reason) => (Vec::new(), Some(reason)),
        };
        Self {
            name: file.name,
            size_bytes: file.size_bytes,
            is_utf8,
            modified: file.modified,
            content,
            error,
        }
    }
}

impl From<WireFileContent> for FileContent {
    fn from(wire: WireFileContent) -> Self {
        let body = match (wire.error, wire.is_utf8) {
            (Some(reason), _) => FileBody::Error(reason),
            (None, true) => FileBody::Text(wire.content),
            (None, false) => FileBody::Binary,
        };
        Self {
            name: wire.name,
            size_bytes: wire.size_bytes,
            modified: wire.modified,
            body,
        }
    }
}

/// One peer's share of a cluster response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    pub host: String,
    pub files: Vec<FileContent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn entry(name: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: PathBuf::from("/var/log").join(name),
            size: 42,
            modified: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn test_line_limit_from_param() {
        assert_eq!(LineLimit::from_param(None, 20), LineLimit::Count(20));
        assert_eq!(LineLimit::from_param(Some("3"), 20), LineLimit::Count(3));
        assert_eq!(LineLimit::from_param(Some("invalid"), 20), LineLimit::Count(20));
        assert_eq!(LineLimit::from_param(Some("-1"), 20), LineLimit::All);
        assert_eq!(LineLimit::from_param(Some("0"), 20), LineLimit::Count(20));
        assert_eq!(LineLimit::from_param(Some("-7"), 20), LineLimit::Count(20));
    }

    #[test]
    fn test_extension_is_last_component() {
        assert_eq!(entry("app.log").extension(), ".log");
        assert_eq!(entry("app.log.gz").extension(), ".gz");
        assert_eq!(entry("Makefile").extension(), "");
    }

    #[test]
    fn test_exclusion_is_exact() {
        let query = LogQuery::from_params(None, Some(".log,.tmp"), None, 20);
        assert!(query.is_excluded(".log"));
        assert!(query.is_excluded(".tmp"));
        assert!(!query.is_excluded(".gz"));
        assert!(!query.is_excluded("log"));

        let none = LogQuery::from_params(None, Some(""), None, 20);
        assert!(none.excluded.is_empty());
        assert!(!none.is_excluded(""));
    }

    #[test]
    fn test_empty_search_is_no_search() {
        let query = LogQuery::from_params(None, None, Some(""), 20);
        assert_eq!(query.search(), None);
    }

    #[test]
    fn test_forward_params() {
        let query = LogQuery::from_params(Some("-1"), Some(".gz,.tmp"), Some("ERROR"), 20);
        assert_eq!(
            query.to_params(),
            vec![
                ("lines", "-1".to_string()),
                ("excludedFileTypes", ".gz,.tmp".to_string()),
                ("search", "ERROR".to_string()),
            ]
        );
    }

    #[test]
    fn test_binary_serializes_with_sentinel() {
        let file = FileContent::new(&entry("app.log.gz"), FileBody::Binary);
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["fileName"], "/var/log/app.log.gz");
        assert_eq!(json["isUtf8"], false);
        assert_eq!(json["content"][0], UNREADABLE_FILE_MESSAGE);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_serializes_without_content() {
        let file = FileContent::new(&entry("secret.log"), FileBody::Error("permission denied".into()));
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["error"], "permission denied");
        assert!(json.get("content").is_none());

        let back: FileContent = serde_json::from_value(json).unwrap();
        assert_eq!(back.error(), Some("permission denied"));
        assert!(back.lines().is_empty());
    }

    #[test]
    fn test_wire_decodes_legacy_binary_entry() {
        let json = serde_json::json!({
            "fileName": "/var/log/old.gz",
            "fileSizeBytes": 10,
            "isUtf8": false,
            "lastModified": "2024-12-16T10:00:00Z",
            "content": [UNREADABLE_FILE_MESSAGE],
        });
        let file: FileContent = serde_json::from_value(json).unwrap();
        assert_eq!(file.body, FileBody::Binary);
        assert_eq!(file.lines(), vec![UNREADABLE_FILE_MESSAGE.to_string()]);
    }
}
