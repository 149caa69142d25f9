/// Extension-based classification of files into destination folders.
///
/// A file's folder is looked up from its extension in an [`ExtensionMap`];
/// anything unmapped, or without an extension, lands in the default folder.
///
/// # Examples
///
/// ```
/// use foldersort::classifier::{ExtensionMap, classify};
///
/// let mut map = ExtensionMap::new();
/// map.insert("pdf", "Documents").unwrap();
///
/// assert_eq!(classify("report.PDF", &map, "Other"), "Documents");
/// assert_eq!(classify("Makefile", &map, "Other"), "Other");
/// ```
use crate::error::SortResult;
use crate::validation::{normalize_extension, validate_folder_name};
use serde::Serialize;
use std::collections::BTreeMap;

/// Built-in folders used when no settings file maps anything.
const DEFAULT_GROUPS: &[(&str, &[&str])] = &[
    (
        "Images",
        &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "ico", "heic"],
    ),
    ("Audio", &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"]),
    ("Videos", &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "3gp"]),
    (
        "Documents",
        &["pdf", "txt", "doc", "docx", "html", "htm", "md", "rtf", "odt"],
    ),
    ("Archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
    (
        "Code",
        &[
            "py", "java", "c", "cpp", "h", "hpp", "js", "ts", "rs", "go", "sh", "json", "xml",
            "yaml", "yml", "toml",
        ],
    ),
    ("Spreadsheets", &["csv", "xls", "xlsx", "ods"]),
    ("Presentations", &["ppt", "pptx", "odp"]),
    ("Fonts", &["ttf", "otf", "woff", "woff2"]),
];

/// Mapping from normalized extension to destination folder name.
///
/// Keys are lowercase ASCII alphanumerics without a leading dot, and every
/// folder name has passed [`validate_folder_name`]. Both are enforced on
/// insertion, so a constructed map is always valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtensionMap {
    entries: BTreeMap<String, String>,
}

impl ExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in category mapping ("Images", "Documents", ...).
    pub fn with_defaults() -> Self {
        let entries = DEFAULT_GROUPS
            .iter()
            .flat_map(|(folder, exts)| {
                exts.iter()
                    .map(move |ext| (ext.to_string(), folder.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Adds or replaces a mapping. `extension` may carry a leading dot or
    /// uppercase letters; it is stored normalized.
    pub fn insert(&mut self, extension: &str, folder: &str) -> SortResult<()> {
        let key = normalize_extension(extension)?;
        validate_folder_name(folder)?;
        self.entries.insert(key, folder.to_string());
        Ok(())
    }

    pub fn remove(&mut self, extension: &str) -> Option<String> {
        let key = normalize_extension(extension).ok()?;
        self.entries.remove(&key)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, extension: &str) -> Option<&str> {
        self.entries
            .get(&extension.to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl TryFrom<BTreeMap<String, String>> for ExtensionMap {
    type Error = crate::error::SortError;

    fn try_from(raw: BTreeMap<String, String>) -> SortResult<Self> {
        let mut map = ExtensionMap::new();
        for (ext, folder) in &raw {
            map.insert(ext, folder)?;
        }
        Ok(map)
    }
}

/// Returns the extension of `filename`: the text after the last dot.
///
/// Names without a dot, names ending in a dot, and dot-files such as
/// `.bashrc` have no extension.
pub fn extension_of(filename: &str) -> Option<&str> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Chooses the destination folder for `filename`.
pub fn classify<'a>(filename: &str, map: &'a ExtensionMap, default_folder: &'a str) -> &'a str {
    extension_of(filename)
        .and_then(|ext| map.get(ext))
        .unwrap_or(default_folder)
}
