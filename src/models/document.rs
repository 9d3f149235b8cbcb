use serde::{Deserialize, Serialize};

/// The editor family that opens a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Word,
    Cell,
    Slide,
}

const CELL: &[&str] = &[
    "xls", "xlsx", "xlsm", "xlt", "xltx", "xltm", "ods", "fods", "ots", "csv",
];

const SLIDE: &[&str] = &[
    "pps", "ppsx", "ppsm", "ppt", "pptx", "pptm", "pot", "potx", "potm", "odp", "fodp", "otp",
];

const WORD: &[&str] = &[
    "doc", "docx", "docm", "dot", "dotx", "dotm", "odt", "fodt", "ott", "rtf", "txt", "html",
    "htm", "mht", "pdf", "djvu", "fb2", "epub", "xps",
];

const EDITABLE: &[&str] = &["docx", "xlsx", "pptx"];

/// Lowercased extension of `filename`, without the dot.
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.trim().rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn document_type(ext: &str) -> Option<DocumentType> {
    let ext = ext.to_ascii_lowercase();
    if WORD.contains(&ext.as_str()) {
        Some(DocumentType::Word)
    } else if CELL.contains(&ext.as_str()) {
        Some(DocumentType::Cell)
    } else if SLIDE.contains(&ext.as_str()) {
        Some(DocumentType::Slide)
    } else {
        None
    }
}

pub fn is_editable(ext: &str) -> bool {
    EDITABLE.contains(&ext.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_extensions_to_editors() {
        assert_eq!(document_type("DOCX"), Some(DocumentType::Word));
        assert_eq!(document_type("csv"), Some(DocumentType::Cell));
        assert_eq!(document_type("odp"), Some(DocumentType::Slide));
        assert_eq!(document_type("exe"), None);
    }

    #[test]
    fn only_ooxml_is_editable() {
        assert!(is_editable("docx"));
        assert!(is_editable("PPTX"));
        assert!(!is_editable("doc"));
        assert!(!is_editable("pdf"));
    }

    #[test]
    fn extracts_extension() {
        assert_eq!(extension("Quarterly.Report.XLSX").as_deref(), Some("xlsx"));
        assert_eq!(extension("notes"), None);
        assert_eq!(extension(".bashrc"), None);
        assert_eq!(extension("trailing."), None);
    }
}
