use thiserror::Error;

/// Every failure the editing pipeline can report.
///
/// Backend errors (lopdf, image, I/O) are converted into one of these at the
/// module that talks to the backend; none of them cross into session state.
#[derive(Error, Debug)]
pub enum EditorError {
    #[error("No file was provided")]
    EmptyUpload,

    #[error("Please upload a PDF file")]
    NotAPdf { media_type: String },

    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("Failed to render page {page}: {reason}")]
    Render { page: u32, reason: String },

    #[error("Failed to save PDF: {0}")]
    Save(String),

    #[error("Failed to download PDF: {0}")]
    Download(String),

    #[error("Page {page} is out of range (document has {total} pages)")]
    PageIndex { page: u32, total: u32 },

    #[error("A save is already in progress")]
    SaveInProgress,

    #[error("Invalid compression settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Font error: {0}")]
    Font(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EditorError {
    pub(crate) fn render(page: u32, reason: impl Into<String>) -> Self {
        EditorError::Render {
            page,
            reason: reason.into(),
        }
    }

    /// True for failures the user can fix by choosing another file.
    pub fn is_upload_rejection(&self) -> bool {
        matches!(self, EditorError::EmptyUpload | EditorError::NotAPdf { .. })
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;
