use std::path::Path;
use std::sync::Arc;

use crate::error::LiaisonError;

/// Document bytes plus the identifier used in diagnostics.
#[derive(Debug, Clone)]
pub struct InputSource {
    bytes: Arc<[u8]>,
    system_id: Option<String>,
}

impl InputSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: Arc::from(bytes.into()), system_id: None }
    }

    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    /// Read a file; its path becomes the system id.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LiaisonError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Ok(Self::from_bytes(bytes).with_system_id(path.display().to_string()))
    }

    /// An empty id counts as no id.
    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        let id = system_id.into();
        self.system_id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }
}
