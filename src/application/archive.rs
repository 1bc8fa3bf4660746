use url::Url;

use crate::domain::teacher::Teacher;

/// Builds static links into the pre-rendered certificate archive.
///
/// Pure string construction over the certificate number; the object store
/// behind `base_url` owns availability, and no existence check happens here.
#[derive(Debug, Clone)]
pub struct ArchiveLinks {
    base_url: Option<Url>,
}

impl ArchiveLinks {
    pub fn new(base_url: Option<Url>) -> Self {
        Self { base_url }
    }

    pub fn configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Link to the pre-rendered certificate for this teacher, if an archive
    /// is configured.
    pub fn prerendered_url(&self, teacher: &Teacher) -> Option<String> {
        let base = self.base_url.as_ref()?;
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments
                .pop_if_empty()
                .push(&format!("{}.pdf", teacher.certificate_no));
        }
        Some(url.to_string())
    }
}
