use async_trait::async_trait;
use thiserror::Error;

use crate::domain::teacher::Teacher;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("teacher directory unavailable: {0}")]
    Unavailable(String),
}

/// Identity-lookup collaborator.
///
/// The rendering core consumes this only to obtain rendering parameters; it
/// performs no validation or authentication of its own. `find_all_by_phone`
/// returns every matching row so callers can see a duplicated phone number
/// instead of having one row picked silently.
#[async_trait]
pub trait TeacherDirectory: Send + Sync {
    async fn find_by_id(&self, id: u64) -> Result<Option<Teacher>, DirectoryError>;

    async fn find_all_by_phone(&self, phone: &str) -> Result<Vec<Teacher>, DirectoryError>;

    async fn find_by_name_and_id_card(
        &self,
        name: &str,
        id_card: &str,
    ) -> Result<Vec<Teacher>, DirectoryError>;
}
