//! TOML-roster-backed implementation of the teacher directory.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::{
    application::directory::{DirectoryError, TeacherDirectory},
    domain::{error::DomainError, teacher::Teacher},
};

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read roster file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse roster file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    teacher: Vec<Teacher>,
}

/// In-memory teacher directory loaded once at startup.
///
/// Lookups are linear scans; rosters are a few thousand rows at most and the
/// directory is read-only after load, so there is nothing to index or lock.
#[derive(Debug)]
pub struct RosterDirectory {
    teachers: Vec<Teacher>,
}

impl RosterDirectory {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = std::fs::read_to_string(path)?;
        let file: RosterFile = toml::from_str(&text)?;
        let directory = Self::from_rows(file.teacher)?;
        info!(
            target = "infra::roster",
            path = %path.display(),
            teachers = directory.len(),
            "roster loaded"
        );
        Ok(directory)
    }

    pub fn from_rows(rows: Vec<Teacher>) -> Result<Self, RosterError> {
        for row in &rows {
            if row.name.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "roster row {} has an empty name",
                    row.id
                ))
                .into());
            }
            if row.phone.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "roster row {} has an empty phone",
                    row.id
                ))
                .into());
            }
            if row.certificate_no.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "roster row {} has an empty certificate number",
                    row.id
                ))
                .into());
            }
        }
        Ok(Self { teachers: rows })
    }

    pub fn len(&self) -> usize {
        self.teachers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teachers.is_empty()
    }
}

#[async_trait]
impl TeacherDirectory for RosterDirectory {
    async fn find_by_id(&self, id: u64) -> Result<Option<Teacher>, DirectoryError> {
        Ok(self.teachers.iter().find(|t| t.id == id).cloned())
    }

    async fn find_all_by_phone(&self, phone: &str) -> Result<Vec<Teacher>, DirectoryError> {
        let phone = phone.trim();
        Ok(self
            .teachers
            .iter()
            .filter(|t| t.phone == phone)
            .cloned()
            .collect())
    }

    async fn find_by_name_and_id_card(
        &self,
        name: &str,
        id_card: &str,
    ) -> Result<Vec<Teacher>, DirectoryError> {
        let name = name.trim();
        let id_card = id_card.trim();
        Ok(self
            .teachers
            .iter()
            .filter(|t| t.name == name && t.id_card.as_deref() == Some(id_card))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[teacher]]
id = 1
name = "李雷"
phone = "13800000000"
id_card = "370700199001011234"
category = "潍坊市参培教师"
certificate_no = "WF-2025-0001"
level = "优秀"
password = "011234"

[[teacher]]
id = 2
name = "韩梅梅"
phone = "13800000000"
category = "徐州市参培教师"
certificate_no = "XZ-2025-0002"
level = "合格"

[[teacher]]
id = 3
name = "王芳"
phone = "13700000000"
id_card = "320300199102021111"
category = "其他人员"
certificate_no = "QT-2025-0003"
level = "优秀"
session = "2025春"
"#;

    fn roster() -> RosterDirectory {
        let file: RosterFile = toml::from_str(SAMPLE).expect("parse");
        RosterDirectory::from_rows(file.teacher).expect("valid rows")
    }

    #[tokio::test]
    async fn phone_lookup_returns_every_matching_row() {
        let roster = roster();
        let matches = roster
            .find_all_by_phone(" 13800000000 ")
            .await
            .expect("lookup");
        assert_eq!(matches.len(), 2, "duplicated phone must stay visible");

        let matches = roster.find_all_by_phone("13700000000").await.expect("lookup");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].session.as_deref(), Some("2025春"));

        let matches = roster.find_all_by_phone("13600000000").await.expect("lookup");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn name_and_id_card_lookup_requires_both_fields() {
        let roster = roster();
        let matches = roster
            .find_by_name_and_id_card("王芳", "320300199102021111")
            .await
            .expect("lookup");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].phone, "13700000000");

        // Rows without a stored id card never match.
        let matches = roster
            .find_by_name_and_id_card("韩梅梅", "anything")
            .await
            .expect("lookup");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn id_lookup_is_exact() {
        let roster = roster();
        let found = roster.find_by_id(2).await.expect("lookup");
        assert_eq!(found.map(|t| t.name), Some("韩梅梅".to_string()));
        assert!(roster.find_by_id(99).await.expect("lookup").is_none());
    }

    #[test]
    fn rows_with_blank_required_fields_are_rejected() {
        let mut row = Teacher {
            id: 9,
            name: "  ".to_string(),
            phone: "13800000001".to_string(),
            id_card: None,
            category: "其他人员".to_string(),
            score: None,
            certificate_no: "QT-2025-0009".to_string(),
            level: "合格".to_string(),
            session: None,
            password: None,
            cert_suffix: None,
        };
        assert!(matches!(
            RosterDirectory::from_rows(vec![row.clone()]),
            Err(RosterError::Invalid(_))
        ));

        row.name = "赵云".to_string();
        row.certificate_no = String::new();
        assert!(matches!(
            RosterDirectory::from_rows(vec![row]),
            Err(RosterError::Invalid(_))
        ));
    }
}
