use serde::{Deserialize, Serialize};

/// A single roster row: the identity record behind every lookup and render.
///
/// Field names follow the upstream roster export. `password` is the
/// credential the import pipeline derives from the ID number; it is cleared
/// before a record leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: u64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub id_card: Option<String>,
    pub category: String,
    #[serde(default)]
    pub score: Option<String>,
    pub certificate_no: String,
    pub level: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub cert_suffix: Option<String>,
}

impl Teacher {
    /// Strip the credential before serializing the record into a response.
    pub fn redacted(mut self) -> Self {
        self.password = None;
        self
    }

    /// Check a supplied login credential against the stored one.
    ///
    /// Records without a stored credential never authenticate.
    pub fn credential_matches(&self, candidate: &str) -> bool {
        match self.password.as_deref() {
            Some(stored) => stored == candidate,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher() -> Teacher {
        Teacher {
            id: 7,
            name: "测试用户".to_string(),
            phone: "13800000000".to_string(),
            id_card: Some("370700199001011234".to_string()),
            category: "潍坊市参培教师".to_string(),
            score: Some("92".to_string()),
            certificate_no: "WF-2025-0007".to_string(),
            level: "优秀".to_string(),
            session: Some("2025春".to_string()),
            password: Some("011234".to_string()),
            cert_suffix: Some("0007".to_string()),
        }
    }

    #[test]
    fn redacted_clears_the_credential_only() {
        let redacted = teacher().redacted();
        assert_eq!(redacted.password, None);
        assert_eq!(redacted.name, "测试用户");
        assert_eq!(redacted.certificate_no, "WF-2025-0007");
    }

    #[test]
    fn credential_check_requires_a_stored_credential() {
        let mut record = teacher();
        assert!(record.credential_matches("011234"));
        assert!(!record.credential_matches("000000"));

        record.password = None;
        assert!(!record.credential_matches("011234"));
    }
}
