use subtle::ConstantTimeEq;

/// Maintenance-mode gate, consulted before admission.
///
/// When enabled, certificate endpoints answer "down for maintenance" unless
/// the caller presents the bypass secret.
#[derive(Debug, Clone)]
pub struct MaintenanceGate {
    enabled: bool,
    secret: Option<String>,
}

impl MaintenanceGate {
    pub fn new(enabled: bool, secret: Option<String>) -> Self {
        Self { enabled, secret }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Constant-time comparison against the configured bypass secret.
    /// Without a configured secret nothing matches.
    pub fn check_secret(&self, candidate: &str) -> bool {
        match self.secret.as_deref() {
            Some(secret) => secret
                .as_bytes()
                .ct_eq(candidate.as_bytes())
                .unwrap_u8()
                == 1,
            None => false,
        }
    }

    /// Whether a request carrying `candidate` (if any) may proceed.
    pub fn permits(&self, candidate: Option<&str>) -> bool {
        !self.enabled || candidate.is_some_and(|value| self.check_secret(value))
    }
}
