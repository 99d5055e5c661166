//! Client-side identifier minting.
//!
//! Records are assigned a `uuid` before they ever reach the server, so the
//! client can address them while offline. Collisions are treated as
//! application bugs.

use uuid::Uuid;

/// Length of a short-form identifier.
const SHORT_LEN: usize = 15;

/// Shape of minted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UuidForm {
    /// 36-character canonical form
    #[default]
    Long,
    /// Compact form, at most 15 characters
    Short,
}

/// Mint a new client identifier.
pub fn mint(form: UuidForm) -> String {
    let id = Uuid::new_v4();
    match form {
        UuidForm::Long => id.to_string(),
        UuidForm::Short => {
            let mut compact = id.as_simple().to_string();
            compact.truncate(SHORT_LEN);
            compact
        }
    }
}
