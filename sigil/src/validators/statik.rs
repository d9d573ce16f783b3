// SPDX-License-Identifier: MIT OR Apache-2.0

//! The static validator: unconditional allow or deny.

use crate::error::{self, Result};
use crate::image::ImageRef;

/// Approves or denies every image without looking at it.
#[derive(Debug, Clone)]
pub struct StaticValidator {
    name: String,
    approve: bool,
}

impl StaticValidator {
    /// Builds a static validator.
    pub fn new(name: &str, approve: bool) -> Self {
        Self {
            name: name.to_string(),
            approve,
        }
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns no digest on approve (nothing to pin), the static-deny
    /// failure otherwise.
    pub fn validate(&self, _image: &ImageRef) -> Result<Option<String>> {
        if self.approve {
            Ok(None)
        } else {
            error::StaticDenySnafu.fail()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_returns_no_digest() {
        let validator = StaticValidator::new("allow", true);
        let image = ImageRef::parse("sample").unwrap();
        assert_eq!(validator.validate(&image).unwrap(), None);
    }

    #[test]
    fn deny_fails() {
        let validator = StaticValidator::new("deny", false);
        let image = ImageRef::parse("sample").unwrap();
        assert!(matches!(
            validator.validate(&image).unwrap_err(),
            crate::Error::StaticDeny
        ));
    }
}
