//! Binding a verified statement to the image being admitted.

use portcullis_attest::{ImageReference, InTotoStatement};

use crate::error::VerificationError;

/// Check that `statement` names the digest `image` resolved to.
///
/// A tag-only reference cannot be bound to anything and is rejected.
pub fn check_subject(
    statement: &InTotoStatement,
    image: &ImageReference,
) -> Result<(), VerificationError> {
    let Some(digest) = image.digest() else {
        return Err(VerificationError::SubjectMismatch {
            digest: format!("<unresolved {image}>"),
        });
    };
    if statement.binds_digest(digest) {
        Ok(())
    } else {
        Err(VerificationError::SubjectMismatch {
            digest: digest.to_owned(),
        })
    }
}
