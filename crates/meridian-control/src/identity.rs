//! Release identity comparison.
//!
//! A publisher can republish the same content under a different channel or
//! cursor. Two catalog entries name the same upstream release when either
//! their channel and cursor match, or semantic versions are authoritative for
//! the application and both carry the same version. The two axes are
//! independent; the relation is symmetric but not transitive.

use crate::types::Release;

/// Whether `a` and `b` are the same upstream release.
#[must_use]
pub fn same_upstream_release(a: &Release, b: &Release, semver_authoritative: bool) -> bool {
    if a.channel_id == b.channel_id && a.cursor == b.cursor {
        return true;
    }

    if !semver_authoritative {
        return false;
    }

    match (&a.semver, &b.semver) {
        (Some(va), Some(vb)) => va == vb,
        _ => false,
    }
}
