//! acState merge for the read-merge-write command path

use crate::models::{AcState, Patch};

/// Overwrite every attribute named in `patch`; leave all others untouched.
/// Attributes are scalars, so this is a shallow merge.
pub fn merge_state(state: &mut AcState, patch: &Patch) {
    for (attribute, value) in patch.iter() {
        state.insert(attribute.clone(), value.clone());
    }
}

/// Non-mutating variant of [`merge_state`]
pub fn merged(state: &AcState, patch: &Patch) -> AcState {
    let mut out = state.clone();
    merge_state(&mut out, patch);
    out
}
