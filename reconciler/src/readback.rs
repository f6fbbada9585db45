//! Folding backend state back into a declared-state snapshot.
use models::state::{FieldSpec, ImportContext, StateSnapshot, UserSpecifiedMask};

/// A snapshot built from backend state, keyed by declared field names.
pub type CanonicalState = StateSnapshot;

/// Drops fields the backend filled in on its own from a freshly read snapshot.
///
/// A field marked as backend-defaulted is only kept if the user declared it in `known`, the last declared state.
/// The two representations of an aliased field are kept or dropped together, so declaring either one keeps both.
/// Imports keep everything because there is no declaration to compare against.
pub fn mask_unspecified(
    schema: &[FieldSpec],
    mut complete: CanonicalState,
    known: &StateSnapshot,
    context: ImportContext,
) -> CanonicalState {
    if context.is_import() {
        return complete;
    }

    let mask = UserSpecifiedMask::from_state(known);
    let declared = |spec: &FieldSpec| {
        mask.contains(spec.name)
            || spec.alias_of.map(|primary| mask.contains(primary)).unwrap_or(false)
            || schema
                .iter()
                .any(|other| other.alias_of == Some(spec.name) && mask.contains(other.name))
    };

    for spec in schema.iter().filter(|spec| spec.backend_default) {
        if !declared(spec) {
            complete.remove(spec.name);
        }
    }
    complete
}
