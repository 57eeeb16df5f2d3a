#![allow(dead_code)]

pub mod document;

use tree_changeset::modular::{ChangeFamilyConfig, ModularChangeFamily, ModularChangeset};
use tree_changeset::sequence_field::Changeset;
use tree_changeset::{FieldChange, FieldKey, RevisionTag, TaggedChange};

pub fn rev(n: u64) -> RevisionTag {
    RevisionTag(n)
}

/// A family that checks every changeset it produces.
pub fn family() -> ModularChangeFamily {
    ModularChangeFamily::new(ChangeFamilyConfig {
        validate_outputs: true,
        ..ChangeFamilyConfig::default()
    })
}

pub fn tagged(change: &ModularChangeset, n: u64) -> TaggedChange<ModularChangeset> {
    TaggedChange::new(change.clone(), rev(n))
}

/// The marks of the root sequence field `key`.
pub fn marks<'a>(change: &'a ModularChangeset, key: &str) -> &'a Changeset {
    match change.field_changes.get(&FieldKey::from(key)) {
        Some(FieldChange::Sequence(marks)) => marks,
        other => panic!("expected sequence field {key}, got {other:?}"),
    }
}
