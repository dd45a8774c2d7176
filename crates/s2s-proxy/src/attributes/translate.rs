//! Record merging and key translation.

use super::{
    AttributeError, AttributeModule, AttributeResult, AttributeSet, GlobalRecord,
    TranslationMapping, UserRecord,
};

/// Merges a user record over the global record. User fields win.
#[must_use]
pub fn merge_records(user: &UserRecord, global: &GlobalRecord) -> AttributeSet {
    let mut merged = global.clone();
    merged.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Renames every key of `merged` through `mapping`.
///
/// Values of keys translated to the same name are concatenated in key
/// order.
///
/// # Errors
///
/// Returns `UnmappedAttribute` for the first key absent from `mapping`.
pub fn translate(merged: &AttributeSet, mapping: &TranslationMapping) -> AttributeResult<AttributeSet> {
    let mut released = AttributeSet::new();
    for (key, values) in merged {
        let target = mapping
            .get(key)
            .ok_or_else(|| AttributeError::UnmappedAttribute(key.clone()))?;
        released
            .entry(target.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
    Ok(released)
}

/// Find, merge and translate: the resolution shared by every module.
///
/// # Errors
///
/// See [`AttributeModule::get_attributes`].
pub fn resolve_attributes<M>(module: &M, inbound: &AttributeSet) -> AttributeResult<AttributeSet>
where
    M: AttributeModule + ?Sized,
{
    let users = module.get_user_data();
    let user = users
        .iter()
        .find(|user| module.matches(user, inbound))
        .ok_or(AttributeError::NoMatchingIdentity)?;

    let merged = merge_records(user, &module.get_global_data());
    translate(&merged, module.translation())
}
