//! Attribute translation.
//!
//! An [`AttributeModule`] maps the attributes asserted by the upstream
//! identity provider to a local identity record and releases that record,
//! merged with module-wide global data and renamed through a translation
//! mapping, to the downstream service provider.

mod matcher;
mod registry;
mod static_module;
mod translate;

pub use matcher::SingleAttributeMatcher;
pub use registry::{AttributeModuleConfig, AttributeModuleRegistry, ModuleBuilder};
pub use static_module::{StaticAttributeModule, StaticModuleConfig};
pub use translate::{merge_records, resolve_attributes, translate};

use std::borrow::Cow;
use std::collections::BTreeMap;

use thiserror::Error;

/// Attribute name to ordered values.
pub type AttributeSet = BTreeMap<String, Vec<String>>;

/// A local identity record.
pub type UserRecord = AttributeSet;

/// Data released for every user.
pub type GlobalRecord = AttributeSet;

/// Backing attribute name to released attribute name.
pub type TranslationMapping = BTreeMap<String, String>;

/// Result type for attribute operations.
pub type AttributeResult<T> = Result<T, AttributeError>;

/// Attribute module errors.
#[derive(Debug, Error)]
pub enum AttributeError {
    /// No user record matches the inbound attributes.
    #[error("no matching identity")]
    NoMatchingIdentity,

    /// A merged attribute has no entry in the translation mapping.
    #[error("attribute '{0}' has no translation")]
    UnmappedAttribute(String),

    /// No module is registered under the configured name.
    #[error("unknown attribute module: {0}")]
    UnknownModule(String),

    /// The module options are invalid.
    #[error("invalid attribute module configuration: {0}")]
    Configuration(String),
}

/// Source of released attributes.
pub trait AttributeModule: Send + Sync {
    /// Local identity records.
    fn get_user_data(&self) -> Cow<'_, [UserRecord]>;

    /// Data merged into every released record.
    fn get_global_data(&self) -> Cow<'_, GlobalRecord>;

    /// Whether `user` is the subject described by `inbound`.
    fn matches(&self, user: &UserRecord, inbound: &AttributeSet) -> bool;

    /// Renaming applied to the merged record.
    fn translation(&self) -> &TranslationMapping;

    /// Resolves the attributes to release for `inbound`.
    ///
    /// # Errors
    ///
    /// `NoMatchingIdentity` when no record matches, `UnmappedAttribute`
    /// when the merged record holds a key the mapping does not cover.
    fn get_attributes(&self, inbound: &AttributeSet) -> AttributeResult<AttributeSet> {
        resolve_attributes(self, inbound)
    }
}
