//! Configuration-driven attribute module.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Deserialize;

use super::{
    resolve_attributes, AttributeError, AttributeModule, AttributeResult, AttributeSet,
    GlobalRecord, SingleAttributeMatcher, TranslationMapping, UserRecord,
};

/// A value written as one string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Values {
    One(String),
    Many(Vec<String>),
}

impl From<Values> for Vec<String> {
    fn from(values: Values) -> Self {
        match values {
            Values::One(value) => vec![value],
            Values::Many(values) => values,
        }
    }
}

fn into_record(raw: BTreeMap<String, Values>) -> AttributeSet {
    raw.into_iter().map(|(k, v)| (k, v.into())).collect()
}

/// Options of the `static` module.
///
/// ```toml
/// [attribute_module]
/// name = "static"
/// idp_attribute = "mail"
/// backing_attribute = "email"
///
/// [attribute_module.translation]
/// email = "mail"
///
/// [[attribute_module.users]]
/// email = "alice@example.com"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticModuleConfig {
    /// Matcher: upstream attribute name.
    pub idp_attribute: String,
    /// Matcher: user record attribute name.
    pub backing_attribute: String,
    /// Lay the translated attributes over the inbound ones.
    #[serde(default)]
    pub overlay_inbound: bool,
    #[serde(default)]
    translation: TranslationMapping,
    #[serde(default)]
    global: BTreeMap<String, Values>,
    #[serde(default)]
    users: Vec<BTreeMap<String, Values>>,
}

/// Attribute module whose records come from its configuration.
#[derive(Debug, Clone)]
pub struct StaticAttributeModule {
    users: Vec<UserRecord>,
    global: GlobalRecord,
    translation: TranslationMapping,
    matcher: SingleAttributeMatcher,
    overlay_inbound: bool,
}

impl StaticAttributeModule {
    /// Creates a module from in-memory records.
    #[must_use]
    pub fn new(
        users: Vec<UserRecord>,
        global: GlobalRecord,
        translation: TranslationMapping,
        matcher: SingleAttributeMatcher,
    ) -> Self {
        Self {
            users,
            global,
            translation,
            matcher,
            overlay_inbound: false,
        }
    }

    /// Sets whether translated attributes are laid over the inbound set.
    #[must_use]
    pub fn with_overlay_inbound(mut self, overlay: bool) -> Self {
        self.overlay_inbound = overlay;
        self
    }

    /// Builds the module from its configuration table.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the table does not deserialize.
    pub fn from_options(options: &toml::Table) -> AttributeResult<Self> {
        let config = toml::Value::Table(options.clone())
            .try_into::<StaticModuleConfig>()
            .map_err(|e| AttributeError::Configuration(e.to_string()))?;
        Ok(Self::from(config))
    }
}

impl From<StaticModuleConfig> for StaticAttributeModule {
    fn from(config: StaticModuleConfig) -> Self {
        Self::new(
            config.users.into_iter().map(into_record).collect(),
            into_record(config.global),
            config.translation,
            SingleAttributeMatcher::new(config.idp_attribute, config.backing_attribute),
        )
        .with_overlay_inbound(config.overlay_inbound)
    }
}

impl AttributeModule for StaticAttributeModule {
    fn get_user_data(&self) -> Cow<'_, [UserRecord]> {
        Cow::Borrowed(&self.users)
    }

    fn get_global_data(&self) -> Cow<'_, GlobalRecord> {
        Cow::Borrowed(&self.global)
    }

    fn matches(&self, user: &UserRecord, inbound: &AttributeSet) -> bool {
        self.matcher.matches(user, inbound)
    }

    fn translation(&self) -> &TranslationMapping {
        &self.translation
    }

    fn get_attributes(&self, inbound: &AttributeSet) -> AttributeResult<AttributeSet> {
        let translated = resolve_attributes(self, inbound)?;
        if !self.overlay_inbound {
            return Ok(translated);
        }
        let mut released = inbound.clone();
        released.extend(translated);
        Ok(released)
    }
}
