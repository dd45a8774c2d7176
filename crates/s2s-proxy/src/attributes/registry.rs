//! Compile-time registry of attribute modules.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::{AttributeError, AttributeModule, AttributeResult, StaticAttributeModule};

/// Builds a module from its configuration table.
pub type ModuleBuilder = fn(&toml::Table) -> AttributeResult<Arc<dyn AttributeModule>>;

/// The `[attribute_module]` section: a module name plus its options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeModuleConfig {
    /// Registered module name.
    pub name: String,
    /// Remaining keys, handed to the module builder.
    #[serde(flatten)]
    pub options: toml::Table,
}

/// Registry mapping module names to builders.
#[derive(Debug, Clone, Default)]
pub struct AttributeModuleRegistry {
    builders: HashMap<&'static str, ModuleBuilder>,
}

impl AttributeModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in modules.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("static", build_static);
        registry
    }

    /// Registers `builder` under `name`, replacing any previous one.
    pub fn register(&mut self, name: &'static str, builder: ModuleBuilder) {
        self.builders.insert(name, builder);
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.builders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Builds the module selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` for an unregistered name, or the builder's
    /// own error.
    pub fn build(&self, config: &AttributeModuleConfig) -> AttributeResult<Arc<dyn AttributeModule>> {
        let builder = self
            .builders
            .get(config.name.as_str())
            .ok_or_else(|| AttributeError::UnknownModule(config.name.clone()))?;
        tracing::debug!(module = %config.name, "building attribute module");
        builder(&config.options)
    }
}

fn build_static(options: &toml::Table) -> AttributeResult<Arc<dyn AttributeModule>> {
    let module: Arc<dyn AttributeModule> = Arc::new(StaticAttributeModule::from_options(options)?);
    Ok(module)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::attributes::{AttributeSet, GlobalRecord, TranslationMapping, UserRecord};

    struct Passthrough(TranslationMapping);

    impl AttributeModule for Passthrough {
        fn get_user_data(&self) -> Cow<'_, [UserRecord]> {
            Cow::Owned(vec![UserRecord::new()])
        }
        fn get_global_data(&self) -> Cow<'_, GlobalRecord> {
            Cow::Owned(GlobalRecord::new())
        }
        fn matches(&self, _user: &UserRecord, _inbound: &AttributeSet) -> bool {
            true
        }
        fn translation(&self) -> &TranslationMapping {
            &self.0
        }
    }

    fn config(text: &str) -> AttributeModuleConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn builtin_static_module() {
        let registry = AttributeModuleRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["static"]);

        let module = registry
            .build(&config(
                "name = \"static\"\nidp_attribute = \"mail\"\nbacking_attribute = \"email\"",
            ))
            .unwrap();
        assert!(module.get_user_data().is_empty());
    }

    #[test]
    fn unknown_module_name() {
        let registry = AttributeModuleRegistry::with_builtin();
        let err = registry.build(&config("name = \"ldap\"")).err().unwrap();
        assert!(matches!(err, AttributeError::UnknownModule(ref n) if n == "ldap"));
    }

    #[test]
    fn custom_module_registration() {
        let mut registry = AttributeModuleRegistry::new();
        registry.register("passthrough", |_| {
            let module: Arc<dyn AttributeModule> = Arc::new(Passthrough(TranslationMapping::new()));
            Ok(module)
        });

        let module = registry.build(&config("name = \"passthrough\"")).unwrap();
        assert_eq!(module.get_attributes(&AttributeSet::new()).unwrap(), AttributeSet::new());
    }
}
