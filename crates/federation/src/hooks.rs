//! Reference attribute hooks: schema injection and default values

use catalog_core::{AttributeDescriptor, AttributeInjector, DefaultAttributeValues, Item};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Extends item schemas with extra descriptors, globally or per item type
#[derive(Debug, Clone, Default)]
pub struct InjectedAttributes {
    global: Vec<AttributeDescriptor>,
    by_type: HashMap<String, Vec<AttributeDescriptor>>,
}

impl InjectedAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, descriptor: AttributeDescriptor) -> Self {
        self.global.push(descriptor);
        self
    }

    pub fn for_type(mut self, item_type: impl Into<String>, descriptor: AttributeDescriptor) -> Self {
        self.by_type.entry(item_type.into()).or_default().push(descriptor);
        self
    }
}

impl AttributeInjector for InjectedAttributes {
    fn inject(&self, mut item: Item) -> Item {
        let typed = self.by_type.get(&item.item_type.name).into_iter().flatten();
        let extra: Vec<AttributeDescriptor> = self.global.iter().chain(typed).cloned().collect();
        if !extra.is_empty() {
            item.item_type = item.item_type.extended(extra);
        }
        item
    }
}

/// Default attribute values, per item type then global
#[derive(Debug, Clone, Default)]
pub struct DefaultValueRegistry {
    global: BTreeMap<String, Value>,
    by_type: HashMap<String, BTreeMap<String, Value>>,
}

impl DefaultValueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.global.insert(attribute.into(), value.into());
        self
    }

    pub fn for_type(mut self, item_type: impl Into<String>, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.by_type
            .entry(item_type.into())
            .or_default()
            .insert(attribute.into(), value.into());
        self
    }
}

impl DefaultAttributeValues for DefaultValueRegistry {
    fn defaults_for(&self, item_type: &str) -> Vec<(String, Value)> {
        let typed = self.by_type.get(item_type);
        let mut defaults: Vec<(String, Value)> = typed
            .map(|values| values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        for (attribute, value) in &self.global {
            if !typed.is_some_and(|values| values.contains_key(attribute)) {
                defaults.push((attribute.clone(), value.clone()));
            }
        }
        defaults
    }
}

/// Fill attributes the item leaves unset; present values are never replaced
pub fn apply_defaults(mut item: Item, providers: &[Arc<dyn DefaultAttributeValues>]) -> Item {
    for provider in providers {
        for (attribute, value) in provider.defaults_for(&item.item_type.name) {
            if !item.has(&attribute) {
                item.set(attribute, value);
            }
        }
    }
    item
}

pub fn apply_injection(mut item: Item, injectors: &[Arc<dyn AttributeInjector>]) -> Item {
    for injector in injectors {
        item = injector.inject(item);
    }
    item
}
