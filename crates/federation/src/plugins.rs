//! Built-in policy and access plugins

use crate::pipeline::{read_item_policy, read_operation_policy};
use crate::security;
use async_trait::async_trait;
use catalog_core::{
    attributes, AccessPlugin, Item, PluginError, PluginResult, PolicyPlugin, PolicyResponse, Request,
    SecurityAttributes,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Key under which an item's policy is recorded: its id, or `#<index>` in payload order
pub fn policy_key(item: &Item, index: usize) -> String {
    if item.id.is_empty() {
        format!("#{}", index)
    } else {
        item.id.clone()
    }
}

/// Publishes each payload item's `security.access` markings as an item-level
/// requirement on the subject attribute of the same name
#[derive(Debug, Clone)]
pub struct SecurityMarkingPolicyPlugin {
    marking_attribute: String,
    subject_attribute: String,
}

impl SecurityMarkingPolicyPlugin {
    pub fn new() -> Self {
        Self {
            marking_attribute: attributes::SECURITY_ACCESS.to_string(),
            subject_attribute: attributes::SECURITY_ACCESS.to_string(),
        }
    }

    pub fn requiring(mut self, subject_attribute: impl Into<String>) -> Self {
        self.subject_attribute = subject_attribute.into();
        self
    }
}

impl Default for SecurityMarkingPolicyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyPlugin for SecurityMarkingPolicyPlugin {
    fn name(&self) -> &str {
        "security-marking-policy"
    }

    async fn process(&self, request: &Request) -> PluginResult<PolicyResponse> {
        let mut response = PolicyResponse::default();
        for (index, item) in request.payload_items().into_iter().enumerate() {
            let markings = item.string_values(&self.marking_attribute);
            if markings.is_empty() {
                continue;
            }
            let required: SecurityAttributes = HashMap::from([(self.subject_attribute.clone(), markings)]);
            response.items.insert(policy_key(item, index), required);
        }
        Ok(response)
    }
}

/// Enforces what policy plugins attached.
///
/// The operation-level requirement must be met or the request stops. Payload
/// items (or delete ids) whose item-level requirement is not met are dropped.
#[derive(Debug, Clone, Default)]
pub struct OperationPolicyAccessPlugin;

impl OperationPolicyAccessPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AccessPlugin for OperationPolicyAccessPlugin {
    fn name(&self) -> &str {
        "operation-policy-access"
    }

    async fn process(&self, mut request: Request) -> PluginResult<Request> {
        let context = request.context();
        let subject = context.subject.clone();

        let operation = read_operation_policy(context);
        if let Err(denial) = security::check(subject.as_ref(), &operation) {
            info!("{} refused by operation policy: {}", request.kind(), denial);
            return Err(PluginError::StopProcessing(format!(
                "subject may not perform {}: {}",
                request.kind(),
                denial
            )));
        }

        let item_policy = read_item_policy(context);
        if item_policy.is_empty() {
            return Ok(request);
        }
        let refused: BTreeSet<String> = item_policy
            .iter()
            .filter(|(_, required)| !security::permits(subject.as_ref(), required))
            .map(|(key, _)| key.clone())
            .collect();
        if refused.is_empty() {
            return Ok(request);
        }
        debug!("Dropping {} payload entries refused by item policy", refused.len());

        match &mut request {
            Request::Create(create) => {
                let item_count = create.items.len();
                create.items = retain_indexed(std::mem::take(&mut create.items), 0, &refused, |i| i);
                create.content = retain_indexed(std::mem::take(&mut create.content), item_count, &refused, |c| &c.item);
            }
            Request::Update(update) => {
                let update_count = update.updates.len();
                update.updates = retain_indexed(std::mem::take(&mut update.updates), 0, &refused, |u| &u.item);
                update.content =
                    retain_indexed(std::mem::take(&mut update.content), update_count, &refused, |c| &c.item);
            }
            Request::Delete(delete) => delete.ids.retain(|id| !refused.contains(id)),
            _ => {}
        }
        Ok(request)
    }
}

/// Keep entries whose policy key was not refused; `offset` is the payload index of the first entry
fn retain_indexed<T, F>(entries: Vec<T>, offset: usize, refused: &BTreeSet<String>, item_of: F) -> Vec<T>
where
    F: Fn(&T) -> &Item,
{
    entries
        .into_iter()
        .enumerate()
        .filter(|(index, entry)| !refused.contains(&policy_key(item_of(entry), offset + index)))
        .map(|(_, entry)| entry)
        .collect()
}
