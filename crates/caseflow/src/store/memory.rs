//! In-memory store for tests and examples.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::instance::{InstanceId, WorkflowInstance};
use crate::template::{EntityType, TemplateId, WorkflowTemplate};

use super::{InstanceFilter, InstanceStore, Page, TemplateStore, Versioned};

#[derive(Default)]
struct Inner {
    templates: HashMap<TemplateId, (u64, WorkflowTemplate)>,
    instances: HashMap<InstanceId, (u64, WorkflowInstance)>,
}

/// In-process storage with the same revision/CAS semantics as a production
/// backend.
///
/// All operations take the whole-store lock briefly; the compare-and-swap
/// granularity callers observe is still per record, matching [`PgStore`]'s
/// row-level behavior.
///
/// Cloning is cheap and shares the underlying data.
///
/// [`PgStore`]: super::PgStore
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryStore {
    async fn insert(&self, template: WorkflowTemplate) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.templates.insert(template.id, (1, template));
        Ok(())
    }

    async fn get(&self, id: TemplateId) -> Result<Versioned<WorkflowTemplate>> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .templates
            .get(&id)
            .map(|(revision, template)| Versioned {
                revision: *revision,
                record: template.clone(),
            })
            .ok_or_else(|| Error::template_not_found(id))
    }

    async fn update(
        &self,
        expected_revision: u64,
        template: WorkflowTemplate,
    ) -> Result<Versioned<WorkflowTemplate>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let id = template.id;
        let Some((revision, stored)) = inner.templates.get_mut(&id) else {
            return Err(Error::template_not_found(id));
        };
        if *revision != expected_revision {
            return Err(Error::ConcurrentModification { id: id.to_string() });
        }
        *revision += 1;
        *stored = template.clone();
        Ok(Versioned {
            revision: *revision,
            record: template,
        })
    }

    async fn versions(&self, name: &str) -> Result<Vec<WorkflowTemplate>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut versions: Vec<WorkflowTemplate> = inner
            .templates
            .values()
            .map(|(_, template)| template)
            .filter(|template| template.name == name)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn resolve_default(&self, entity_type: EntityType) -> Result<WorkflowTemplate> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .templates
            .values()
            .map(|(_, template)| template)
            .find(|template| template.entity_type == entity_type && template.is_default)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "template",
                id: format!("default for {entity_type}"),
            })
    }

    async fn set_default(&self, id: TemplateId) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let Some((_, target)) = inner.templates.get(&id) else {
            return Err(Error::template_not_found(id));
        };
        let entity_type = target.entity_type;
        for (revision, template) in inner.templates.values_mut() {
            if template.entity_type != entity_type {
                continue;
            }
            let make_default = template.id == id;
            if template.is_default != make_default {
                template.is_default = make_default;
                *revision += 1;
            }
        }
        Ok(())
    }

    async fn list(
        &self,
        entity_type: Option<EntityType>,
        is_active: Option<bool>,
    ) -> Result<Vec<WorkflowTemplate>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut templates: Vec<WorkflowTemplate> = inner
            .templates
            .values()
            .map(|(_, template)| template)
            .filter(|template| entity_type.is_none_or(|t| template.entity_type == t))
            .filter(|template| is_active.is_none_or(|a| template.is_active == a))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name).then(b.version.cmp(&a.version)));
        Ok(templates)
    }
}

impl InstanceStore for MemoryStore {
    async fn insert(&self, instance: WorkflowInstance) -> Result<Versioned<WorkflowInstance>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let duplicate = inner.instances.values().any(|(_, existing)| {
            existing.entity_type == instance.entity_type
                && existing.entity_id == instance.entity_id
                && !existing.status.is_terminal()
        });
        if duplicate {
            return Err(Error::DuplicateActiveInstance {
                entity_type: instance.entity_type,
                entity_id: instance.entity_id.clone(),
            });
        }
        inner.instances.insert(instance.id, (1, instance.clone()));
        Ok(Versioned {
            revision: 1,
            record: instance,
        })
    }

    async fn get(&self, id: InstanceId) -> Result<Versioned<WorkflowInstance>> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .instances
            .get(&id)
            .map(|(revision, instance)| Versioned {
                revision: *revision,
                record: instance.clone(),
            })
            .ok_or_else(|| Error::instance_not_found(id))
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Versioned<WorkflowInstance>>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .instances
            .values()
            .find(|(_, instance)| {
                instance.entity_type == entity_type
                    && instance.entity_id == entity_id
                    && !instance.status.is_terminal()
            })
            .map(|(revision, instance)| Versioned {
                revision: *revision,
                record: instance.clone(),
            }))
    }

    async fn update(
        &self,
        expected_revision: u64,
        instance: WorkflowInstance,
    ) -> Result<Versioned<WorkflowInstance>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let id = instance.id;
        let Some((revision, stored)) = inner.instances.get_mut(&id) else {
            return Err(Error::instance_not_found(id));
        };
        if *revision != expected_revision {
            return Err(Error::ConcurrentModification { id: id.to_string() });
        }
        *revision += 1;
        *stored = instance.clone();
        Ok(Versioned {
            revision: *revision,
            record: instance,
        })
    }

    async fn list(&self, filter: &InstanceFilter, page: Page) -> Result<Vec<WorkflowInstance>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut instances: Vec<WorkflowInstance> = inner
            .instances
            .values()
            .map(|(_, instance)| instance)
            .filter(|instance| filter.matches(instance))
            .cloned()
            .collect();
        instances.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(instances
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn count_by_template(&self, template_id: TemplateId) -> Result<u64> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .instances
            .values()
            .filter(|(_, instance)| instance.template_id == template_id)
            .count() as u64)
    }
}
