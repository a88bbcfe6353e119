//! Template management: creation, versioning, defaults.
//!
//! The service owns the mutation-vs-versioning duality: a template version
//! with no referencing instances is edited in place, while a referenced
//! version is never touched — a structural edit derives a new version
//! (`version + 1`) and leaves the old one resolvable so running instances
//! keep functioning.

use tracing::info;

use crate::error::{Error, Result};
use crate::store::{InstanceStore, TemplateStore};
use crate::template::{
    EntityType, Stage, TemplateDefinition, TemplateId, TransitionRule, WorkflowTemplate,
    validate_graph,
};

/// A partial update to a template.
///
/// `stages`/`transitions` are structural: applying either to a referenced
/// version derives a new version instead of editing in place. The remaining
/// fields are metadata and always edit in place.
#[derive(Debug, Clone, Default)]
pub struct TemplatePatch {
    /// Rename the template. The name keys the version chain, so a rename
    /// applies to every version of the chain.
    pub name: Option<String>,
    /// Activate or deactivate this version for new instances.
    pub is_active: Option<bool>,
    /// Replace the stage graph nodes.
    pub stages: Option<Vec<Stage>>,
    /// Replace the stage graph edges.
    pub transitions: Option<Vec<TransitionRule>>,
}

impl TemplatePatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename the template.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the active flag.
    pub fn is_active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    /// Replace the stages.
    pub fn stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Replace the transitions.
    pub fn transitions(mut self, transitions: Vec<TransitionRule>) -> Self {
        self.transitions = Some(transitions);
        self
    }

    fn is_structural(&self) -> bool {
        self.stages.is_some() || self.transitions.is_some()
    }
}

/// Template management operations.
///
/// Needs both stores: templates for the records themselves, instances for
/// the reference counts that drive the versioning decision.
#[derive(Clone)]
pub struct TemplateService<T, I> {
    templates: T,
    instances: I,
}

impl<T, I> TemplateService<T, I>
where
    T: TemplateStore,
    I: InstanceStore,
{
    /// Create a service over the given stores.
    pub fn new(templates: T, instances: I) -> Self {
        Self {
            templates,
            instances,
        }
    }

    /// Validate and persist a template.
    ///
    /// If other versions share the name, the new template continues the
    /// version sequence; otherwise it is version 1. The first version for an
    /// entity type becomes that type's default.
    pub async fn create(&self, definition: TemplateDefinition) -> Result<WorkflowTemplate> {
        let mut template = WorkflowTemplate::from_definition(definition)?;

        let existing = self.templates.versions(&template.name).await?;
        if let Some(latest) = existing.first() {
            template.version = latest.version + 1;
        }
        match self.templates.resolve_default(template.entity_type).await {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => template.is_default = true,
            Err(e) => return Err(e),
        }

        info!(
            template_id = %template.id,
            name = %template.name,
            version = template.version,
            "Template created"
        );
        self.templates.insert(template.clone()).await?;
        Ok(template)
    }

    /// Apply a patch to a template version.
    ///
    /// A rename is applied to every version of the chain, since the name is
    /// what groups versions together. For the rest of the patch: zero
    /// referencing instances, or a metadata-only patch, edits the version in
    /// place; a structural patch against a referenced version derives a new
    /// version carrying the default flag, and the old version is returned
    /// unchanged by [`get`](Self::get) forever after.
    pub async fn update(
        &self,
        id: TemplateId,
        mut patch: TemplatePatch,
    ) -> Result<WorkflowTemplate> {
        if let Some(name) = patch.name.take() {
            self.rename_chain(id, name).await?;
        }

        let loaded = self.templates.get(id).await?;
        if patch.is_active.is_none() && !patch.is_structural() {
            return Ok(loaded.record);
        }
        let references = self.instances.count_by_template(id).await?;

        if patch.is_structural() && references > 0 {
            return self.derive_new_version(loaded.record, patch).await;
        }
        self.edit_in_place(loaded.revision, loaded.record, patch).await
    }

    /// Copy a template version's graph into a fresh version-1 template under
    /// a new name. The clone is never the default and starts active.
    pub async fn clone_template(
        &self,
        id: TemplateId,
        new_name: impl Into<String>,
    ) -> Result<WorkflowTemplate> {
        let source = self.templates.get(id).await?.record;
        self.create(TemplateDefinition {
            name: new_name.into(),
            entity_type: source.entity_type,
            stages: source.stages,
            transitions: source.transitions,
        })
        .await
    }

    /// Load one template version.
    pub async fn get(&self, id: TemplateId) -> Result<WorkflowTemplate> {
        Ok(self.templates.get(id).await?.record)
    }

    /// All versions of a template name, newest first.
    pub async fn versions(&self, name: &str) -> Result<Vec<WorkflowTemplate>> {
        self.templates.versions(name).await
    }

    /// The default template version for an entity type.
    pub async fn resolve_default(&self, entity_type: EntityType) -> Result<WorkflowTemplate> {
        self.templates.resolve_default(entity_type).await
    }

    /// Make a version the sole default for its entity type.
    pub async fn set_default(&self, id: TemplateId) -> Result<WorkflowTemplate> {
        self.templates.set_default(id).await?;
        self.get(id).await
    }

    /// List templates, optionally filtered.
    pub async fn list(
        &self,
        entity_type: Option<EntityType>,
        is_active: Option<bool>,
    ) -> Result<Vec<WorkflowTemplate>> {
        self.templates.list(entity_type, is_active).await
    }

    async fn rename_chain(&self, id: TemplateId, new_name: String) -> Result<()> {
        if new_name.is_empty() {
            return Err(Error::invalid_graph("template name must not be empty"));
        }
        let current = self.templates.get(id).await?.record;
        if current.name == new_name {
            return Ok(());
        }
        if !self.templates.versions(&new_name).await?.is_empty() {
            return Err(Error::invalid_graph(format!(
                "template name {new_name:?} is already in use"
            )));
        }

        for version in self.templates.versions(&current.name).await? {
            let loaded = self.templates.get(version.id).await?;
            let mut template = loaded.record;
            template.name = new_name.clone();
            self.templates.update(loaded.revision, template).await?;
        }
        info!(
            template_id = %id,
            old_name = %current.name,
            name = %new_name,
            "Template chain renamed"
        );
        Ok(())
    }

    async fn edit_in_place(
        &self,
        revision: u64,
        mut template: WorkflowTemplate,
        patch: TemplatePatch,
    ) -> Result<WorkflowTemplate> {
        apply_patch(&mut template, patch)?;
        let updated = self.templates.update(revision, template).await?;
        info!(
            template_id = %updated.record.id,
            version = updated.record.version,
            "Template edited in place"
        );
        Ok(updated.record)
    }

    async fn derive_new_version(
        &self,
        source: WorkflowTemplate,
        patch: TemplatePatch,
    ) -> Result<WorkflowTemplate> {
        let latest = self
            .templates
            .versions(&source.name)
            .await?
            .first()
            .map(|t| t.version)
            .unwrap_or(source.version);

        let mut derived = source.clone();
        derived.id = TemplateId::generate();
        derived.version = latest + 1;
        // Inserted without the flag; the old default row still exists, and
        // only set_default may move the flag between rows.
        derived.is_default = false;
        derived.created_at = time::OffsetDateTime::now_utc();
        apply_patch(&mut derived, patch)?;

        self.templates.insert(derived.clone()).await?;
        if source.is_default {
            self.templates.set_default(derived.id).await?;
            derived.is_default = true;
        }

        info!(
            source_id = %source.id,
            template_id = %derived.id,
            version = derived.version,
            "Referenced template edited; derived new version"
        );
        Ok(derived)
    }
}

// Renames never reach here; `update` peels them off and applies them
// chain-wide before the per-version patch.
fn apply_patch(template: &mut WorkflowTemplate, patch: TemplatePatch) -> Result<()> {
    if let Some(is_active) = patch.is_active {
        template.is_active = is_active;
    }
    if let Some(stages) = patch.stages {
        template.stages = stages;
    }
    if let Some(transitions) = patch.transitions {
        template.transitions = transitions;
    }
    validate_graph(&template.stages, &template.transitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalOutcome, ApprovalPolicy};
    use crate::instance::WorkflowInstance;
    use crate::store::{InstanceStore, MemoryStore};
    use crate::template::{ApprovalConfig, Stage, TransitionRule};
    use time::OffsetDateTime;

    fn definition(name: &str) -> TemplateDefinition {
        TemplateDefinition {
            name: name.to_string(),
            entity_type: EntityType::Policy,
            stages: vec![
                Stage::normal("draft", "Draft"),
                Stage::approval(
                    "review",
                    "Review",
                    ApprovalConfig {
                        approvers: vec!["alice".to_string()],
                        policy: ApprovalPolicy::AnyOneApproves,
                    },
                ),
                Stage::terminal("published", "Published"),
            ],
            transitions: vec![
                TransitionRule::manual("draft", "review"),
                TransitionRule::on_approval("review", "published", ApprovalOutcome::Approved),
                TransitionRule::on_approval("review", "draft", ApprovalOutcome::Rejected),
            ],
        }
    }

    fn service() -> (TemplateService<MemoryStore, MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        (TemplateService::new(store.clone(), store.clone()), store)
    }

    async fn reference(store: &MemoryStore, template: &WorkflowTemplate) {
        InstanceStore::insert(
            store,
            WorkflowInstance::begin(template, "p-1", "u-1", OffsetDateTime::now_utc()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn create_validates_and_numbers_versions() {
        let (service, _) = service();
        let first = service.create(definition("policy-review")).await.unwrap();
        assert_eq!(first.version, 1);
        assert!(first.is_default);

        let second = service.create(definition("policy-review")).await.unwrap();
        assert_eq!(second.version, 2);
        assert!(!second.is_default);

        let versions = service.versions("policy-review").await.unwrap();
        assert_eq!(
            versions.iter().map(|t| t.version).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[tokio::test]
    async fn create_rejects_invalid_graph() {
        let (service, _) = service();
        let mut definition = definition("broken");
        definition.transitions.clear();
        let err = service.create(definition).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTemplateGraph { .. }));
    }

    #[tokio::test]
    async fn unreferenced_template_is_edited_in_place() {
        let (service, _) = service();
        let template = service.create(definition("policy-review")).await.unwrap();

        let mut stages = template.stages.clone();
        stages.push(Stage::normal("legal", "Legal Check"));
        let mut transitions = template.transitions.clone();
        transitions.push(TransitionRule::manual("draft", "legal"));
        transitions.push(TransitionRule::manual("legal", "review"));

        let updated = service
            .update(
                template.id,
                TemplatePatch::new().stages(stages).transitions(transitions),
            )
            .await
            .unwrap();

        assert_eq!(updated.id, template.id);
        assert_eq!(updated.version, 1);
        assert_eq!(updated.stages.len(), 4);
        assert_eq!(service.versions("policy-review").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn referenced_template_derives_new_version() {
        let (service, store) = service();
        let template = service.create(definition("policy-review")).await.unwrap();
        reference(&store, &template).await;

        let mut stages = template.stages.clone();
        stages.push(Stage::normal("legal", "Legal Check"));
        let mut transitions = template.transitions.clone();
        transitions.push(TransitionRule::manual("draft", "legal"));
        transitions.push(TransitionRule::manual("legal", "review"));

        let derived = service
            .update(
                template.id,
                TemplatePatch::new().stages(stages).transitions(transitions),
            )
            .await
            .unwrap();

        assert_ne!(derived.id, template.id);
        assert_eq!(derived.version, 2);
        assert!(derived.is_default, "default follows the new version");

        // The old version is untouched and still resolvable.
        let original = service.get(template.id).await.unwrap();
        assert_eq!(original.version, 1);
        assert_eq!(original.stages.len(), 3);
        assert!(!original.is_default);
    }

    #[tokio::test]
    async fn metadata_patch_edits_referenced_template_in_place() {
        let (service, store) = service();
        let template = service.create(definition("policy-review")).await.unwrap();
        reference(&store, &template).await;

        let updated = service
            .update(template.id, TemplatePatch::new().is_active(false))
            .await
            .unwrap();

        assert_eq!(updated.id, template.id);
        assert_eq!(updated.version, 1);
        assert!(!updated.is_active);
        assert_eq!(service.versions("policy-review").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn structural_patch_must_still_validate() {
        let (service, _) = service();
        let template = service.create(definition("policy-review")).await.unwrap();

        let err = service
            .update(template.id, TemplatePatch::new().transitions(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTemplateGraph { .. }));
    }

    #[tokio::test]
    async fn rename_moves_every_version_of_the_chain() {
        let (service, store) = service();
        let first = service.create(definition("policy-review")).await.unwrap();
        let second = service.create(definition("policy-review")).await.unwrap();
        reference(&store, &first).await;

        let renamed = service
            .update(second.id, TemplatePatch::new().name("policy-intake"))
            .await
            .unwrap();
        assert_eq!(renamed.name, "policy-intake");

        let chain = service.versions("policy-intake").await.unwrap();
        assert_eq!(
            chain.iter().map(|t| t.version).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert!(service.versions("policy-review").await.unwrap().is_empty());
        assert_eq!(service.get(first.id).await.unwrap().name, "policy-intake");
    }

    #[tokio::test]
    async fn rename_onto_an_existing_chain_is_rejected() {
        let (service, _) = service();
        let template = service.create(definition("policy-review")).await.unwrap();
        service.create(definition("policy-intake")).await.unwrap();

        let err = service
            .update(template.id, TemplatePatch::new().name("policy-intake"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTemplateGraph { .. }));
        assert_eq!(service.get(template.id).await.unwrap().name, "policy-review");
    }

    #[tokio::test]
    async fn clone_starts_a_fresh_version_line() {
        let (service, _) = service();
        let template = service.create(definition("policy-review")).await.unwrap();

        let clone = service
            .clone_template(template.id, "campaign-review")
            .await
            .unwrap();

        assert_ne!(clone.id, template.id);
        assert_eq!(clone.name, "campaign-review");
        assert_eq!(clone.version, 1);
        assert_eq!(clone.stages, template.stages);
        assert!(!clone.is_default, "original keeps the default flag");
    }

    #[tokio::test]
    async fn set_default_moves_the_flag() {
        let (service, _) = service();
        let first = service.create(definition("policy-review")).await.unwrap();
        let second = service.create(definition("policy-review")).await.unwrap();
        assert!(first.is_default);

        let promoted = service.set_default(second.id).await.unwrap();
        assert!(promoted.is_default);
        assert!(!service.get(first.id).await.unwrap().is_default);
        assert_eq!(
            service.resolve_default(EntityType::Policy).await.unwrap().id,
            second.id
        );
    }

    #[tokio::test]
    async fn list_filters_by_entity_type_and_active() {
        let (service, _) = service();
        let template = service.create(definition("policy-review")).await.unwrap();
        service
            .update(template.id, TemplatePatch::new().is_active(false))
            .await
            .unwrap();

        let active = service.list(Some(EntityType::Policy), Some(true)).await.unwrap();
        assert!(active.is_empty());
        let inactive = service.list(Some(EntityType::Policy), Some(false)).await.unwrap();
        assert_eq!(inactive.len(), 1);
        let cases = service.list(Some(EntityType::Case), None).await.unwrap();
        assert!(cases.is_empty());
    }
}
