use crate::error::{ModelError, Result};
use crate::schema::{AuthorizationModel, RelationReference, Rewrite, TypeDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only lookup over one authorization model. Cheap to clone and safe
/// to share across concurrent checks.
#[derive(Debug, Clone)]
pub struct TypeSystem {
    model: Arc<AuthorizationModel>,
    types: HashMap<String, usize>,
}

impl TypeSystem {
    pub fn new(model: Arc<AuthorizationModel>) -> Self {
        let types = model
            .type_definitions
            .iter()
            .enumerate()
            .map(|(idx, td)| (td.type_name.clone(), idx))
            .collect();
        Self { model, types }
    }

    pub fn model_id(&self) -> &str {
        &self.model.id
    }

    pub fn type_definition(&self, type_name: &str) -> Result<&TypeDefinition> {
        self.types
            .get(type_name)
            .map(|idx| &self.model.type_definitions[*idx])
            .ok_or_else(|| ModelError::TypeNotFound(type_name.to_string()))
    }

    /// The rewrite expression declared for `type_name#relation`.
    pub fn rewrite(&self, type_name: &str, relation: &str) -> Result<&Rewrite> {
        let type_def = self.type_definition(type_name)?;
        type_def
            .relations
            .get(relation)
            .ok_or_else(|| ModelError::RelationNotFound(format!("{}#{}", type_name, relation)))
    }

    /// The user types that may be directly assigned to
    /// `type_name#relation`. Empty when the model declares no metadata for
    /// the relation.
    pub fn directly_related_user_types(
        &self,
        type_name: &str,
        relation: &str,
    ) -> Result<&[RelationReference]> {
        // The relation must exist even when metadata is absent.
        self.rewrite(type_name, relation)?;

        let type_def = self.type_definition(type_name)?;
        Ok(type_def
            .metadata
            .as_ref()
            .and_then(|m| m.relations.get(relation))
            .map(|rm| rm.directly_related_user_types.as_slice())
            .unwrap_or(&[]))
    }
}
