//! Authorization model types, wire-compatible with the OpenFGA JSON shape
//! (`computedUserset`, `tupleToUserset`, `union { child: [...] }`, ...).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An immutable, versioned authorization model for one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationModel {
    pub id: String,
    pub schema_version: String,
    #[serde(default)]
    pub type_definitions: Vec<TypeDefinition>,
}

/// Defines an object type and how each of its relations is computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub relations: HashMap<String, Rewrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TypeMetadata>,
}

/// A relation name on a related object, used by `tupleToUserset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
    pub relation: String,
}

impl RelationRef {
    pub fn new(relation: &str) -> Self {
        Self {
            relation: relation.to_string(),
        }
    }
}

/// How a relation is rewritten into tuples and other relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rewrite {
    /// Direct assignment via stored tuples.
    This {},
    /// Whoever has another relation on the same object.
    ComputedUserset { relation: String },
    /// For each object reached via the tupleset relation, whoever has the
    /// computed relation on that object.
    #[serde(rename_all = "camelCase")]
    TupleToUserset {
        tupleset: RelationRef,
        computed_userset: RelationRef,
    },
    Union { child: Vec<Rewrite> },
    Intersection { child: Vec<Rewrite> },
    Difference { base: Box<Rewrite>, subtract: Box<Rewrite> },
}

impl Rewrite {
    pub fn computed(relation: &str) -> Self {
        Self::ComputedUserset {
            relation: relation.to_string(),
        }
    }

    pub fn tuple_to_userset(tupleset: &str, computed: &str) -> Self {
        Self::TupleToUserset {
            tupleset: RelationRef::new(tupleset),
            computed_userset: RelationRef::new(computed),
        }
    }

    pub fn union(child: Vec<Rewrite>) -> Self {
        Self::Union { child }
    }

    pub fn intersection(child: Vec<Rewrite>) -> Self {
        Self::Intersection { child }
    }

    pub fn difference(base: Rewrite, subtract: Rewrite) -> Self {
        Self::Difference {
            base: Box::new(base),
            subtract: Box::new(subtract),
        }
    }

    fn to_dsl(&self) -> String {
        match self {
            Self::This {} => "[...]".to_string(),
            Self::ComputedUserset { relation } => relation.clone(),
            Self::TupleToUserset {
                tupleset,
                computed_userset,
            } => format!("{} from {}", computed_userset.relation, tupleset.relation),
            Self::Union { child } => child
                .iter()
                .map(Rewrite::to_dsl)
                .collect::<Vec<_>>()
                .join(" or "),
            Self::Intersection { child } => child
                .iter()
                .map(Rewrite::to_dsl)
                .collect::<Vec<_>>()
                .join(" and "),
            Self::Difference { base, subtract } => {
                format!("{} but not {}", base.to_dsl(), subtract.to_dsl())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMetadata {
    #[serde(default)]
    pub relations: HashMap<String, RelationMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMetadata {
    #[serde(default)]
    pub directly_related_user_types: Vec<RelationReference>,
}

/// A directly-related user type: a concrete `type`, a userset
/// `type#relation`, or a typed wildcard `type:*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReference {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Present (as `{}`) when the reference is the typed wildcard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<serde_json::Value>,
}

impl RelationReference {
    pub fn direct(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relation: None,
            wildcard: None,
        }
    }

    pub fn userset(type_name: &str, relation: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relation: Some(relation.to_string()),
            wildcard: None,
        }
    }

    pub fn wildcard(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relation: None,
            wildcard: Some(serde_json::json!({})),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard.is_some()
    }
}

impl AuthorizationModel {
    /// Render the model in the human-readable DSL form, for logs and
    /// debugging output.
    pub fn to_dsl(&self) -> String {
        let mut dsl = String::new();
        dsl.push_str(&format!("model\n  schema {}\n\n", self.schema_version));

        for type_def in &self.type_definitions {
            dsl.push_str(&format!("type {}\n", type_def.type_name));
            if type_def.relations.is_empty() {
                dsl.push('\n');
                continue;
            }
            dsl.push_str("  relations\n");

            let mut names: Vec<_> = type_def.relations.keys().collect();
            names.sort();
            for name in names {
                dsl.push_str(&format!(
                    "    define {}: {}\n",
                    name,
                    type_def.relations[name].to_dsl()
                ));
            }
            dsl.push('\n');
        }

        dsl
    }
}
