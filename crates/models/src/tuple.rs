use crate::error::{ModelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A typed object reference, rendered as `type:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let (object_type, object_id) = s
            .split_once(':')
            .ok_or_else(|| ModelError::InvalidTupleKey(format!("missing ':' in object '{}'", s)))?;
        if object_type.is_empty() || object_id.is_empty() {
            return Err(ModelError::InvalidTupleKey(format!(
                "empty object type or id in '{}'",
                s
            )));
        }
        Ok(Self::new(object_type, object_id))
    }
}

/// The user side of a tuple: a concrete subject `type:id`, a userset
/// reference `type:id#relation`, or a typed wildcard `type:*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRef {
    Object(ObjectRef),
    Userset { object: ObjectRef, relation: String },
    Wildcard { object_type: String },
}

impl UserRef {
    pub fn object(object_type: &str, object_id: &str) -> Self {
        Self::Object(ObjectRef::new(object_type, object_id))
    }

    pub fn userset(object_type: &str, object_id: &str, relation: &str) -> Self {
        Self::Userset {
            object: ObjectRef::new(object_type, object_id),
            relation: relation.to_string(),
        }
    }

    pub fn wildcard(object_type: &str) -> Self {
        Self::Wildcard {
            object_type: object_type.to_string(),
        }
    }

    /// The type component, whichever form the reference takes.
    pub fn object_type(&self) -> &str {
        match self {
            Self::Object(o) => &o.object_type,
            Self::Userset { object, .. } => &object.object_type,
            Self::Wildcard { object_type } => object_type,
        }
    }

    /// True for a concrete `type:id` subject.
    pub fn is_subject(&self) -> bool {
        matches!(self, Self::Object(_))
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(o) => write!(f, "{}", o),
            Self::Userset { object, relation } => write!(f, "{}#{}", object, relation),
            Self::Wildcard { object_type } => write!(f, "{}:*", object_type),
        }
    }
}

impl FromStr for UserRef {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some((object, relation)) = s.split_once('#') {
            if relation.is_empty() {
                return Err(ModelError::InvalidTupleKey(format!(
                    "empty userset relation in '{}'",
                    s
                )));
            }
            return Ok(Self::Userset {
                object: object.parse()?,
                relation: relation.to_string(),
            });
        }
        let object: ObjectRef = s.parse()?;
        if object.object_id == "*" {
            return Ok(Self::Wildcard {
                object_type: object.object_type,
            });
        }
        Ok(Self::Object(object))
    }
}

/// A relationship triple, rendered as `object#relation@user`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    pub object: ObjectRef,
    pub relation: String,
    pub user: UserRef,
}

impl TupleKey {
    pub fn new(object: ObjectRef, relation: &str, user: UserRef) -> Self {
        Self {
            object,
            relation: relation.to_string(),
            user,
        }
    }

    /// Parse from the `type:id`, relation-name, user-string triple.
    pub fn parse(object: &str, relation: &str, user: &str) -> Result<Self> {
        if relation.is_empty() {
            return Err(ModelError::InvalidTupleKey("empty relation".to_string()));
        }
        Ok(Self {
            object: object.parse()?,
            relation: relation.to_string(),
            user: user.parse()?,
        })
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// A tuple as returned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTuple {
    pub key: TupleKey,
    pub timestamp: DateTime<Utc>,
}

impl StoredTuple {
    pub fn new(key: TupleKey) -> Self {
        Self {
            key,
            timestamp: Utc::now(),
        }
    }
}
