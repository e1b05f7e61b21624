use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Policy for attributes the schema does not declare, applied only when a
/// record is constructed or `set` with an undeclared key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtraProperties {
    /// Accept and store undeclared attributes (the default).
    Allow,
    /// Silently drop undeclared attributes.
    Ignore,
    /// Fail the `set` with `AttributeError::UnknownAttribute`.
    Reject,
}

/// Declaration of a nested record attached under an attribute name. Declared
/// children and collections are materialized at construction and are never
/// part of a synchronization snapshot.
#[derive(Clone, Debug)]
pub enum ChildSpec {
    /// A single nested record. `unique` marks it to be wrapped as a
    /// `UniqueRecord` by the unique layer.
    One { schema: Arc<Schema>, unique: bool },
    /// An ordered collection of nested records.
    Many { schema: Arc<Schema> },
}

/// Static configuration shared by every record instance of one kind: which
/// attributes carry identity, which are session-only or derived, how
/// undeclared attributes are treated, and which attributes hold nested
/// records.
#[derive(Clone, Debug)]
pub struct Schema {
    /// Schema-level type, used when the type attribute is unset.
    pub record_type: String,
    pub id_attribute: String,
    pub type_attribute: String,
    pub namespace_attribute: String,
    /// Declared persisted attributes. Only consulted when `extra_properties`
    /// is not `Allow`; identity attributes are always accepted.
    pub props: HashSet<String>,
    /// Session attributes: part of sync snapshots, but flagged separately so
    /// callers can filter them out.
    pub session: HashSet<String>,
    /// Derived attributes: never part of any snapshot.
    pub derived: HashSet<String>,
    pub extra_properties: ExtraProperties,
    pub children: HashMap<String, ChildSpec>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema { record_type: String::new(),
                 id_attribute: "id".to_string(),
                 type_attribute: "type".to_string(),
                 namespace_attribute: "namespace".to_string(),
                 props: HashSet::new(),
                 session: HashSet::new(),
                 derived: HashSet::new(),
                 extra_properties: ExtraProperties::Allow,
                 children: HashMap::new() }
    }
}

impl Schema {
    pub fn new(record_type: &str) -> Self {
        Schema { record_type: record_type.to_string(),
                 ..Schema::default() }
    }

    pub fn with_props(mut self, props: &[&str]) -> Self {
        self.props.extend(props.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_session(mut self, session: &[&str]) -> Self {
        self.session.extend(session.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_derived(mut self, derived: &[&str]) -> Self {
        self.derived.extend(derived.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_extra_properties(mut self, policy: ExtraProperties) -> Self {
        self.extra_properties = policy;
        self
    }

    pub fn with_child(mut self, name: &str, schema: &Arc<Schema>, unique: bool) -> Self {
        self.children.insert(name.to_string(),
                             ChildSpec::One { schema: schema.clone(),
                                              unique });
        self
    }

    pub fn with_collection(mut self, name: &str, schema: &Arc<Schema>) -> Self {
        self.children.insert(name.to_string(), ChildSpec::Many { schema: schema.clone() });
        self
    }

    /// True when `key` names one of the three identity attributes.
    pub fn is_identity_attribute(&self, key: &str) -> bool {
        key == self.id_attribute || key == self.type_attribute || key == self.namespace_attribute
    }

    /// Whether a plain (non-child) attribute named `key` may be stored.
    pub(crate) fn accepts(&self, key: &str) -> bool {
        match self.extra_properties {
            ExtraProperties::Allow => true,
            _ => {
                self.is_identity_attribute(key)
                || self.props.contains(key)
                || self.session.contains(key)
                || self.derived.contains(key)
            },
        }
    }
}
