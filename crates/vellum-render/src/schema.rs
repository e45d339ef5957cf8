//! Model type descriptors for build-time expression binding.
//!
//! The engine does not reflect over Rust types. Instead the caller supplies
//! an accessor table: a [`ModelSchema`] describing which members a model type
//! exposes and what shape each has. Synthesis validates every member-access
//! chain against the declared schema, so typos fail at compile time instead
//! of at the millionth render.
//!
//! Schemas are plain values with caller-controlled lifetime; there is no
//! process-wide registry.
//!
//! # Example
//!
//! ```rust
//! use vellum_render::{ModelRegistry, ModelSchema, Shape};
//!
//! let models = ModelRegistry::new().register(
//!     ModelSchema::record("Person")
//!         .field("Name", Shape::Scalar)
//!         .field("Ids", Shape::list(Shape::Scalar)),
//! );
//! assert!(models.get("Person").is_some());
//! ```

use std::collections::{BTreeMap, HashMap};

static ANY: Shape = Shape::Any;

/// The shape of a value reachable from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Unconstrained: member access and iteration defer to render time.
    Any,
    /// A leaf value (string, number, bool, null).
    Scalar,
    /// A sequence whose elements share one shape.
    List(Box<Shape>),
    /// A record with a fixed member table.
    Record(BTreeMap<String, Shape>),
}

impl Shape {
    /// Shorthand for `Shape::List`.
    pub fn list(element: Shape) -> Shape {
        Shape::List(Box::new(element))
    }

    /// Builds a record shape from `(name, shape)` pairs.
    pub fn record<'a, I>(fields: I) -> Shape
    where
        I: IntoIterator<Item = (&'a str, Shape)>,
    {
        Shape::Record(
            fields
                .into_iter()
                .map(|(name, shape)| (name.to_string(), shape))
                .collect(),
        )
    }

    /// Resolves a member access against this shape.
    ///
    /// `Any` resolves to `Any`; records resolve through their member table;
    /// scalars and lists have no members.
    pub fn member(&self, name: &str) -> Option<&Shape> {
        match self {
            Shape::Any => Some(&ANY),
            Shape::Record(members) => members.get(name),
            Shape::Scalar | Shape::List(_) => None,
        }
    }

    /// Resolves the element shape for iteration or indexing.
    pub fn element(&self) -> Option<&Shape> {
        match self {
            Shape::Any => Some(&ANY),
            Shape::List(element) => Some(element),
            Shape::Scalar | Shape::Record(_) => None,
        }
    }

    /// Whether iterating this shape could succeed.
    pub fn iterable(&self) -> bool {
        matches!(self, Shape::Any | Shape::List(_))
    }
}

/// A named model type: the unit of the `@inherits` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    name: String,
    shape: Shape,
}

impl ModelSchema {
    /// Starts a record schema; add members with [`field`](Self::field).
    pub fn record(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shape: Shape::Record(BTreeMap::new()),
        }
    }

    /// A schema that accepts any member access, deferring checks to render
    /// time. Useful for prototyping before the member table exists.
    pub fn dynamic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shape: Shape::Any,
        }
    }

    /// Adds a member to a record schema. No-op on non-record schemas.
    pub fn field(mut self, name: &str, shape: Shape) -> Self {
        if let Shape::Record(members) = &mut self.shape {
            members.insert(name.to_string(), shape);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

/// Accessor tables by model type name, consulted when a template declares
/// `@inherits Base<TypeName>`.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    schemas: HashMap<String, ModelSchema>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema under its own name, replacing any previous one.
    pub fn register(mut self, schema: ModelSchema) -> Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ModelSchema> {
        self.schemas.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> ModelSchema {
        ModelSchema::record("Person")
            .field("Name", Shape::Scalar)
            .field("Ids", Shape::list(Shape::Scalar))
            .field(
                "Address",
                Shape::record([("City", Shape::Scalar), ("Zip", Shape::Scalar)]),
            )
    }

    #[test]
    fn record_members_resolve() {
        let schema = person();
        assert_eq!(schema.shape().member("Name"), Some(&Shape::Scalar));
        assert_eq!(schema.shape().member("Missing"), None);
    }

    #[test]
    fn nested_records_resolve() {
        let schema = person();
        let address = schema.shape().member("Address").unwrap();
        assert_eq!(address.member("City"), Some(&Shape::Scalar));
        assert_eq!(address.member("Country"), None);
    }

    #[test]
    fn list_elements_resolve() {
        let schema = person();
        let ids = schema.shape().member("Ids").unwrap();
        assert!(ids.iterable());
        assert_eq!(ids.element(), Some(&Shape::Scalar));
        assert_eq!(ids.member("Name"), None);
    }

    #[test]
    fn any_defers_everything() {
        assert_eq!(Shape::Any.member("whatever"), Some(&Shape::Any));
        assert_eq!(Shape::Any.element(), Some(&Shape::Any));
        assert!(Shape::Any.iterable());
    }

    #[test]
    fn scalars_are_leaves() {
        assert_eq!(Shape::Scalar.member("x"), None);
        assert_eq!(Shape::Scalar.element(), None);
        assert!(!Shape::Scalar.iterable());
    }

    #[test]
    fn registry_lookup_by_name() {
        let models = ModelRegistry::new()
            .register(person())
            .register(ModelSchema::dynamic("Anything"));
        assert_eq!(models.len(), 2);
        assert_eq!(models.get("Person").map(ModelSchema::name), Some("Person"));
        assert!(models.get("Nobody").is_none());
    }
}
