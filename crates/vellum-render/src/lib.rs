//! # Vellum Render - Template Compilation and Rendering Engine
//!
//! `vellum-render` turns Vellum `@` template markup into immutable compiled
//! units that can be rendered against any number of model instances. The
//! economics are deliberate: compile once, render a million times. All
//! structural and binding validation happens at compile time; a render
//! touches only the step tree and the model it was handed.
//!
//! ## Core Concepts
//!
//! - [`compile`]: Full pipeline from source to a [`CompiledTemplate`]
//! - [`CompiledTemplate`]: Immutable, `Send + Sync` rendering unit
//! - [`ModelSchema`] / [`ModelRegistry`]: Accessor tables for `@inherits` types
//! - [`TemplateCache`]: Concurrent store with at-most-one build per template
//! - [`CompileError`] / [`EvalError`]: Build-time vs render-time failures
//!
//! ## Quick Start
//!
//! ```rust
//! use serde::Serialize;
//! use vellum_render::{compile, ModelRegistry, ModelSchema, Shape};
//!
//! #[derive(Serialize)]
//! struct Person {
//!     #[serde(rename = "Name")]
//!     name: String,
//!     #[serde(rename = "Ids")]
//!     ids: Vec<u32>,
//! }
//!
//! let models = ModelRegistry::new().register(
//!     ModelSchema::record("Person")
//!         .field("Name", Shape::Scalar)
//!         .field("Ids", Shape::list(Shape::Scalar)),
//! );
//!
//! let unit = compile(
//!     "@inherits TemplateBase<Person>\nHello @Model.Name, welcome to Vellum World!",
//!     &models,
//! ).unwrap();
//!
//! let person = Person { name: "Cats".into(), ids: vec![] };
//! assert_eq!(
//!     unit.render(&person).unwrap(),
//!     "Hello Cats, welcome to Vellum World!",
//! );
//! ```
//!
//! ## Control Flow
//!
//! `@foreach` and `@if` blocks replay their bodies per element or on a truthy
//! condition; loop variables shadow outer names within their block:
//!
//! ```rust
//! use vellum_render::{compile, ModelRegistry};
//!
//! let unit = compile("@foreach (i in [1,2,3,4]) { @i }", &ModelRegistry::new()).unwrap();
//! assert_eq!(unit.render(&serde_json::json!(null)).unwrap(), "1234");
//! ```
//!
//! ## Caching
//!
//! [`TemplateCache`] keys units by a content fingerprint plus the declared
//! model type. Concurrent first requests for one template coalesce into a
//! single build; every caller shares the resulting `Arc`:
//!
//! ```rust
//! use vellum_render::{ModelRegistry, TemplateCache};
//! use serde_json::json;
//!
//! let cache = TemplateCache::new(ModelRegistry::new());
//! let out = cache.render("Hi @Model.Who", &json!({ "Who": "there" })).unwrap();
//! assert_eq!(out, "Hi there");
//! ```

mod cache;
mod compile;
mod error;
mod expr;
mod program;
mod schema;

pub use cache::{CacheKey, TemplateCache};
pub use compile::{compile, synthesize, CompiledTemplate, MODEL_ROOT};
pub use error::{CompileError, EvalError, TemplateError};
pub use expr::{Expr, PathStep};
pub use program::{Op, Program};
pub use schema::{ModelRegistry, ModelSchema, Shape};

// Parser surface re-exported so downstream callers need only this crate.
pub use vellum_parser::{
    parse, resolve_directives, scan_model_type, ControlKind, DirectiveError, DirectiveKind,
    ModelBinding, Segment, SyntaxError,
};
