//! Unit synthesis and render execution.
//!
//! [`compile`] runs the whole pipeline: segment parsing, directive
//! resolution, program building, and synthesis. [`synthesize`] binds each
//! embedded expression to the declared model schema and produces a
//! [`CompiledTemplate`]: an immutable step tree that can be replayed against
//! any number of model instances, concurrently, with no per-render state on
//! the unit itself.
//!
//! Binding is eager. Against a typed schema every member-access chain is
//! resolved at synthesis time, so a misspelled member fails `compile` with
//! a [`CompileError::Binding`] naming the identifier, never a render a
//! million calls later.

use serde::Serialize;
use serde_json::Value;
use vellum_parser::ModelBinding;

use crate::error::{CompileError, EvalError};
use crate::expr::{Expr, PathStep};
use crate::program::{Op, Program};
use crate::schema::{ModelRegistry, Shape};

/// The implicit root identifier bound to the model instance.
pub const MODEL_ROOT: &str = "Model";

/// Compiles template source into a reusable rendering unit.
///
/// Equivalent to parse → resolve directives → build program → synthesize.
/// All structural and binding errors surface here, eagerly.
///
/// # Errors
///
/// [`CompileError`] for malformed markup, duplicate directives, unbalanced
/// blocks, malformed expressions, or identifiers that do not resolve against
/// the declared model schema.
pub fn compile(source: &str, models: &ModelRegistry) -> Result<CompiledTemplate, CompileError> {
    let segments = vellum_parser::parse(source)?;
    let (binding, segments) = vellum_parser::resolve_directives(segments)?;
    let program = Program::build(&segments)?;
    synthesize(&program, &binding, models)
}

/// Binds a program's expressions to a model schema and produces the unit.
///
/// The loop variable of each `@foreach` shadows outer bindings (and the
/// model root) within its block, with the element shape taken from the
/// iterable's schema.
pub fn synthesize(
    program: &Program,
    binding: &ModelBinding,
    models: &ModelRegistry,
) -> Result<CompiledTemplate, CompileError> {
    let (model_type, model_shape) = match binding {
        ModelBinding::Dynamic => (None, Shape::Any),
        ModelBinding::Named { type_name, offset } => {
            let schema = models.get(type_name).ok_or_else(|| CompileError::Binding {
                name: type_name.clone(),
                offset: *offset,
                detail: "no schema registered for the declared model type".to_string(),
            })?;
            (Some(type_name.clone()), schema.shape().clone())
        }
    };

    let mut binder = Binder {
        model_shape: &model_shape,
        scope: Vec::new(),
    };
    let mut current: Vec<Step> = Vec::new();
    let mut stack: Vec<(Pending, Vec<Step>)> = Vec::new();

    for op in program.ops() {
        match op {
            Op::AppendLiteral(text) => current.push(Step::Literal(text.clone())),
            Op::AppendEvaluated { source, offset } => {
                let (bound, _) = binder.bind(source, *offset)?;
                current.push(Step::Emit(bound));
            }
            Op::LoopBegin {
                iterable,
                iterable_offset,
                var,
            } => {
                let (bound, shape) = binder.bind(iterable, *iterable_offset)?;
                if !shape.iterable() {
                    return Err(CompileError::Binding {
                        name: iterable.clone(),
                        offset: *iterable_offset,
                        detail: "not iterable against the declared model".to_string(),
                    });
                }
                let element = shape.element().cloned().unwrap_or(Shape::Any);
                binder.scope.push((var.clone(), element));
                stack.push((
                    Pending::Loop {
                        iterable: bound,
                        var: var.clone(),
                    },
                    std::mem::take(&mut current),
                ));
            }
            Op::LoopEnd => match stack.pop() {
                Some((Pending::Loop { iterable, var }, outer)) => {
                    binder.scope.pop();
                    let body = std::mem::replace(&mut current, outer);
                    current.push(Step::Loop {
                        iterable,
                        var,
                        body,
                    });
                }
                _ => return Err(internal_imbalance()),
            },
            Op::IfBegin {
                condition,
                condition_offset,
            } => {
                let (bound, _) = binder.bind(condition, *condition_offset)?;
                stack.push((Pending::If { condition: bound }, std::mem::take(&mut current)));
            }
            Op::IfEnd => match stack.pop() {
                Some((Pending::If { condition }, outer)) => {
                    let body = std::mem::replace(&mut current, outer);
                    current.push(Step::If { condition, body });
                }
                _ => return Err(internal_imbalance()),
            },
        }
    }

    if !stack.is_empty() {
        return Err(internal_imbalance());
    }

    Ok(CompiledTemplate {
        steps: current,
        model_type,
    })
}

// Program::build rejects unbalanced streams, so these arms are defensive
// against hand-built programs only.
fn internal_imbalance() -> CompileError {
    CompileError::UnbalancedControl {
        offset: 0,
        detail: "program block structure is inconsistent".to_string(),
    }
}

/// A control block opened but not yet closed during synthesis.
enum Pending {
    Loop { iterable: BoundExpr, var: String },
    If { condition: BoundExpr },
}

/// Build-time expression binding against the schema in scope.
struct Binder<'a> {
    model_shape: &'a Shape,
    /// Loop variables, innermost last. Shadows outer names and the model root.
    scope: Vec<(String, Shape)>,
}

impl Binder<'_> {
    fn bind(&self, source: &str, offset: usize) -> Result<(BoundExpr, Shape), CompileError> {
        let expr = Expr::parse(source, offset)?;
        let shape = match &expr {
            Expr::List(_) => Shape::list(Shape::Scalar),
            Expr::Path { root, steps } => {
                let mut shape = self.root_shape(root).ok_or_else(|| CompileError::Binding {
                    name: root.clone(),
                    offset,
                    detail: "not the model root or a loop variable in scope".to_string(),
                })?;
                for step in steps {
                    shape = match step {
                        PathStep::Member(name) => {
                            shape.member(name).ok_or_else(|| CompileError::Binding {
                                name: name.clone(),
                                offset,
                                detail: format!("not a member reachable along `{source}`"),
                            })?
                        }
                        PathStep::Index(index) => {
                            shape.element().ok_or_else(|| CompileError::Binding {
                                name: source.to_string(),
                                offset,
                                detail: format!("`[{index}]` indexes a non-sequence"),
                            })?
                        }
                    };
                }
                shape.clone()
            }
        };
        Ok((
            BoundExpr {
                expr,
                source: source.to_string(),
                offset,
            },
            shape,
        ))
    }

    fn root_shape(&self, root: &str) -> Option<&Shape> {
        for (name, shape) in self.scope.iter().rev() {
            if name == root {
                return Some(shape);
            }
        }
        (root == MODEL_ROOT).then_some(self.model_shape)
    }
}

/// One node of the replayable step tree.
#[derive(Debug, Clone)]
enum Step {
    Literal(String),
    Emit(BoundExpr),
    Loop {
        iterable: BoundExpr,
        var: String,
        body: Vec<Step>,
    },
    If {
        condition: BoundExpr,
        body: Vec<Step>,
    },
}

/// An expression with its source text and offset kept for error reporting.
#[derive(Debug, Clone)]
struct BoundExpr {
    expr: Expr,
    source: String,
    offset: usize,
}

impl BoundExpr {
    fn traversal(&self, detail: impl Into<String>) -> EvalError {
        EvalError::Traversal {
            expr: self.source.clone(),
            offset: self.offset,
            detail: detail.into(),
        }
    }
}

/// An immutable, reusable rendering unit.
///
/// Holds the bound step tree and nothing else: no buffers, no locks, no
/// per-render state. Any number of threads may call
/// [`render`](Self::render) on the same unit simultaneously.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    steps: Vec<Step>,
    model_type: Option<String>,
}

impl CompiledTemplate {
    /// The model type declared by `@inherits`, if any.
    pub fn model_type(&self) -> Option<&str> {
        self.model_type.as_deref()
    }

    /// Renders the unit against one model instance.
    ///
    /// The model is serialized once; member-access chains resolve against the
    /// serialized value. Output is accumulated in a fresh buffer owned by
    /// this call. On error the partial buffer is discarded, never returned.
    ///
    /// # Errors
    ///
    /// [`EvalError`] when the model fails to serialize, a chain traverses
    /// through a missing or null value, or a `@foreach` iterable is not a
    /// sequence for this instance.
    pub fn render<T: Serialize + ?Sized>(&self, model: &T) -> Result<String, EvalError> {
        let value =
            serde_json::to_value(model).map_err(|err| EvalError::Serialize(err.to_string()))?;
        self.render_value(&value)
    }

    /// Renders against an already-serialized model value.
    pub fn render_value(&self, model: &Value) -> Result<String, EvalError> {
        let mut out = String::new();
        let mut vars: Vec<(&str, &Value)> = Vec::new();
        replay(&self.steps, model, &mut vars, &mut out)?;
        Ok(out)
    }
}

fn replay<'a>(
    steps: &'a [Step],
    model: &'a Value,
    vars: &mut Vec<(&'a str, &'a Value)>,
    out: &mut String,
) -> Result<(), EvalError> {
    for step in steps {
        match step {
            Step::Literal(text) => out.push_str(text),
            Step::Emit(expr) => match resolve(expr, model, vars.as_slice())? {
                Some(value) => append_value(out, value),
                None => return Err(expr.traversal("missing member")),
            },
            Step::Loop {
                iterable,
                var,
                body,
            } => {
                let items: &'a [Value] = match &iterable.expr {
                    Expr::List(items) => items,
                    Expr::Path { .. } => match resolve(iterable, model, vars.as_slice())? {
                        Some(Value::Array(items)) => items,
                        Some(_) | None => {
                            return Err(EvalError::NotIterable {
                                expr: iterable.source.clone(),
                                offset: iterable.offset,
                            })
                        }
                    },
                };
                for item in items {
                    vars.push((var.as_str(), item));
                    let outcome = replay(body, model, vars, out);
                    vars.pop();
                    outcome?;
                }
            }
            Step::If { condition, body } => {
                let truthy = resolve(condition, model, vars.as_slice())?.is_some_and(is_truthy);
                if truthy {
                    replay(body, model, vars, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Resolves a path against the model and the loop variables in scope.
///
/// `Ok(None)` means the *final* step hit a missing member or out-of-range
/// index: falsy in conditions, an error for emitted values. Traversing
/// *through* a missing or null value is always an error.
fn resolve<'a>(
    bound: &'a BoundExpr,
    model: &'a Value,
    vars: &[(&'a str, &'a Value)],
) -> Result<Option<&'a Value>, EvalError> {
    let (root, steps) = match &bound.expr {
        Expr::Path { root, steps } => (root, steps),
        Expr::List(_) => return Err(bound.traversal("a list literal is not a value")),
    };

    let mut current = root_value(root, model, vars)
        .ok_or_else(|| bound.traversal(format!("unknown root `{root}`")))?;

    for (position, step) in steps.iter().enumerate() {
        let last = position + 1 == steps.len();
        let next = match step {
            PathStep::Member(name) => match current {
                Value::Object(map) => map.get(name),
                Value::Null => {
                    return Err(bound.traversal(format!("`{name}` accessed through null")))
                }
                _ => {
                    return Err(bound.traversal(format!("`{name}` accessed on a non-object value")))
                }
            },
            PathStep::Index(index) => match current {
                Value::Array(items) => items.get(*index),
                Value::Null => {
                    return Err(bound.traversal(format!("`[{index}]` applied to null")))
                }
                _ => {
                    return Err(bound.traversal(format!("`[{index}]` applied to a non-sequence")))
                }
            },
        };
        match next {
            Some(value) => current = value,
            None if last => return Ok(None),
            None => return Err(bound.traversal("traversed through a missing member")),
        }
    }
    Ok(Some(current))
}

fn root_value<'a>(root: &str, model: &'a Value, vars: &[(&'a str, &'a Value)]) -> Option<&'a Value> {
    for (name, value) in vars.iter().rev() {
        if *name == root {
            return Some(value);
        }
    }
    (root == MODEL_ROOT).then_some(model)
}

/// Appends a value's string form: strings verbatim, scalars via `Display`,
/// null as nothing, containers as compact JSON.
fn append_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(text) => out.push_str(text),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => {
            out.push_str(&number.to_string());
        }
        container => out.push_str(&container.to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
