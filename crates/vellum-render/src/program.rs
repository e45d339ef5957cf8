//! The intermediate program representation.
//!
//! [`Program::build`] lowers a segment stream into an ordered, block-balanced
//! sequence of [`Op`]s over a virtual output buffer. Ordering exactly mirrors
//! segment ordering; the only rewriting is the merging of adjacent literals.
//! Balance is enforced here: every `LoopBegin`/`IfBegin` has a matching end
//! op, closed in strict LIFO order.

use vellum_parser::{ControlKind, Segment};

use crate::error::CompileError;

/// One operation over the virtual output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Append text verbatim.
    AppendLiteral(String),
    /// Evaluate an expression and append its string form.
    AppendEvaluated { source: String, offset: usize },
    /// Start iterating `iterable`, rebinding `var` per element.
    LoopBegin {
        iterable: String,
        iterable_offset: usize,
        var: String,
    },
    LoopEnd,
    /// Run the enclosed ops only if `condition` is truthy.
    IfBegin { condition: String, condition_offset: usize },
    IfEnd,
}

/// An ordered, validated operation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    ops: Vec<Op>,
}

impl Program {
    /// Lowers segments into ops, checking block balance.
    ///
    /// # Errors
    ///
    /// [`CompileError::UnbalancedControl`] when a block is never closed or a
    /// close appears with no open block.
    pub fn build(segments: &[Segment]) -> Result<Program, CompileError> {
        let mut ops = Vec::with_capacity(segments.len());
        // Block-kind stack: maps each close back to the innermost open.
        let mut open_blocks: Vec<(ControlKind, usize)> = Vec::new();

        for segment in segments {
            match segment {
                Segment::Literal { text, .. } => {
                    if let Some(Op::AppendLiteral(previous)) = ops.last_mut() {
                        previous.push_str(text);
                    } else {
                        ops.push(Op::AppendLiteral(text.clone()));
                    }
                }
                Segment::Expression { source, offset } => {
                    ops.push(Op::AppendEvaluated {
                        source: source.clone(),
                        offset: *offset,
                    });
                }
                Segment::ControlOpen {
                    kind,
                    expr,
                    expr_offset,
                    var,
                    offset,
                } => {
                    open_blocks.push((*kind, *offset));
                    match kind {
                        ControlKind::Foreach => ops.push(Op::LoopBegin {
                            iterable: expr.clone(),
                            iterable_offset: *expr_offset,
                            // The parser always supplies a loop variable.
                            var: var.clone().unwrap_or_default(),
                        }),
                        ControlKind::If => ops.push(Op::IfBegin {
                            condition: expr.clone(),
                            condition_offset: *expr_offset,
                        }),
                    }
                }
                Segment::ControlClose { offset } => match open_blocks.pop() {
                    Some((ControlKind::Foreach, _)) => ops.push(Op::LoopEnd),
                    Some((ControlKind::If, _)) => ops.push(Op::IfEnd),
                    None => {
                        return Err(CompileError::UnbalancedControl {
                            offset: *offset,
                            detail: "close with no open block".to_string(),
                        })
                    }
                },
                Segment::Directive { offset, .. } => {
                    // Directives are stripped before lowering.
                    return Err(CompileError::UnbalancedControl {
                        offset: *offset,
                        detail: "directive segment reached the program builder".to_string(),
                    });
                }
            }
        }

        if let Some((kind, offset)) = open_blocks.pop() {
            let keyword = match kind {
                ControlKind::Foreach => "foreach",
                ControlKind::If => "if",
            };
            return Err(CompileError::UnbalancedControl {
                offset,
                detail: format!("@{keyword} block is never closed"),
            });
        }

        Ok(Program { ops })
    }

    /// The operation sequence, in source order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_parser::{parse, resolve_directives, Segment};

    fn lower(source: &str) -> Result<Program, CompileError> {
        let (_, segments) = resolve_directives(parse(source).unwrap()).unwrap();
        Program::build(&segments)
    }

    #[test]
    fn literal_only_template_is_one_op() {
        let program = lower("just text").unwrap();
        assert_eq!(
            program.ops(),
            &[Op::AppendLiteral("just text".to_string())]
        );
    }

    #[test]
    fn segment_order_is_preserved() {
        let program = lower("Hello @Model.Name!").unwrap();
        assert!(matches!(program.ops()[0], Op::AppendLiteral(_)));
        assert!(matches!(program.ops()[1], Op::AppendEvaluated { .. }));
        assert!(matches!(program.ops()[2], Op::AppendLiteral(_)));
    }

    #[test]
    fn directive_does_not_reach_the_ops() {
        let program = lower("@inherits Base<T>\nHello").unwrap();
        assert_eq!(program.ops(), &[Op::AppendLiteral("Hello".to_string())]);
    }

    #[test]
    fn literals_around_a_stripped_directive_merge() {
        let program = lower("a\n@inherits Base<T>\nb").unwrap();
        assert_eq!(program.ops(), &[Op::AppendLiteral("a\nb".to_string())]);
    }

    #[test]
    fn close_with_no_open_is_rejected() {
        let segments = vec![Segment::ControlClose { offset: 7 }];
        let err = Program::build(&segments).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnbalancedControl { offset: 7, .. }
        ));
    }

    #[test]
    fn loop_ops_bracket_the_body() {
        let program = lower("@foreach (i in Model.Ids) { @i }").unwrap();
        assert!(matches!(
            &program.ops()[0],
            Op::LoopBegin { iterable, var, .. } if iterable == "Model.Ids" && var == "i"
        ));
        assert!(matches!(program.ops()[1], Op::AppendEvaluated { .. }));
        assert_eq!(program.ops()[2], Op::LoopEnd);
    }

    #[test]
    fn if_ops_bracket_the_body() {
        let program = lower("@if (Model.Active) { on }").unwrap();
        assert!(matches!(
            &program.ops()[0],
            Op::IfBegin { condition, .. } if condition == "Model.Active"
        ));
        assert_eq!(program.ops()[2], Op::IfEnd);
    }

    #[test]
    fn nested_blocks_close_lifo() {
        let program = lower("@foreach (r in Model.Rows) { @if (r.Show) { @r.Name } }").unwrap();
        let kinds: Vec<_> = program
            .ops()
            .iter()
            .map(|op| match op {
                Op::LoopBegin { .. } => "loop(",
                Op::LoopEnd => ")loop",
                Op::IfBegin { .. } => "if(",
                Op::IfEnd => ")if",
                Op::AppendEvaluated { .. } => "emit",
                Op::AppendLiteral(_) => "lit",
            })
            .collect();
        assert_eq!(kinds, vec!["loop(", "if(", "emit", ")if", ")loop"]);
    }

    #[test]
    fn unclosed_block_is_rejected() {
        let err = lower("@foreach (i in Model.Ids) { @i").unwrap_err();
        assert!(matches!(err, CompileError::UnbalancedControl { .. }));
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn empty_template_is_an_empty_program() {
        let program = lower("").unwrap();
        assert!(program.is_empty());
    }
}
