//! Pass 2: constant evaluation.
//!
//! Constants evaluate in declaration order against the constants already
//! bound; forward references were classified by name resolution, so only
//! arithmetic failures are reported here. Constants inside loop bodies
//! are rejected outright.

use super::SideTables;
use crate::ast::{Program, Stmt};
use crate::diag::{Collector, Diagnostic};
use crate::model::{Env, EvalError};

pub(super) fn run(program: &Program, tables: &mut SideTables, collector: &mut Collector) {
    let mut env = Env::new();
    for stmt in &program.stmts {
        match stmt {
            Stmt::Const(decl) => {
                match decl.value.eval(&env) {
                    Ok(value) => {
                        if !tables.consts.contains_key(&decl.name.name) {
                            env.bind(&decl.name.name, value);
                            tables.consts.insert(decl.name.name.clone(), value);
                        }
                    }
                    // Name errors were already reported by resolution.
                    Err(EvalError::Unbound(..)) => {}
                    Err(e) => {
                        collector.emit(
                            Diagnostic::error(format!(
                                "cannot evaluate constant `{}`: {e}",
                                decl.name.name
                            ))
                            .with_span(e.span()),
                        );
                    }
                }
            }
            Stmt::Loop(stmt) => reject_in_loop(&stmt.body, collector),
            _ => {}
        }
    }
}

fn reject_in_loop(stmts: &[Stmt], collector: &mut Collector) {
    for stmt in stmts {
        match stmt {
            Stmt::Const(decl) => {
                collector.emit(
                    Diagnostic::error(format!(
                        "constant `{}` declared inside a loop body",
                        decl.name.name
                    ))
                    .with_span(decl.span),
                );
            }
            Stmt::Loop(inner) => reject_in_loop(&inner.body, collector),
            _ => {}
        }
    }
}
