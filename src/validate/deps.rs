//! Pass 6: token dependency validation.
//!
//! Name resolution already guarantees a token reference resolves to an
//! earlier task in a visible scope, which makes the static graph acyclic
//! by construction. This pass verifies that property end-to-end and runs
//! an explicit cycle check so a regression in resolution cannot slip
//! through silently.

use super::{ProgramIndex, SideTables};
use crate::diag::{Collector, Diagnostic};

pub(super) fn run(index: &ProgramIndex<'_>, tables: &SideTables, collector: &mut Collector) {
    let n = index.tasks.len();
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

    for ctx in &index.tasks {
        let res = &tables.task_res[&ctx.stmt.id];
        for producer in res.dep_producers.iter().chain(&res.wait_producers) {
            let p = index.task_by_id[producer];
            if p >= ctx.order {
                collector.emit(
                    Diagnostic::error(
                        "token is consumed before the task producing it".to_string(),
                    )
                    .with_span(ctx.stmt.span)
                    .with_note("producing task here", Some(index.tasks[p].stmt.span)),
                );
                continue;
            }
            consumers[p].push(ctx.order);
        }
    }

    // Iterative three-color DFS over producer -> consumer edges.
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }
    let mut colors = vec![Color::White; n];
    for root in 0..n {
        if colors[root] != Color::White {
            continue;
        }
        let mut stack = vec![(root, 0usize)];
        colors[root] = Color::Grey;
        while let Some(&(node, next)) = stack.last() {
            match consumers[node].get(next) {
                Some(&child) => {
                    stack.last_mut().expect("non-empty").1 += 1;
                    match colors[child] {
                        Color::White => {
                            colors[child] = Color::Grey;
                            stack.push((child, 0));
                        }
                        Color::Grey => {
                            collector.emit(
                                Diagnostic::error("dependency cycle between tasks".to_string())
                                    .with_span(index.tasks[child].stmt.span),
                            );
                        }
                        Color::Black => {}
                    }
                }
                None => {
                    colors[node] = Color::Black;
                    stack.pop();
                }
            }
        }
    }
}
