//! Textual DIG facts.
//!
//! One line per fact, nodes first, then traversal edges, then triggers:
//!
//! ```text
//! NODE <id> <base> <count> <stride>
//! EDGE <src> <dest> <function id>  # <function name>
//! TRIGGER <id> <id> <trigger id> <squash id>  # <trigger name> <squash name>
//! ```

use crate::analyzer::dig::{Dig, ElementCount, SquashFunction};
use crate::analyzer::ir::Program;
use std::fmt::Write;

/// Render the facts of an assembled DIG.
pub fn render_facts(dig: &Dig, program: &Program) -> String {
    let mut out = String::with_capacity(64 * (dig.nodes().len() + dig.edges().len()));

    for node in dig.nodes() {
        let count = match node.element_count {
            ElementCount::Constant(n) => n.to_string(),
            ElementCount::Runtime(v) => program.display_name(v),
            ElementCount::Unknown => "?".to_string(),
        };
        let _ = writeln!(
            out,
            "NODE {} {} {} {}",
            node.id,
            program.display_name(node.site),
            count,
            node.element_stride
        );
    }

    for edge in dig.traversal_edges() {
        if let Some(function) = dig.traversal_function(edge) {
            let _ = writeln!(
                out,
                "EDGE {} {} {}  # {}",
                edge.src,
                edge.dest,
                function.id(),
                function.name()
            );
        }
    }

    for edge in dig.trigger_edges() {
        let Some(trigger) = edge.trigger else {
            continue;
        };
        let squash = edge.squash.unwrap_or(SquashFunction::NeverSquash);
        let _ = writeln!(
            out,
            "TRIGGER {} {} {} {}  # {} {}",
            edge.src,
            edge.dest,
            trigger.id(),
            squash.id(),
            trigger.name(),
            squash.name()
        );
    }

    out
}
