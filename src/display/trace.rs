use crate::analysis::topology::Topology;
use crate::compute::Ledger;
use crate::plan::Procedure;
use crate::store::{SlotId, VariableKind, VariableRef};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders how `target` is produced: origins of synthesized variables, the
/// procedure writing an observed variable and, recursively, that
/// procedure's boundaries. Subtrees already printed are replaced by a
/// back-reference to the level they first appeared at.
pub fn format_trace(topology: &Topology, procedures: &[Procedure], ledger: &Ledger, target: &VariableRef) -> String {
    let mut tracer = Tracer {
        topology,
        procedures,
        ledger,
        writers: HashMap::new(),
        visited_at_level: HashMap::new(),
        output: String::new(),
    };
    for (i, p) in procedures.iter().enumerate() {
        for slot in p.writes() {
            tracer.writers.insert(slot, i);
        }
    }

    match topology.slot(target) {
        Ok(slot) => {
            let _ = writeln!(tracer.output, "TRACE for variable '{}':", target);
            let _ = writeln!(tracer.output, "--------------------------------------------------");
            tracer.trace_variable(slot, 1, "");
        }
        Err(e) => {
            let _ = writeln!(tracer.output, "Error: {}", e);
        }
    }
    tracer.output
}

struct Tracer<'a> {
    topology: &'a Topology,
    procedures: &'a [Procedure],
    ledger: &'a Ledger,
    writers: HashMap<SlotId, usize>,
    visited_at_level: HashMap<SlotId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_variable(&mut self, slot: SlotId, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&slot) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(slot, level);

        let line_header = format!("[L{}] {}{}", level, self.topology.label(slot), self.format_value(slot));
        let origins = self.topology.origins(slot).to_vec();

        match self.topology.kind(slot) {
            VariableKind::Derived { origin } => {
                let _ = writeln!(
                    self.output,
                    "{}{} = shift({}, x={}s, y={:+.3})",
                    prefix,
                    line_header,
                    self.topology.label(origins[0]),
                    origin.x_offset.num_seconds(),
                    origin.y_offset
                );
                self.recurse_variables(prefix, &origins, level);
            }
            VariableKind::Interpolated { coefficient, .. } => {
                let _ = writeln!(
                    self.output,
                    "{}{} = {:.2} * {} + {:.2} * {}",
                    prefix,
                    line_header,
                    coefficient,
                    self.topology.label(origins[0]),
                    1.0 - coefficient,
                    self.topology.label(origins[1])
                );
                self.recurse_variables(prefix, &origins, level);
            }
            VariableKind::Observed { sources } => match self.writers.get(&slot).copied() {
                Some(i) => {
                    let _ = writeln!(self.output, "{}{} <- procedure '{}'", prefix, line_header, self.procedures[i].id);
                    self.trace_procedure(i, level, &build_child_stem(prefix));
                }
                None => {
                    let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
                    let _ = writeln!(self.output, "{}{} -> Observed({})", prefix, line_header, names.join(", "));
                }
            },
        }
    }

    fn trace_procedure(&mut self, index: usize, level: usize, stem: &str) {
        let procedure = &self.procedures[index];
        let params: Vec<String> =
            procedure.function.parameters().pairs().iter().map(|(n, v)| format!("{}={:.4}", n, v)).collect();
        let _ = writeln!(self.output, "{}|  function: {} ({})", stem, procedure.function.type_tag(), params.join(", "));

        match self.ledger.get(&procedure.id) {
            Some(run) => {
                let filled: Vec<String> =
                    run.filled.iter().filter(|(_, n)| *n > 0).map(|(b, n)| format!("{}={}", b, n)).collect();
                if !filled.is_empty() {
                    let _ = writeln!(self.output, "{}|  filled: {}", stem, filled.join(", "));
                }
            }
            None => {
                let _ = writeln!(self.output, "{}|  (not run)", stem);
            }
        }

        let wiring: Vec<(String, SlotId)> = procedure.boundary_wiring().map(|(n, s)| (n.to_string(), s)).collect();
        for (i, (name, slot)) in wiring.iter().enumerate() {
            let connector = if i == wiring.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{} {}: ", stem, connector, name);
            self.trace_variable(*slot, level + 1, &full_prefix);
        }
    }

    fn recurse_variables(&mut self, prefix: &str, children: &[SlotId], level: usize) {
        let stem = build_child_stem(prefix);
        for (i, &child) in children.iter().enumerate() {
            let connector = if i == children.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{}", stem, connector);
            self.trace_variable(child, level + 1, &full_prefix);
        }
    }

    fn format_value(&self, slot: SlotId) -> String {
        let series = self.topology.series(slot);
        let last = series.values.iter().rev().find(|v| !v.is_nan());
        match last {
            Some(v) => format!(" [len={}, missing={}, last={:.3}]", series.len(), series.missing_count(), v),
            None => format!(" [len={}, no data]", series.len()),
        }
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    // Boundary labels ("|-- name: ") keep their column width.
    let stem: String = current_prefix
        .replace("`--", "   ")
        .replace("|--", "|  ")
        .chars()
        .map(|c| if c == '|' || c == ' ' { c } else { ' ' })
        .collect();
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::topology::tests::ten_days;
    use crate::config::{tests::SAMPLE, PlanConfig};
    use crate::plan::{InMemorySource, Plan};
    use crate::procedures::FunctionRegistry;

    fn plan() -> Plan {
        let config = PlanConfig::from_json_str(SAMPLE).unwrap();
        let mut plan = Plan::from_config(&config, &FunctionRegistry::with_builtins()).unwrap();
        let source = InMemorySource::new().with(VariableRef::new(1, "Q"), ten_days().series(vec![2.0; 10]));
        plan.run(&source).unwrap();
        plan
    }

    #[test]
    fn test_trace_walks_origins_and_procedures() {
        let plan = plan();
        let out = format_trace(plan.topology(), plan.procedures(), plan.ledger(), &VariableRef::new(2, "Qmix"));
        assert!(out.starts_with("TRACE for variable '2/Qmix'"));
        assert!(out.contains("= 0.50 * 1/Q + 0.50 * 2/Q"));
        assert!(out.contains("<- procedure 'route'"));
        assert!(out.contains("function: lag (lag=1.0000)"));
        // 1/Q appears directly and again below the routing procedure.
        assert!(out.contains("-> (Ref to L2)"));
    }

    #[test]
    fn test_trace_unknown_variable() {
        let plan = plan();
        let out = format_trace(plan.topology(), plan.procedures(), plan.ledger(), &VariableRef::new(9, "Q"));
        assert!(out.starts_with("Error:"));
    }
}
