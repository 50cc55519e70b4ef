//! Developer-facing audit tree of how a field's value was derived.
use crate::compute::{Value, ValueMap};
use crate::store::{CalculationKind, FieldDefinition, FieldId};
use std::collections::HashMap;
use std::fmt::Write;

pub fn format_trace(fields: &[FieldDefinition], values: &ValueMap, target: &FieldId) -> String {
    let mut tracer = Tracer {
        fields: fields.iter().map(|f| (&f.id, f)).collect(),
        values,
        visited_at_level: HashMap::new(),
        output: String::new(),
    };

    if tracer.fields.contains_key(target) {
        let _ = writeln!(tracer.output, "AUDIT TRACE for field '{}':", target);
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_node(target, 1, "");
    } else {
        let _ = writeln!(tracer.output, "Error: Unknown field '{}'", target);
    }
    tracer.output
}

struct Tracer<'a> {
    fields: HashMap<&'a FieldId, &'a FieldDefinition>,
    values: &'a ValueMap,
    visited_at_level: HashMap<&'a FieldId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, id: &'a FieldId, level: usize, prefix: &str) {
        let Some(&field) = self.fields.get(id) else {
            let _ = writeln!(self.output, "{}[L{}] {} -> (unknown field)", prefix, level, id);
            return;
        };
        if let Some(&first_seen) = self.visited_at_level.get(id) {
            let _ = writeln!(self.output, "{}[L{}] {} -> (Ref to L{})", prefix, level, field.label, first_seen);
            return;
        }
        self.visited_at_level.insert(id, level);

        let line_header = format!("[L{}] {} {}", level, field.label, self.format_value(id));

        match field.derived_spec() {
            Some(spec) => {
                let kind = spec.calculation_type.map_or("unset", |k| k.as_str());
                let parents: Vec<&str> = spec.parent_fields.iter().map(FieldId::as_str).collect();
                let mut line = format!("{}{} = {}({})", prefix, line_header, kind, parents.join(", "));
                if spec.calculation_type == Some(CalculationKind::Custom) {
                    let body: Vec<&str> = spec.formula.split_whitespace().collect();
                    let _ = write!(line, ": {}", body.join(" "));
                }
                let _ = writeln!(self.output, "{}", line);
                self.recurse_parents(prefix, &spec.parent_fields, level);
            }
            None => {
                let _ = writeln!(self.output, "{}{} -> Input", prefix, line_header);
            }
        }
    }

    fn recurse_parents(&mut self, prefix: &str, parents: &'a [FieldId], level: usize) {
        let stem = build_child_stem(prefix);
        for (i, parent) in parents.iter().enumerate() {
            let connector = if i == parents.len() - 1 { "`--" } else { "|--" };
            self.trace_node(parent, level + 1, &format!("{}{}", stem, connector));
        }
    }

    fn format_value(&self, id: &FieldId) -> String {
        match self.values.get(id) {
            None => "[?]".to_string(),
            Some(Value::Error(e)) => format!("[Err: {}]", e),
            Some(v) if v.is_blank() => "[empty]".to_string(),
            Some(v) => format!("[{}]", v.to_display_string()),
        }
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`--", "   ").replace("|--", "|  ")
}
