//! Decode command implementation.

use super::{open_store, CommandResult};
use csync_codec::{Delta, Operation, OperationKind, Value};
use csync_core::ChangesetId;
use std::path::Path;

/// Runs the decode command.
pub fn run(path: &Path, id: &str) -> CommandResult {
    let store = open_store(path)?;
    let id: ChangesetId = id
        .parse()
        .map_err(|e| format!("Invalid changeset id {id}: {e}"))?;
    let node = store.get(id)?;

    println!("Changeset {}", node.id);
    println!("Meta: {}", node.meta);
    println!();
    print_delta("parent", node.parent_id, &node.parent_delta)?;
    if let Some(merge_delta) = &node.merge_delta {
        println!();
        print_delta("merge", node.merge_id, merge_delta)?;
    }
    Ok(())
}

fn print_delta(edge: &str, from: Option<ChangesetId>, delta: &Delta) -> CommandResult {
    let from = from.map_or_else(|| "(root)".to_string(), |id| id.to_string());
    let ops = delta.decode()?;
    println!("Delta from {edge} {from}: {} operations, {} bytes", ops.len(), delta.len());
    for op in &ops {
        println!("  {}", describe(op));
    }
    Ok(())
}

/// One-line rendering of an operation, for example
/// `UPDATE player ['p1'] c2: 3 -> 9`.
fn describe(op: &Operation) -> String {
    let key: Vec<String> = op.key().into_iter().map(format_value).collect();
    let mut line = format!("{} {} [{}]", op.kind, op.table, key.join(", "));

    let columns = op.primary_key.iter().enumerate().filter(|(_, pk)| !**pk);
    for (index, _) in columns {
        let old = op.old_values.get(index).filter(|v| !v.is_undefined());
        let new = op.new_values.get(index).filter(|v| !v.is_undefined());
        let change = match (op.kind, old, new) {
            (OperationKind::Insert, _, Some(new)) => format_value(new),
            (OperationKind::Delete, Some(old), _) => format_value(old),
            (OperationKind::Update, Some(old), Some(new)) => {
                format!("{} -> {}", format_value(old), format_value(new))
            }
            _ => continue,
        };
        line.push_str(&format!(" c{index}: {change}"));
    }
    line
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Undefined => "?".to_string(),
        Value::Null => "NULL".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) => format!("'{}'", String::from_utf8_lossy(t)),
        Value::Blob(b) => format!("x'{}'", b.iter().map(|b| format!("{b:02x}")).collect::<String>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_update() {
        let op = Operation::update(
            "player",
            vec![true, false, false],
            vec![Value::from("p1"), Value::Undefined, Value::Integer(3)],
            vec![Value::Undefined, Value::Undefined, Value::Integer(9)],
        );
        assert_eq!(describe(&op), "UPDATE player ['p1'] c2: 3 -> 9");
    }

    #[test]
    fn describes_insert() {
        let op = Operation::insert(
            "t",
            vec![true, false],
            vec![Value::Integer(1), Value::Blob(vec![0xbe, 0xef])],
        );
        assert_eq!(describe(&op), "INSERT t [1] c1: x'beef'");
    }
}
