use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    SkipChildren,
    Stop,
}

// Preorder traversal over a JSON document with an explicit stack. The
// visitor steers descent per node and can abort the whole walk.
pub fn walk_values<'a>(root: &'a Value, visit: &mut impl FnMut(&'a Value) -> Walk) {
    let mut stack = vec![root];
    while let Some(value) = stack.pop() {
        match visit(value) {
            Walk::Stop => return,
            Walk::SkipChildren => continue,
            Walk::Continue => {}
        }
        match value {
            Value::Array(items) => stack.extend(items.iter().rev()),
            Value::Object(map) => stack.extend(map.values().rev()),
            _ => {}
        }
    }
}
