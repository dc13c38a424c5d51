//! C declarator strings.
//!
//! Every type carries its cname together with a *name position*: the byte
//! offset at which a declarator (a variable name, or the `*` of a derived
//! pointer type) is inserted. Deriving a type inserts text at the base's name
//! position, which is how `int *[5]` and `int(*)[5]` come out right without a
//! declarator grammar.

use super::CType;

/// Insert `text` into `base`'s cname at its name position.
///
/// Returns the new cname and the new name position, which is `base`'s
/// position shifted by `shift`.
fn insert_at(base: &CType, text: &str, shift: usize) -> (String, usize) {
    let cname = base.cname();
    let pos = base.name_position();
    let (head, tail) = cname.split_at(pos);
    let mut out = String::with_capacity(cname.len() + text.len());
    out.push_str(head);
    out.push_str(text);
    out.push_str(tail);
    (out, pos + shift)
}

pub(crate) fn pointer_name(pointee: &CType) -> (String, usize) {
    if pointee.is_array() {
        insert_at(pointee, "(*)", 2)
    } else {
        insert_at(pointee, " *", 2)
    }
}

pub(crate) fn array_name(item: &CType, length: Option<usize>) -> (String, usize) {
    let brackets = match length {
        Some(n) => format!("[{}]", n),
        None => "[]".to_string(),
    };
    insert_at(item, &brackets, 0)
}

pub(crate) fn function_name(args: &[CType], result: &CType, ellipsis: bool) -> (String, usize) {
    let mut text = String::from("(*)(");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            text.push_str(", ");
        }
        text.push_str(arg.cname());
    }
    if ellipsis {
        if !args.is_empty() {
            text.push_str(", ");
        }
        text.push_str("...");
    }
    text.push(')');
    insert_at(result, &text, 2)
}

/// `getcname`: the cname with `replace_with` placed where a declarator goes.
pub fn getcname(ctype: &CType, replace_with: &str) -> String {
    insert_at(ctype, replace_with, 0).0
}
