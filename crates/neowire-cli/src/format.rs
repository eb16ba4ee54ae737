//! Human-readable rendering of the method catalog.

use neowire_core::{MethodCatalog, MethodDescriptor};
use std::fmt::Write;

/// One line per method: `id:\tname!(Type arg, ...)\t=> Result`.
///
/// The `!` marks methods that can fail.
pub fn method_line(method: &MethodDescriptor) -> String {
    let mut line = format!("{}:\t{}", method.id, method.name);
    if method.can_fail {
        line.push('!');
    }

    let params: Vec<String> = method
        .params
        .iter()
        .map(|p| format!("{} {}", p.ty, p.name))
        .collect();
    let _ = write!(line, "({})\t=> {}", params.join(", "), method.result_type);
    line
}

/// Render the catalog, optionally keeping only methods whose name contains `filter`.
pub fn catalog_listing(catalog: &MethodCatalog, filter: Option<&str>) -> String {
    let mut out = String::new();
    if filter.is_none() {
        let _ = writeln!(out, "classes: {}", catalog.classes().join(" "));
    }

    for method in catalog.methods() {
        if filter.map_or(true, |f| method.name.contains(f)) {
            let _ = writeln!(out, "{}", method_line(method));
        }
    }
    out
}
