use crate::tpl::ast::{Doc, ExpressionNode};
use crate::tpl::walker::WalkerMut;

/// Filter name that turns off default filters for one expression.
pub const NO_DEFAULT_FILTERS: &str = "n";

/// Appends the configured default filters to every expression that does not
/// opt out with `n`.
///
/// A default already named explicitly is not added again, so `${x|h}` with
/// default `h` escapes once.
pub struct DefaultFilters<'f> {
    filters: &'f [String],
}

impl<'f> DefaultFilters<'f> {
    pub fn new(filters: &'f [String]) -> Self {
        Self { filters }
    }
}

impl WalkerMut for DefaultFilters<'_> {
    fn walk_expression(&mut self, node: &mut ExpressionNode) {
        if node.filters.iter().any(|f| f == NO_DEFAULT_FILTERS) {
            return;
        }
        for default in self.filters {
            if !node.filters.contains(default) {
                node.filters.push(default.clone());
            }
        }
    }
}

pub fn apply_default_filters(doc: &mut Doc, filters: &[String]) {
    if filters.is_empty() {
        return;
    }
    DefaultFilters::new(filters).walk(doc);
}
