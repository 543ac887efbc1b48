use serde::Serialize;

use crate::error::TemplateLocation;

/// Maps lines of generated source back to byte offsets in the template.
///
/// Entries are recorded in generation order, so their lines never decrease.
/// A query resolves to the latest entry whose line is at or before the
/// queried line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionMap {
    entries: Vec<(usize, usize)>,
}

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, generated_line: usize, template_pos: usize) {
        debug_assert!(
            self.entries
                .last()
                .is_none_or(|&(line, _)| line <= generated_line),
            "position map lines must not decrease"
        );
        self.entries.push((generated_line, template_pos));
    }

    /// Template offset for a generated line, `None` before the first mapping.
    pub fn source_line_to_template_pos(&self, generated_line: usize) -> Option<usize> {
        let end = self
            .entries
            .partition_point(|&(line, _)| line <= generated_line);
        end.checked_sub(1).map(|i| self.entries[i].1)
    }

    /// Line and column in `template` for a generated line.
    pub fn template_location(&self, template: &str, generated_line: usize) -> Option<TemplateLocation> {
        self.source_line_to_template_pos(generated_line)
            .map(|pos| TemplateLocation::of(template, pos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
