use crate::tpl::filters::FilterRegistry;
use crate::value::Value;

/// Per-render state handed to the compiled render function: the output
/// buffer, the data scope and the filters.
pub struct RenderContext<'r> {
    buffer: String,
    data: Value,
    filters: &'r FilterRegistry,
}

impl<'r> RenderContext<'r> {
    pub fn new(data: Value, filters: &'r FilterRegistry) -> Self {
        Self {
            buffer: String::new(),
            data,
            filters,
        }
    }

    /// Appends `value` to the output.
    ///
    /// `undefined` and `null` produce no text, so a missing value never
    /// shows up as a literal `undefined`.
    pub fn write(&mut self, value: &Value, ignore_undefined: bool) {
        if ignore_undefined && value.is_undefined() {
            return;
        }
        match value {
            Value::Undefined | Value::Null => {}
            Value::Str(s) => self.buffer.push_str(s),
            other => self.buffer.push_str(&other.to_string()),
        }
    }

    pub fn filter(&self, name: &str, value: Value) -> Result<Value, String> {
        self.filters.apply(name, value)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    pub fn output(&self) -> &str {
        &self.buffer
    }

    pub fn into_output(self) -> String {
        self.buffer
    }
}
