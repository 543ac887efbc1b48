pub mod error;
pub mod loader;
pub mod script;
pub mod tpl;
pub mod value;

pub use error::{Result, TemplateError, TemplateLocation};
pub use tpl::engine::{Template, TemplateBuilder, TemplateOptions, render};
pub use tpl::filters::FilterRegistry;
pub use value::{ToValue, Value};

#[doc(hidden)]
pub use ctor;
pub use tplc_macros::template_assets;
