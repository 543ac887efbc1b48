mod assets;

use proc_macro::TokenStream;

/// Embeds every file matching the glob pattern (relative to the crate root)
/// and registers them with `tplc::loader` before `main` runs.
///
/// ```ignore
/// tplc::template_assets!("templates/**/*.tpl");
/// ```
#[proc_macro]
pub fn template_assets(input: TokenStream) -> TokenStream {
    assets::template_assets_impl(input)
}
