use std::path::Path;

use anyhow::{bail, Context};
use log::info;

use crate::regex;

/// Substitutes `fragment` for the `{{ plot }}` placeholder of `template`.
pub fn render_page(template: &str, fragment: &str) -> anyhow::Result<String> {
    let placeholder = regex!(r"\{\{\s*plot\s*\}\}");
    if !placeholder.is_match(template) {
        bail!("The template has no {{{{ plot }}}} placeholder");
    }
    Ok(placeholder
        .replace_all(template, ::regex::NoExpand(fragment))
        .into_owned())
}

pub fn publish(
    template_path: &Path,
    fragment_path: &Path,
    page_path: &Path,
) -> anyhow::Result<()> {
    let template = fs_err::read_to_string(template_path)?;
    let fragment = fs_err::read_to_string(fragment_path)?;
    let page = render_page(&template, &fragment)
        .with_context(|| format!("While rendering {template_path:?}"))?;
    if let Some(parent) = page_path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(page_path, page)?;
    info!("Published {page_path:?}");
    Ok(())
}
