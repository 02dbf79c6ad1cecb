//! `tether config show`.

use crate::output::OutputContext;
use anyhow::Context;
use tether_common::config::LoadedConfig;

pub fn show(loaded: &LoadedConfig, ctx: &OutputContext) -> anyhow::Result<()> {
    if ctx.is_json() {
        let sources: std::collections::BTreeMap<_, _> = loaded
            .sources
            .iter()
            .map(|(key, source)| (*key, source.to_string()))
            .collect();
        return ctx.print_json(&serde_json::json!({
            "file": loaded.file,
            "sources": sources,
            "config": loaded.config,
        }));
    }

    ctx.header("Configuration");
    match &loaded.file {
        Some(path) => ctx.key_value("file", &path.display().to_string()),
        None => ctx.key_value("file", "(none, built-in defaults)"),
    }
    for (key, source) in &loaded.sources {
        ctx.key_value(key, &source.to_string());
    }

    ctx.header("Effective values");
    let rendered = toml::to_string_pretty(&loaded.config).context("rendering configuration")?;
    ctx.plain(&rendered);
    Ok(())
}
