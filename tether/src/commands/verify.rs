//! `tether verify`: the integration scorecard.

use super::helpers::{indent_lines, ssh_options};
use crate::endpoint::HttpEndpoint;
use crate::output::OutputContext;
use crate::verifier::{Scorecard, Verifier, build_suite};
use std::time::Duration;
use tether_common::ShellRunner;
use tether_common::config::TetherConfig;

/// Run the suite and print it. Returns the process exit status.
pub async fn verify(config: &TetherConfig, local_only: bool, ctx: &OutputContext) -> anyhow::Result<i32> {
    let checks = build_suite(config, local_only)?;
    let ssh = ssh_options(config);
    let runner = ShellRunner::new(ssh.clone());
    let endpoint = HttpEndpoint::new(Duration::from_secs(5))?;

    let card = Verifier::new(&runner, &endpoint, ssh).run_suite(&checks).await;
    if ctx.is_json() {
        ctx.print_json(&card)?;
    } else {
        render(&card, ctx);
    }
    Ok(if card.all_passed() { 0 } else { 1 })
}

fn render(card: &Scorecard, ctx: &OutputContext) {
    ctx.header("Integration checks");
    for result in &card.results {
        if result.passed() {
            ctx.success(&result.name);
            continue;
        }
        ctx.failure(&result.name);
        if let Some(diagnostic) = &result.diagnostic {
            ctx.plain(&indent_lines(diagnostic, "      "));
        }
    }
    ctx.header(&format!(
        "{}/{} checks passed ({}%)",
        card.passed, card.total, card.success_rate
    ));
}
