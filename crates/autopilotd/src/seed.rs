//! Seed the store from autopilot.toml on start.
//!
//! The file is a starting point, not the source of truth: policies and
//! targets already in the store (created or edited through the API, or
//! scaled by the loop) are left as they are.

use tracing::{debug, info};

use autopilot_core::{AutopilotConfig, epoch_millis};
use autopilot_engine::Controller;
use autopilot_state::PolicyRepository;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub policies_added: usize,
    pub policies_kept: usize,
    pub targets: usize,
}

pub fn seed(controller: &Controller, config: &AutopilotConfig) -> anyhow::Result<SeedReport> {
    let repo = controller.repo();
    let mut report = SeedReport::default();

    for policy in config.policies(epoch_millis())? {
        if repo.get_policy(&policy.id)?.is_some() {
            debug!(policy = %policy.id, "policy already stored, keeping it");
            report.policies_kept += 1;
            continue;
        }
        repo.put_policy(&policy)?;
        report.policies_added += 1;
    }

    for target in &config.targets {
        controller.register_target(&target.id, target.instances)?;
        report.targets += 1;
    }

    info!(
        added = report.policies_added,
        kept = report.policies_kept,
        targets = report.targets,
        "store seeded from config"
    );
    Ok(report)
}
