//! Prometheus text exposition format.
//!
//! Renders control states and audit statistics for scraping by a
//! Prometheus server or compatible agent. Counters are derived from the
//! audit trail on every scrape.

use autopilot_core::ControlState;
use autopilot_engine::AuditStats;

/// Loop-wide gauges that are not tied to one target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopGauges {
    pub pending_cycles: usize,
    pub in_flight_actions: usize,
    pub unrecorded_decisions: usize,
}

/// Render everything under `/metrics`.
///
/// `stats` holds per-target audit statistics; targets without audit
/// records may be omitted.
pub fn render_prometheus(
    controls: &[ControlState],
    stats: &[(String, AuditStats)],
    gauges: LoopGauges,
) -> String {
    let mut out = String::new();

    out.push_str("# HELP autopilot_instances Current controlled quantity per target.\n");
    out.push_str("# TYPE autopilot_instances gauge\n");
    for c in controls {
        out.push_str(&format!(
            "autopilot_instances{{target=\"{}\"}} {}\n",
            escape_label(&c.target_id),
            c.current
        ));
    }

    counter(
        &mut out,
        "autopilot_decisions_total",
        "Decisions recorded in the audit trail.",
        stats,
        |s| s.total_events,
    );
    counter(
        &mut out,
        "autopilot_scale_ups_total",
        "Scale-up decisions.",
        stats,
        |s| s.total_scale_ups,
    );
    counter(
        &mut out,
        "autopilot_scale_downs_total",
        "Scale-down decisions.",
        stats,
        |s| s.total_scale_downs,
    );
    counter(
        &mut out,
        "autopilot_failed_actions_total",
        "Decisions whose execution failed.",
        stats,
        |s| s.total_failed,
    );

    out.push_str("# HELP autopilot_success_rate Completed / total decisions (0.0-1.0).\n");
    out.push_str("# TYPE autopilot_success_rate gauge\n");
    for (target, s) in stats {
        out.push_str(&format!(
            "autopilot_success_rate{{target=\"{}\"}} {:.4}\n",
            escape_label(target),
            s.success_rate
        ));
    }

    out.push_str("# HELP autopilot_pending_cycles Evaluation cycles queued or running.\n");
    out.push_str("# TYPE autopilot_pending_cycles gauge\n");
    out.push_str(&format!("autopilot_pending_cycles {}\n", gauges.pending_cycles));

    out.push_str("# HELP autopilot_in_flight_actions Actions waiting on the actuator.\n");
    out.push_str("# TYPE autopilot_in_flight_actions gauge\n");
    out.push_str(&format!(
        "autopilot_in_flight_actions {}\n",
        gauges.in_flight_actions
    ));

    out.push_str(
        "# HELP autopilot_unrecorded_decisions Executed decisions not yet in the audit trail.\n",
    );
    out.push_str("# TYPE autopilot_unrecorded_decisions gauge\n");
    out.push_str(&format!(
        "autopilot_unrecorded_decisions {}\n",
        gauges.unrecorded_decisions
    ));

    out
}

/// Escape a label value: backslash, double quote and line feed.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn counter(
    out: &mut String,
    name: &str,
    help: &str,
    stats: &[(String, AuditStats)],
    value: impl Fn(&AuditStats) -> usize,
) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    for (target, s) in stats {
        out.push_str(&format!(
            "{name}{{target=\"{}\"}} {}\n",
            escape_label(target),
            value(s)
        ));
    }
}
