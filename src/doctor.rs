use std::collections::{BTreeSet, HashMap, VecDeque};
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use podwire_core::config::AppConfig;
use podwire_core::types::{Connection, Pod, TriggerMode};
use podwire_engine::compute_terminal_set;
use podwire_engine::join::required_sources;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

/// Print canvas health checks. Returns the number of issues found.
pub fn run_doctor(config: &AppConfig) -> usize {
    let mut checks = Vec::new();

    // 1. Log filter parses
    checks.push(check_log_filter(config));

    // 2. Canvas is consistent; the rest needs it
    match config.canvas() {
        Ok((pods, connections)) => {
            checks.push(CheckResult {
                label: "Canvas".into(),
                ok: true,
                detail: format!("{} pods, {} connections", pods.len(), connections.len()),
            });
            checks.push(check_cycles(&connections));
            checks.push(check_joins(&pods, &connections));
            checks.push(check_auto_clear(&pods, &connections));
            checks.push(check_decisions(config));
        }
        Err(e) => checks.push(CheckResult {
            label: "Canvas".into(),
            ok: false,
            detail: e.to_string(),
        }),
    }

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count
}

fn check_log_filter(config: &AppConfig) -> CheckResult {
    match config.log.filter {
        Some(ref filter) => match EnvFilter::from_str(filter) {
            Ok(_) => CheckResult {
                label: "Log filter".into(),
                ok: true,
                detail: filter.clone(),
            },
            Err(e) => CheckResult {
                label: "Log filter".into(),
                ok: false,
                detail: format!("'{}': {}", filter, e),
            },
        },
        None => CheckResult {
            label: "Log filter".into(),
            ok: true,
            detail: "Default (podwire=info,warn)".into(),
        },
    }
}

fn check_cycles(connections: &[Connection]) -> CheckResult {
    let cycle = auto_cycle(connections);
    if cycle.is_empty() {
        CheckResult {
            label: "Auto edges".into(),
            ok: true,
            detail: "Acyclic".into(),
        }
    } else {
        CheckResult {
            label: "Auto edges".into(),
            ok: false,
            detail: format!("Cycle through {} (runs would re-trigger forever)", cycle.join(", ")),
        }
    }
}

/// Pods on or behind a cycle of `auto` edges, sorted. Empty when acyclic.
fn auto_cycle(connections: &[Connection]) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut out: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in connections.iter().filter(|c| c.trigger_mode == TriggerMode::Auto) {
        indegree.entry(conn.source.as_str()).or_insert(0);
        *indegree.entry(conn.target.as_str()).or_insert(0) += 1;
        out.entry(conn.source.as_str()).or_default().push(conn.target.as_str());
    }

    let mut ready: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(p, _)| *p)
        .collect();
    while let Some(pod) = ready.pop_front() {
        for target in out.get(pod).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(target) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(target);
                }
            }
        }
    }

    let stuck: BTreeSet<&str> = indegree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(p, _)| p)
        .collect();
    stuck.into_iter().map(String::from).collect()
}

fn check_joins(pods: &[Pod], connections: &[Connection]) -> CheckResult {
    let joins: Vec<String> = pods
        .iter()
        .filter_map(|pod| {
            let incoming: Vec<Connection> = connections
                .iter()
                .filter(|c| c.target == pod.id)
                .cloned()
                .collect();
            let sources = required_sources(&incoming).len();
            (sources >= 2).then(|| format!("{} ({} sources)", pod.id, sources))
        })
        .collect();

    CheckResult {
        label: "Joins".into(),
        ok: true,
        detail: if joins.is_empty() {
            "None".into()
        } else {
            joins.join(", ")
        },
    }
}

fn check_auto_clear(pods: &[Pod], connections: &[Connection]) -> CheckResult {
    let plans: Vec<String> = pods
        .iter()
        .filter(|p| p.auto_clear)
        .map(|pod| {
            let has_auto = connections
                .iter()
                .any(|c| c.source == pod.id && c.trigger_mode == TriggerMode::Auto);
            let plan = compute_terminal_set(connections, &pod.id);
            if !has_auto {
                format!("{} (standalone)", pod.id)
            } else if plan.is_empty() {
                format!("{} (untracked, no terminal reachable)", pod.id)
            } else {
                format!(
                    "{} ({} terminals, {} completions)",
                    pod.id,
                    plan.terminals.len(),
                    plan.expected_total()
                )
            }
        })
        .collect();

    CheckResult {
        label: "Auto-clear".into(),
        ok: true,
        detail: if plans.is_empty() {
            "No auto-clear pods".into()
        } else {
            plans.join(", ")
        },
    }
}

fn check_decisions(config: &AppConfig) -> CheckResult {
    let ignored: Vec<String> = config
        .connections
        .iter()
        .filter(|c| c.decision.is_some() && c.trigger_mode != TriggerMode::AiDecide)
        .map(|c| c.connection_id().to_string())
        .collect();

    if ignored.is_empty() {
        CheckResult {
            label: "Decisions".into(),
            ok: true,
            detail: "Scripted decisions only on ai-decide connections".into(),
        }
    } else {
        CheckResult {
            label: "Decisions".into(),
            ok: false,
            detail: format!("Ignored on non-ai-decide connections: {}", ignored.join(", ")),
        }
    }
}
