//! Transcript rendering

use super::{SimulationStep, StepKind};

/// One line per step, numbered, suitable for logs and reports.
pub fn render_trace(steps: &[SimulationStep]) -> String {
    let mut out = String::new();
    for step in steps {
        out.push_str(&format!("Step {}: {}\n", step.step_number, step.description));
    }
    out
}

/// Mermaid flowchart of the path actually walked: one arrow between each
/// pair of consecutively entered nodes, ending at END when the walk
/// finished normally.
pub fn render_mermaid(steps: &[SimulationStep]) -> String {
    let entered: Vec<&str> = steps
        .iter()
        .filter(|s| s.kind == StepKind::EnterNode)
        .filter_map(|s| s.node_id.as_deref())
        .collect();

    let mut out = String::from("graph LR\n");
    for pair in entered.windows(2) {
        out.push_str(&format!("    {} --> {}\n", pair[0], pair[1]));
    }
    let halted = steps.iter().any(|s| s.kind == StepKind::ExitNode);
    if let Some(last) = entered.last() {
        if !halted {
            out.push_str(&format!("    {last} --> END\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn step(n: u32, kind: StepKind, node: Option<&str>, desc: &str) -> SimulationStep {
        SimulationStep {
            step_number: n,
            kind,
            node_id: node.map(String::from),
            description: desc.into(),
            changed: IndexMap::new(),
        }
    }

    #[test]
    fn trace_is_one_numbered_line_per_step() {
        let steps = vec![
            step(1, StepKind::EnterNode, Some("agent"), "entered 'agent'"),
            step(2, StepKind::EdgeFollowed, Some("agent"), "followed edge agent -> END"),
        ];
        let trace = render_trace(&steps);
        assert_eq!(trace, "Step 1: entered 'agent'\nStep 2: followed edge agent -> END\n");
    }

    #[test]
    fn mermaid_links_consecutive_entries_and_terminates() {
        let steps = vec![
            step(1, StepKind::EnterNode, Some("generator"), ""),
            step(2, StepKind::EdgeFollowed, Some("generator"), ""),
            step(3, StepKind::EnterNode, Some("critic"), ""),
            step(4, StepKind::GuardEvaluated, Some("critic"), ""),
        ];
        let mermaid = render_mermaid(&steps);
        assert!(mermaid.contains("generator --> critic"));
        assert!(mermaid.contains("critic --> END"));
    }

    #[test]
    fn mermaid_omits_end_after_abnormal_halt() {
        let steps = vec![
            step(1, StepKind::EnterNode, Some("a"), ""),
            step(2, StepKind::ExitNode, Some("a"), "halted"),
        ];
        assert!(!render_mermaid(&steps).contains("END"));
    }
}
