#[cfg(unix)]
pub mod attach;
#[cfg(unix)]
mod terminal;
pub mod watch;

use anyhow::Result;
use bench_core::{PanelId, SessionId, WorkbenchId};
use layout_tree::{Direction, PanelNode};
use std::fmt::Write as _;
#[cfg(unix)]
use std::sync::Arc;

use crate::models::{Session, SessionPatch, WorkbenchInfo};
use crate::workbench::WorkbenchController;

// ── Listing ─────────────────────────────────────────────────────────────

pub fn workbenches_command(controller: &WorkbenchController, json: bool) -> Result<()> {
    let state = controller.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&state.workbenches)?);
        return Ok(());
    }

    println!("{:<2} {:<38} {:<24} {}", "", "ID", "NAME", "COLOR");
    println!("{}", "-".repeat(80));
    for wb in &state.workbenches {
        let marker = if state.active_workbench.as_ref() == Some(&wb.id) { "*" } else { "" };
        println!("{:<2} {:<38} {:<24} {}", marker, wb.id, wb.name, wb.color);
    }
    println!("\n{} workbench(es)", state.workbenches.len());
    Ok(())
}

pub fn sessions_command(controller: &WorkbenchController, json: bool) -> Result<()> {
    let views = controller.session_views();

    if json {
        let rows: Vec<_> = views
            .iter()
            .map(|v| {
                serde_json::json!({
                    "session": v.session,
                    "status": v.status(),
                    "reconnect_attempt": v.reconnect_attempt,
                    "active": v.active,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if views.is_empty() {
        println!("No sessions in this workbench.");
    } else {
        println!(
            "{:<2} {:<10} {:<24} {:<12} {:<9} {}",
            "", "ID", "TITLE", "STATUS", "SIZE", "SHELL"
        );
        println!("{}", "-".repeat(80));
        for v in &views {
            let s = &v.session;
            println!(
                "{:<2} {:<10} {:<24} {:<12} {:<9} {}",
                if v.active { "*" } else { "" },
                short_id(s.id.as_str()),
                s.title,
                v.status(),
                format!("{}x{}", s.cols, s.rows),
                s.shell
            );
        }
        println!("\n{} session(s)", views.len());
    }
    Ok(())
}

pub fn layout_command(controller: &WorkbenchController, json: bool) -> Result<()> {
    let state = controller.snapshot();
    match (&state.tree, json) {
        (Some(tree), true) => println!("{}", serde_json::to_string_pretty(tree)?),
        (None, true) => println!("null"),
        (Some(tree), false) => print!("{}", render_tree(tree, &state.sessions)),
        (None, false) => println!("Empty layout."),
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Indented outline of a layout. The active tab of each leaf is starred.
fn render_tree(tree: &PanelNode, sessions: &[Session]) -> String {
    fn walk(node: &PanelNode, depth: usize, sessions: &[Session], out: &mut String) {
        let indent = "  ".repeat(depth);
        match node {
            PanelNode::Leaf(leaf) => {
                let tabs: Vec<String> = leaf
                    .tabs
                    .iter()
                    .map(|tab| {
                        let title = sessions
                            .iter()
                            .find(|s| s.id == *tab)
                            .map(|s| s.title.as_str())
                            .unwrap_or_else(|| short_id(tab.as_str()));
                        if leaf.active_tab.as_ref() == Some(tab) {
                            format!("*{title}")
                        } else {
                            title.to_string()
                        }
                    })
                    .collect();
                let _ = writeln!(out, "{indent}leaf {} [{}]", leaf.id, tabs.join(", "));
            }
            PanelNode::Split(split) => {
                let sizes: Vec<String> = split.sizes.iter().map(|s| format!("{s:.2}")).collect();
                let direction = match split.direction {
                    Direction::Horizontal => "horizontal",
                    Direction::Vertical => "vertical",
                };
                let _ = writeln!(out, "{indent}split {} {direction} ({})", split.id, sizes.join(" : "));
                for child in &split.children {
                    walk(child, depth + 1, sessions, out);
                }
            }
        }
    }
    let mut out = String::new();
    walk(tree, 0, sessions, &mut out);
    out
}

// ── Session edits ───────────────────────────────────────────────────────

pub async fn new_command(controller: &WorkbenchController, panel: Option<String>) -> Result<()> {
    let panel = panel.map(PanelId::new);
    let session = controller.create_session(panel.as_ref()).await?;
    controller.flush_layout();
    println!("{}", session.id);
    Ok(())
}

pub async fn split_command(
    controller: &WorkbenchController,
    target: &str,
    direction: Direction,
) -> Result<()> {
    let state = controller.snapshot();
    let id = match_session(&state.sessions, target)?;
    let panel = state
        .tree
        .as_ref()
        .and_then(|t| t.leaf_of(&id))
        .map(|leaf| leaf.id.clone())
        .ok_or_else(|| anyhow::anyhow!("Session {id} is not in the layout"))?;
    let session = controller.split_panel(&panel, direction).await?;
    controller.flush_layout();
    println!("{}", session.id);
    Ok(())
}

pub async fn close_command(controller: &WorkbenchController, target: &str) -> Result<()> {
    let id = match_session(&controller.snapshot().sessions, target)?;
    controller.close_session(&id).await?;
    controller.flush_layout();
    println!("Closed {id}");
    Ok(())
}

pub async fn retitle_command(
    controller: &WorkbenchController,
    target: &str,
    title: Option<String>,
    color: Option<String>,
) -> Result<()> {
    if title.is_none() && color.is_none() {
        anyhow::bail!("Nothing to change: pass --title and/or --color");
    }
    let id = match_session(&controller.snapshot().sessions, target)?;
    let updated = controller
        .update_session(&id, SessionPatch { title, color })
        .await?;
    println!("{} {} {}", updated.id, updated.title, updated.color);
    Ok(())
}

pub fn focus_command(controller: &WorkbenchController, target: &str) -> Result<()> {
    let state = controller.snapshot();
    let id = match_session(&state.sessions, target)?;
    let panel = state
        .tree
        .as_ref()
        .and_then(|t| t.leaf_of(&id))
        .map(|leaf| leaf.id.clone())
        .ok_or_else(|| anyhow::anyhow!("Session {id} is not in the layout"))?;
    controller.activate_tab(&panel, &id)?;
    controller.flush_layout();
    Ok(())
}

pub fn resize_command(controller: &WorkbenchController, panel: &str, sizes: Vec<f64>) -> Result<()> {
    controller.update_panel_sizes(&PanelId::new(panel), sizes)?;
    controller.flush_layout();
    Ok(())
}

/// `extent` switches `delta` from ratio units to pixels across the split.
pub fn drag_command(
    controller: &WorkbenchController,
    panel: &str,
    divider: usize,
    delta: f64,
    extent: Option<f64>,
) -> Result<()> {
    let panel = PanelId::new(panel);
    match extent {
        Some(extent) => controller.drag_divider_pixels(&panel, divider, delta, extent)?,
        None => controller.drag_divider(&panel, divider, delta)?,
    }
    controller.flush_layout();
    Ok(())
}

// ── Workbench edits ─────────────────────────────────────────────────────

pub async fn create_workbench_command(controller: &WorkbenchController, name: &str) -> Result<()> {
    let wb = controller.create_workbench(name).await?;
    println!("{}", wb.id);
    Ok(())
}

pub async fn rename_workbench_command(
    controller: &WorkbenchController,
    target: &str,
    name: &str,
) -> Result<()> {
    let id = match_workbench(&controller.snapshot().workbenches, target)?;
    controller.rename_workbench(&id, name).await
}

pub async fn recolor_workbench_command(
    controller: &WorkbenchController,
    target: &str,
    color: &str,
) -> Result<()> {
    let id = match_workbench(&controller.snapshot().workbenches, target)?;
    controller.recolor_workbench(&id, color).await
}

pub async fn delete_workbench_command(controller: &WorkbenchController, target: &str) -> Result<()> {
    let id = match_workbench(&controller.snapshot().workbenches, target)?;
    controller.delete_workbench(&id).await?;
    controller.flush_layout();
    println!("Deleted {id}");
    Ok(())
}

pub async fn select_workbench(controller: &WorkbenchController, target: &str) -> Result<()> {
    let id = match_workbench(&controller.snapshot().workbenches, target)?;
    if controller.snapshot().active_workbench.as_ref() != Some(&id) {
        controller.switch_workbench(&id).await?;
    }
    Ok(())
}

// ── Attach ──────────────────────────────────────────────────────────────

/// Resolve an attach target: explicit match, else the focused session, else
/// the first one.
pub fn attach_target(controller: &WorkbenchController, target: Option<&str>) -> Result<SessionId> {
    let state = controller.snapshot();
    match target {
        Some(target) => match_session(&state.sessions, target),
        None => state
            .active_session
            .or_else(|| state.sessions.first().map(|s| s.id.clone()))
            .ok_or_else(|| anyhow::anyhow!("No sessions. Use `bench new` to create one.")),
    }
}

#[cfg(unix)]
pub async fn attach_command(
    controller: Arc<WorkbenchController>,
    target: Option<&str>,
    output: tokio::sync::mpsc::UnboundedReceiver<(SessionId, Vec<u8>)>,
) -> Result<()> {
    let id = attach_target(&controller, target)?;
    let _events = controller.run_events();
    controller.warm_sessions();
    attach::attach(Arc::clone(&controller), id, output).await?;
    controller.flush_layout();
    Ok(())
}

// ── Matching ────────────────────────────────────────────────────────────

/// Resolve a session target: exact ID, then title, then ID prefix.
fn match_session(sessions: &[Session], target: &str) -> Result<SessionId> {
    if sessions.is_empty() {
        anyhow::bail!("No sessions. Use `bench new` to create one.");
    }

    if let Some(s) = sessions.iter().find(|s| s.id.as_str() == target) {
        return Ok(s.id.clone());
    }
    if let Some(s) = sessions.iter().find(|s| s.title == target) {
        return Ok(s.id.clone());
    }
    let prefix_matches: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.as_str().starts_with(target))
        .collect();
    match prefix_matches.len() {
        0 => anyhow::bail!("No session found matching '{}'", target),
        1 => Ok(prefix_matches[0].id.clone()),
        n => anyhow::bail!(
            "Ambiguous: '{}' matches {} sessions. Be more specific.",
            target,
            n
        ),
    }
}

/// Resolve a workbench target: exact ID, then name, then ID prefix.
fn match_workbench(workbenches: &[WorkbenchInfo], target: &str) -> Result<WorkbenchId> {
    if let Some(wb) = workbenches.iter().find(|w| w.id.as_str() == target) {
        return Ok(wb.id.clone());
    }
    if let Some(wb) = workbenches.iter().find(|w| w.name == target) {
        return Ok(wb.id.clone());
    }
    let prefix_matches: Vec<_> = workbenches
        .iter()
        .filter(|w| w.id.as_str().starts_with(target))
        .collect();
    match prefix_matches.len() {
        0 => anyhow::bail!("No workbench found matching '{}'", target),
        1 => Ok(prefix_matches[0].id.clone()),
        n => anyhow::bail!(
            "Ambiguous: '{}' matches {} workbenches. Be more specific.",
            target,
            n
        ),
    }
}
