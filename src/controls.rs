//! Controls panels and the player-side manager that keeps their
//! visibility in sync.

use std::cell::Cell;
use std::rc::Rc;

use crate::discovery::{Manager, ManagerHooks, Registration, SignalKind, register};
use crate::host::Host;

const VISIBLE_ATTR: &str = "data-visible";

/// Discovery payload of a controls panel.
#[derive(Debug)]
pub struct ControlsPanel {
    name: String,
}

impl ControlsPanel {
    /// Announce a controls panel mounted on `host`.
    pub fn mount(host: &Host) -> Registration {
        let panel = ControlsPanel {
            name: host.name().to_string(),
        };
        register(host, SignalKind::ManagedControls, Rc::new(panel))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct VisibilitySync {
    visible: Rc<Cell<bool>>,
}

fn apply_visibility(host: &Host, visible: bool) {
    if let Err(e) = host.toggle_attribute(VISIBLE_ATTR, visible) {
        tracing::warn!(host = %host.id(), error = %e, "could not update controls visibility");
    }
}

impl ManagerHooks<ControlsPanel> for VisibilitySync {
    fn added(&self, _panel: &Rc<ControlsPanel>, host: &Host) {
        apply_visibility(host, self.visible.get());
    }

    fn removed(&self, _panel: &Rc<ControlsPanel>, host: &Host) {
        host.remove_attribute(VISIBLE_ATTR);
    }
}

/// Tracks the controls panels under a player and mirrors the player's
/// controls visibility onto each of them as `data-visible`.
pub struct ControlsManager {
    visible: Rc<Cell<bool>>,
    panels: Manager<ControlsPanel>,
}

impl ControlsManager {
    pub fn attach(player: &Host) -> Self {
        let visible = Rc::new(Cell::new(false));
        let panels = Manager::attach(
            player,
            SignalKind::ManagedControls,
            VisibilitySync {
                visible: visible.clone(),
            },
        );
        Self { visible, panels }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn set_visible(&self, visible: bool) {
        if self.visible.replace(visible) == visible {
            return;
        }
        tracing::debug!(visible, panels = self.panels.len(), "controls visibility changed");
        for (_, host) in self.panels.entries() {
            apply_visibility(&host, visible);
        }
    }

    /// Names of the registered panels, in registration order.
    pub fn panels(&self) -> Vec<String> {
        self.panels
            .members()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }
}
