//! The client event loop.
//!
//! [`run`] owns the [`TabManager`]. UI code talks to it through a
//! [`Command`] sender; channels and timers talk to it through the manager's
//! event queue. Everything that mutates tab state happens on this one task.

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::event::ClientEvent;
use crate::layout::ContainerSize;
use crate::manager::TabManager;
use crate::session::TabId;

/// A request from the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    NewTab { name: Option<String> },
    CloseTab(TabId),
    Activate(TabId),
    MoveTab { id: TabId, index: usize },
    RenameTab { id: TabId, name: String },
    ToggleLayout,
    /// Keystrokes for the active tab.
    Input(String),
    Resize(ContainerSize),
    /// A line to print into the active tab, e.g. an upload result.
    Notice(String),
    /// Save and tear everything down.
    Shutdown,
}

/// Drive the manager until [`Command::Shutdown`] arrives or every command
/// sender is dropped. State is autosaved on the configured interval and once
/// more on exit.
///
/// Call [`TabManager::restore_state`] before handing the manager over.
pub async fn run(
    mut manager: TabManager,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let period = manager.config().autosave_interval;
    let mut autosave = interval_at(Instant::now() + period, period);
    autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let before = manager.status();
                manager.handle_event(event);
                let after = manager.status();
                if after != before {
                    log::debug!("status: {after}");
                }
            }
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => dispatch(&mut manager, command),
            },
            _ = autosave.tick() => manager.save_state(),
        }
    }

    manager.shutdown();
    log::info!("client driver stopped");
}

fn dispatch(manager: &mut TabManager, command: Command) {
    match command {
        Command::NewTab { name } => {
            manager.create_tab(name);
        }
        Command::CloseTab(id) => {
            manager.close_tab(id);
        }
        Command::Activate(id) => {
            manager.set_active_tab(id);
        }
        Command::MoveTab { id, index } => {
            manager.move_tab(id, index);
        }
        Command::RenameTab { id, name } => {
            manager.rename_tab(id, &name);
        }
        Command::ToggleLayout => manager.toggle_layout(),
        Command::Input(data) => manager.send_input(&data),
        Command::Resize(container) => manager.resize(container),
        Command::Notice(text) => manager.write_notice(&text),
        Command::Shutdown => {}
    }
}
