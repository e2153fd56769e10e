//! Terminal access for interactive playback.
//!
//! Raw mode turns the blocking stdin read into the non-blocking poll the
//! transport controller needs; the guard makes sure the terminal is restored
//! on every exit path, including panics.

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::play::transport::{Key, KeySource};

/// Raw-mode guard; restores the terminal when dropped.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn new() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { active: true })
    }

    /// Explicit cleanup with error reporting. After this, Drop is a no-op.
    pub fn release(mut self) -> std::io::Result<()> {
        self.active = false;
        disable_raw_mode()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            // Best effort; nowhere to propagate from Drop.
            if let Err(error) = disable_raw_mode() {
                tracing::debug!(%error, "failed to restore terminal in Drop");
            }
        }
    }
}

/// Restore the terminal before the panic message prints. Install early,
/// before raw mode is first enabled.
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        original_hook(panic_info);
    }));
}

/// Keyboard polling over the real terminal.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl TerminalKeys {
    pub fn new() -> Self {
        Self
    }
}

impl KeySource for TerminalKeys {
    fn poll_key(&mut self) -> Option<Key> {
        match event::poll(Duration::ZERO) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(error) => {
                tracing::debug!(%error, "terminal poll failed");
                return None;
            }
        }
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key,
            Ok(_) => return Some(Key::Other),
            Err(error) => {
                tracing::debug!(%error, "terminal read failed");
                return None;
            }
        };
        let mapped = match key.code {
            KeyCode::Char(' ') => Key::Pause,
            KeyCode::Char('s') => Key::Step,
            KeyCode::Char('q') | KeyCode::Esc => Key::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Key::Quit,
            _ => Key::Other,
        };
        Some(mapped)
    }
}
