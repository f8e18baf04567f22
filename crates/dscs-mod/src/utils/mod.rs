use colored::Colorize;
use dscs_overlay::InstallEvent;

pub mod config;
pub mod logging;

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

/// Renders one pipeline event for the terminal, or `None` for control events.
pub fn format_event(event: &InstallEvent) -> Option<String> {
    match event {
        InstallEvent::Log(message) => Some(format!("{} {}", "•".bright_cyan(), message)),
        InstallEvent::Update(message) => Some(format!("  {}", message.dimmed())),
        InstallEvent::LockControls | InstallEvent::ReleaseControls => None,
    }
}

pub fn print_event(event: InstallEvent) {
    tracing::trace!(?event, "pipeline event");
    if let Some(line) = format_event(&event) {
        println!("{}", line);
    }
}
