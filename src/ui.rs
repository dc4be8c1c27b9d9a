//! Stage progress on stderr for the command-line tools.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
    Quiet,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag.trim().to_ascii_lowercase().as_str() {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            "quiet" | "off" => UiMode::Quiet,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    stderr_is_tty: bool,
}

impl Ui {
    /// `machine_output` forces quiet progress so stdout stays parseable.
    pub fn from_args(ui_flag: &str, stderr_is_tty: bool, machine_output: bool) -> Self {
        let mode = if machine_output {
            UiMode::Quiet
        } else {
            UiMode::parse(ui_flag)
        };
        Self {
            mode,
            stderr_is_tty,
        }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        match self.mode {
            UiMode::Quiet => StageGuard::silent(name),
            UiMode::Plain => StageGuard::plain(name),
            UiMode::Pretty | UiMode::Auto if self.stderr_is_tty => StageGuard::spinner(name),
            UiMode::Pretty | UiMode::Auto => StageGuard::plain(name),
        }
    }
}

enum Sink {
    Silent,
    Plain,
    Spinner(ProgressBar),
}

pub struct StageGuard {
    name: String,
    detail: Option<String>,
    start: Instant,
    sink: Sink,
}

impl StageGuard {
    fn silent(name: &str) -> Self {
        Self::with_sink(name, Sink::Silent)
    }

    fn plain(name: &str) -> Self {
        eprintln!("==> {}", name);
        Self::with_sink(name, Sink::Plain)
    }

    fn spinner(name: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("{name}…"));
        Self::with_sink(name, Sink::Spinner(spinner))
    }

    fn with_sink(name: &str, sink: Sink) -> Self {
        Self {
            name: name.to_string(),
            detail: None,
            start: Instant::now(),
            sink,
        }
    }

    /// Attach a short result shown when the stage finishes.
    pub fn note(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.detail {
            Some(detail) => format!("✔ {}: {} ({})", self.name, detail, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        match &self.sink {
            Sink::Silent => {}
            Sink::Plain => eprintln!("{message}"),
            Sink::Spinner(spinner) => spinner.finish_with_message(message),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
