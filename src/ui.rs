//! Terminal progress for the command-line tools.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl std::str::FromStr for UiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(UiMode::Auto),
            "plain" => Ok(UiMode::Plain),
            "pretty" => Ok(UiMode::Pretty),
            other => Err(format!("unknown ui mode {:?} (auto|plain|pretty)", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    /// Spinners go to stderr, and only when it is a terminal. `Auto` also turns them
    /// off when stdout is piped so captured reports stay clean.
    pub fn new(mode: UiMode) -> Self {
        let stderr_tty = std::io::stderr().is_terminal();
        let stdout_tty = std::io::stdout().is_terminal();
        let spinners = stderr_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_tty,
                UiMode::Plain => false,
            };
        Self { spinners }
    }

    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.spinners {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(name.to_string());
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }
}

/// Finishes its line when dropped.
pub struct Stage {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl Stage {
    pub fn set_message(&self, message: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("{}: {}", self.name, message));
        }
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let line = format!("{} {} ({})", mark, self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{}", line),
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
