//! Operator commands typed on stdin while `station run` is active.

use clap::{Parser, Subcommand, ValueEnum};

use station_vision::TaskKind;

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    cmd: ConsoleCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConsoleCommand {
    /// Keep the next frame of a mosaic feed.
    Capture { feed: usize },
    /// Attach a vision task to a feed, or `none` to detach.
    Task { feed: usize, kind: TaskChoice },
    /// Start a feed's task over.
    Reset { feed: usize },
    Feed { feed: usize, state: Switch },
    Toggle { actuator: usize },
    /// Set every actuator at once, e.g. `actuators 0110`.
    Actuators { states: String },
    Timer { action: TimerAction },
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskChoice {
    TransectLine,
    Mosaic,
    None,
}

impl TaskChoice {
    pub fn kind(self) -> Option<TaskKind> {
        match self {
            TaskChoice::TransectLine => Some(TaskKind::TransectLine),
            TaskChoice::Mosaic => Some(TaskKind::Mosaic),
            TaskChoice::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimerAction {
    Start,
    Stop,
    Reset,
}

pub fn parse(line: &str) -> Result<ConsoleCommand, clap::Error> {
    ConsoleLine::try_parse_from(line.split_whitespace()).map(|l| l.cmd)
}

/// `0110` → off, on, on, off.
pub fn parse_states(s: &str) -> Option<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '0' => Some(false),
            '1' => Some(true),
            _ => None,
        })
        .collect()
}
