//! Operator commands and their dispatch onto the state machine.
//!
//! The control surface turns input into `Command`s; `execute` applies one and
//! returns a `Reply` to show. Conflicts come back as errors and change nothing.

use std::str::FromStr;
use std::time::Duration;

use crate::calibration::{CalibrationReport, CancelToken};
use crate::error::{CommandError, Result};
use crate::persistence::ExportReport;
use crate::session::TrialStateMachine;
use crate::status::{SessionSummary, StatusReport, StopOutcome, Toggled};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
    TogglePause,
    Select(String),
    Recalibrate,
    Export,
    /// Accept more trials after completion.
    Continue,
    End,
    Status,
    /// Let time pass; used by scripted sessions.
    Wait(Duration),
    Quit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Err(CommandError::Empty);
        };
        let arg = parts.next();
        let cmd = match word.to_ascii_lowercase().as_str() {
            "start" | "s" => Self::Start,
            "stop" | "x" => Self::Stop,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "toggle" | "p" => Self::TogglePause,
            "select" | "condition" => {
                let label = arg.ok_or(CommandError::MissingArgument("select"))?;
                Self::Select(label.to_string())
            }
            "recalibrate" | "recal" | "calibrate" => Self::Recalibrate,
            "export" | "save" => Self::Export,
            "continue" => Self::Continue,
            "end" => Self::End,
            "status" | "?" => Self::Status,
            "wait" | "sleep" => {
                let ms = arg.ok_or(CommandError::MissingArgument("wait"))?;
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| CommandError::InvalidArgument("wait", ms.to_string()))?;
                Self::Wait(Duration::from_millis(ms))
            }
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

#[derive(Debug)]
pub enum Reply {
    Started { trial: u32 },
    Stopped(StopOutcome),
    Paused,
    Resumed { paused_for: Duration },
    Selected(String),
    Recalibrated(CalibrationReport),
    Exported(ExportReport),
    Continued { trial: u32 },
    Ended(SessionSummary),
    Status(StatusReport),
    Waited(Duration),
    Quit,
}

/// Apply one command.
pub fn execute(
    machine: &mut TrialStateMachine,
    cmd: Command,
    cancel: &CancelToken,
) -> Result<Reply> {
    tracing::debug!(?cmd, phase = %machine.phase(), "command");
    let reply = match cmd {
        Command::Start => Reply::Started {
            trial: machine.start_trial()?,
        },
        Command::Stop => Reply::Stopped(machine.stop_trial()?),
        Command::Pause => {
            machine.pause()?;
            Reply::Paused
        }
        Command::Resume => Reply::Resumed {
            paused_for: machine.resume()?,
        },
        Command::TogglePause => match machine.toggle_pause()? {
            Toggled::Paused => Reply::Paused,
            Toggled::Resumed(paused_for) => Reply::Resumed { paused_for },
        },
        Command::Select(label) => {
            machine.select_condition(&label)?;
            Reply::Selected(label)
        }
        Command::Recalibrate => {
            cancel.reset();
            Reply::Recalibrated(machine.recalibrate(cancel)?)
        }
        Command::Export => Reply::Exported(machine.export_all()?),
        Command::Continue => Reply::Continued {
            trial: machine.continue_experiment()?,
        },
        Command::End => Reply::Ended(machine.end_experiment()?),
        Command::Status => Reply::Status(machine.status()),
        Command::Wait(d) => {
            machine.clock().sleep(d);
            Reply::Waited(d)
        }
        Command::Quit => Reply::Quit,
    };
    Ok(reply)
}

/// Run newline-separated commands until `quit` or the end of input.
///
/// Blank lines and lines starting with `#` are ignored. Failed commands are
/// logged and the script continues.
pub fn run_script(
    machine: &mut TrialStateMachine,
    script: &str,
    cancel: &CancelToken,
) -> Vec<Result<Reply>> {
    let mut replies = Vec::new();
    for line in script.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let outcome = line
            .parse::<Command>()
            .map_err(eyre::Report::new)
            .and_then(|cmd| execute(machine, cmd, cancel));
        if let Err(e) = &outcome {
            tracing::warn!(command = line, error = %e, "command rejected");
        }
        let quit = matches!(outcome, Ok(Reply::Quit));
        replies.push(outcome);
        if quit {
            break;
        }
    }
    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("start", Command::Start)]
    #[case("  STOP ", Command::Stop)]
    #[case("select B", Command::Select("B".into()))]
    #[case("wait 250", Command::Wait(Duration::from_millis(250)))]
    #[case("recal", Command::Recalibrate)]
    #[case("q", Command::Quit)]
    fn parses_commands(#[case] line: &str, #[case] want: Command) {
        assert_eq!(line.parse::<Command>().unwrap(), want);
    }

    #[rstest]
    #[case("", CommandError::Empty)]
    #[case("select", CommandError::MissingArgument("select"))]
    #[case("wait soon", CommandError::InvalidArgument("wait", "soon".into()))]
    #[case("dance", CommandError::Unknown("dance".into()))]
    fn rejects_bad_input(#[case] line: &str, #[case] want: CommandError) {
        assert_eq!(line.parse::<Command>().unwrap_err(), want);
    }

    #[test]
    fn toggle_reports_the_real_pause_length() {
        use std::sync::Arc;
        use std::time::Instant;

        use crate::config::SessionCfg;
        use crate::mocks::{ConstReader, MemStorage};
        use crate::paths::SessionPaths;
        use crate::status::TrialPhase;

        let cfg = SessionCfg {
            countdown: Duration::ZERO,
            conditions: vec!["A".into()],
            num_channels: 1,
            ..SessionCfg::default()
        };
        let mut machine = TrialStateMachine::builder(cfg, "3")
            .reader(ConstReader::new(0.2, 1))
            .storage(Arc::new(MemStorage::new()))
            .paths(SessionPaths::new("/session", "3"))
            .build()
            .unwrap();
        let cancel = CancelToken::new();

        execute(&mut machine, Command::Start, &cancel).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while machine.phase() != TrialPhase::Recording {
            assert!(Instant::now() < deadline, "trial never started recording");
            std::thread::sleep(Duration::from_millis(2));
        }

        assert!(matches!(
            execute(&mut machine, Command::TogglePause, &cancel).unwrap(),
            Reply::Paused
        ));
        std::thread::sleep(Duration::from_millis(30));
        let reply = execute(&mut machine, Command::TogglePause, &cancel).unwrap();
        let Reply::Resumed { paused_for } = reply else {
            panic!("expected a resume, got {reply:?}");
        };
        assert!(paused_for >= Duration::from_millis(30), "{paused_for:?}");

        execute(&mut machine, Command::Stop, &cancel).unwrap();
    }
}

