mod cli;
mod error_fmt;
mod hw;
mod logging;
mod session;

use clap::Parser;
use trialrig_core::RigError;
use trialrig_core::scheduler::order_for;
use trialrig_traits::ChannelReader;

use crate::cli::{Cli, Commands, JSON_MODE, SourceArgs};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::session::{OffsetSource, RunOptions};

fn config_error(e: eyre::Report) -> eyre::Report {
    eyre::Report::new(RigError::Config(format!("{e:#}")))
}

/// Load, sanitize and validate the TOML config. A missing file means defaults.
fn load_config(path: &std::path::Path) -> eyre::Result<(trialrig_config::Config, Vec<String>)> {
    let mut cfg = if path.exists() {
        trialrig_config::load_file(path).map_err(config_error)?
    } else {
        trialrig_config::Config::default()
    };
    let substitutions = cfg.sanitize();
    cfg.validate().map_err(config_error)?;
    Ok((cfg, substitutions))
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        let json = JSON_MODE.get().copied().unwrap_or(false);
        if json {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::debug!(error = ?e, "exiting with error");
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let (cfg, substitutions) = load_config(&cli.config)?;
    logging::init_tracing(&cli.log_level, cli.json, &cfg.logging)?;
    if !cli.config.exists() {
        tracing::info!(path = %cli.config.display(), "config file not found; using defaults");
    }
    for s in &substitutions {
        tracing::warn!("config: {s}");
    }

    match cli.cmd {
        Commands::Order { participant } => {
            let order = order_for(&participant, &cfg.session.condition_labels);
            if cli.json {
                println!("{}", serde_json::json!({ "participant": participant, "order": order }));
            } else {
                println!("{}", order.join(", "));
            }
            Ok(())
        }
        Commands::SelfCheck { source } => self_check(&cfg, source, cli.json),
        Commands::Calibrate { participant, source } => {
            let path = session::calibrate_only(&cfg, &participant, source, cli.json)?;
            if !cli.json {
                println!("Offsets saved to {}", path.display());
            }
            Ok(())
        }
        Commands::Run {
            participant,
            source,
            skip_calibration,
        } => {
            let offsets = match (cli.calibration, skip_calibration) {
                (Some(path), _) => OffsetSource::File(path),
                (None, true) => OffsetSource::Previous,
                (None, false) => OffsetSource::Calibrate,
            };
            session::run(
                &cfg,
                RunOptions {
                    participant,
                    source,
                    offsets,
                    json: cli.json,
                },
            )
            .map(|_| ())
        }
    }
}

fn self_check(cfg: &trialrig_config::Config, source: SourceArgs, json: bool) -> eyre::Result<()> {
    let (reader, backend) = hw::make_reader(cfg, source)?;
    let channels = reader.channels();
    let missing: Vec<&str> = cfg
        .session
        .condition_labels
        .iter()
        .enumerate()
        .filter(|(i, _)| u32::try_from(*i).map_or(true, |ch| !channels.contains(&ch)))
        .map(|(_, label)| label.as_str())
        .collect();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "backend": backend.as_str(),
                "channels": channels,
                "conditions": cfg.session.condition_labels,
                "unbound_conditions": missing,
            })
        );
    } else {
        println!("Channel source: {}", backend.as_str());
        println!("Available channels: {channels:?}");
        for (i, label) in cfg.session.condition_labels.iter().enumerate() {
            println!("  condition {label} -> channel {i}");
        }
    }
    if missing.is_empty() {
        if !json {
            println!("OK");
        }
        Ok(())
    } else {
        Err(eyre::Report::new(RigError::Hardware(format!(
            "no channel for condition(s) {}",
            missing.join(", ")
        ))))
    }
}
