//! Channel source selection: hardware bank or synthetic bridge.

use trialrig_core::RigError;
use trialrig_hardware::SyntheticBridge;
use trialrig_traits::ChannelReader;

use crate::cli::SourceArgs;

/// Which variant ended up behind the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Hardware,
    Simulated,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Simulated => "simulated",
        }
    }
}

pub type Reader = Box<dyn ChannelReader + Send>;

pub fn synthetic(cfg: &trialrig_config::Config) -> SyntheticBridge {
    let sim = &cfg.simulation;
    let mut bridge = SyntheticBridge::new(cfg.session.num_channels, cfg.session.bridge_gain)
        .with_noise(sim.noise);
    if !sim.bases.is_empty() {
        bridge = bridge.with_bases(sim.bases.clone());
    }
    if let Some(seed) = sim.seed {
        bridge = bridge.with_seed(seed);
    }
    bridge
}

/// Pick the channel source once, at startup.
pub fn make_reader(cfg: &trialrig_config::Config, source: SourceArgs) -> eyre::Result<(Reader, Backend)> {
    if source.simulate {
        tracing::info!(channels = cfg.session.num_channels, "using synthetic bridge");
        return Ok((Box::new(synthetic(cfg)), Backend::Simulated));
    }

    match open_hardware(cfg) {
        Ok(reader) => Ok((reader, Backend::Hardware)),
        Err(e) if source.allow_simulation => {
            tracing::warn!(error = %e, "no hardware channel available; falling back to synthetic bridge");
            Ok((Box::new(synthetic(cfg)), Backend::Simulated))
        }
        Err(e) => Err(e),
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_hardware(cfg: &trialrig_config::Config) -> eyre::Result<Reader> {
    use std::time::Duration;

    let pins: Vec<(u8, u8)> = cfg.hardware.channels.iter().map(|p| (p.dt, p.sck)).collect();
    if pins.is_empty() {
        return Err(eyre::Report::new(RigError::Config(
            "no [[hardware.channels]] pins configured".into(),
        )));
    }
    let bank = trialrig_hardware::Hx711Bank::open(
        &pins,
        cfg.session.bridge_gain,
        Duration::from_millis(cfg.hardware.read_timeout_ms),
    )
    .map_err(|e| eyre::Report::new(RigError::Hardware(e.to_string())))?;
    if bank.channels().is_empty() {
        return Err(eyre::Report::new(RigError::Hardware(
            "no bridge channel could be attached".into(),
        )));
    }
    Ok(Box::new(bank))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_hardware(_cfg: &trialrig_config::Config) -> eyre::Result<Reader> {
    Err(eyre::Report::new(RigError::Hardware(
        "built without hardware support; pass --simulate or --allow-simulation".into(),
    )))
}
