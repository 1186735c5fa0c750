use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use env_logger::Env;
use log::{info, warn};
use sense_reco::cfl_io::{ImageWriter, RecordedStream};
use sense_reco::simulate::{PhantomSimulator, SimulationSettings};
use sense_reco::{Collaborators, ReconError, SenseStage, StageActor, StageHandle, StageOutput, StageParameters};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sense-recon", about = "sliding window SENSE reconstruction of radial profile streams")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// reconstruct a recorded profile stream
    Run {
        /// stage parameters (toml)
        #[arg(long)]
        params: PathBuf,
        /// recorded stream directory
        stream: PathBuf,
        /// directory images are written to
        output: PathBuf,
        /// change profiles_per_frame once a profile index is reached, as INDEX=VALUE
        #[arg(long, value_parser = parse_update)]
        update: Vec<(usize, usize)>,
    },
    /// record a simulated phantom acquisition
    Simulate {
        /// simulation settings (toml), defaults when omitted
        #[arg(long)]
        settings: Option<PathBuf>,
        /// number of profiles to record
        #[arg(long, default_value_t = 256)]
        profiles: usize,
        /// recorded stream directory
        output: PathBuf,
    },
}

fn parse_update(s: &str) -> Result<(usize, usize), String> {
    let (at, value) = s.split_once('=').ok_or_else(|| format!("expected INDEX=VALUE, got {s}"))?;
    let at = at.trim().parse().map_err(|e| format!("bad index {at}: {e}"))?;
    let value = value.trim().parse().map_err(|e| format!("bad value {value}: {e}"))?;
    Ok((at, value))
}

fn main() -> sense_reco::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    match Args::parse().command {
        Command::Run { params, stream, output, update } => run(params, stream, output, update),
        Command::Simulate { settings, profiles, output } => simulate(settings, profiles, output),
    }
}

fn run(params: PathBuf, stream: PathBuf, output: PathBuf, updates: Vec<(usize, usize)>) -> sense_reco::Result<()> {
    let params = StageParameters::from_toml_file(params.with_extension("toml"))?;
    let recording = RecordedStream::open(&stream)?;

    let (image_tx, image_rx) = unbounded::<StageOutput>();
    let writer = ImageWriter::spawn(&output, image_rx)?;
    let actor = match StageActor::spawn(SenseStage::new(params, Collaborators::host(), image_tx)) {
        Ok(actor) => actor,
        Err(e) => {
            // the queue closed with the stage, nothing is left to write
            let _ = writer.finish();
            return Err(e);
        }
    };

    let replayed = replay(&actor.handle(), &recording, &updates);

    // joining drops the stage and with it the image queue, so the writer can finish
    let remaining = actor.join().map(|stage| (stage.images_reconstructed(), stage.buffered_profiles()));
    let written = writer.finish();
    replayed?;
    let (images, buffered) = remaining?;
    info!("{images} images reconstructed, {buffered} profiles left buffered");
    info!("wrote {} images to {}", written?, output.display());
    Ok(())
}

fn replay(stage: &StageHandle, recording: &RecordedStream, updates: &[(usize, usize)]) -> sense_reco::Result<()> {
    stage.configure(recording.header()?)?;
    for (index, profile) in recording.profiles()?.enumerate() {
        for (_, value) in updates.iter().filter(|(at, _)| *at == index) {
            stage.parameter_changed("profiles_per_frame", &value.to_string(), "")?;
        }
        match stage.process(profile?) {
            Ok(()) => {}
            Err(e) if e.halts_stage() || matches!(e, ReconError::Halted) => return Err(e),
            Err(e) => warn!("profile {index}: {e}"),
        }
    }
    Ok(())
}

fn simulate(settings: Option<PathBuf>, profiles: usize, output: PathBuf) -> sense_reco::Result<()> {
    let settings = match settings {
        Some(path) => {
            let mut toml_str = String::new();
            File::open(path.with_extension("toml"))?.read_to_string(&mut toml_str)?;
            toml::from_str::<SimulationSettings>(&toml_str)?
        }
        None => SimulationSettings::default(),
    };
    let simulator = PhantomSimulator::new(settings)?;
    let recording = RecordedStream::create(&output, &simulator.stream_header())?;
    for (index, profile) in simulator.take(profiles).enumerate() {
        recording.write_profile(index, &profile?)?;
    }
    info!("recorded {profiles} profiles to {}", output.display());
    Ok(())
}
