use clap::Parser;
use sense_reco::simulate::SimulationSettings;
use sense_reco::StageParameters;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// path to stage parameters file to write
    parameter_file: PathBuf,
    /// also write default simulation settings next to it
    #[clap(long)]
    simulation: bool,
}

fn main() {
    let args = Args::parse();
    let filename = args.parameter_file.with_extension("toml");
    StageParameters::default().to_toml_file(&filename).expect("Can't write parameter file");
    println!("wrote default parameter file to {}", filename.display());

    if args.simulation {
        let mut toml_string = toml::to_string(&SimulationSettings::default()).expect("Can't serialize");
        toml_string.push('\n');
        let sim_file = filename.with_file_name("simulation.toml");
        let mut f = File::create(&sim_file).expect("Can't create file");
        f.write_all(toml_string.as_bytes()).expect("Can't write file");
        println!("wrote default simulation settings to {}", sim_file.display());
    }
}
