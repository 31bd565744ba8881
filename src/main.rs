use std::process::ExitCode;

use starfield::{Preset, Simulation};

const USAGE: &str = "usage: starfield [random-space|colliding-galaxies] [particle-count]";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let mut sim = Simulation::new();

    if let Some(preset) = args.next() {
        match preset.parse::<Preset>() {
            Ok(preset) => sim = sim.with_preset(preset),
            Err(err) => {
                log::error!("{}", err);
                eprintln!("{}", USAGE);
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(count) = args.next() {
        match count.parse::<u32>() {
            Ok(count) => sim = sim.with_particle_count(count),
            Err(err) => {
                log::error!("invalid particle count `{}`: {}", count, err);
                eprintln!("{}", USAGE);
                return ExitCode::FAILURE;
            }
        }
    }

    match sim.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
