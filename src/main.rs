//! Command-line entry point.
//!
//! Each subcommand writes its own log file next to the working directory
//! and runs behind a single error boundary: a failed run reports, flushes
//! the log, and (for the injector) pauses so the window stays readable
//! before closing. Backups created before the failure stay on disk, so the
//! next run restores vanilla files.

use std::path::Path;
use std::process::ExitCode;

use modforge::cli::{self, Commands};
use modforge::codec::default_codec;
use modforge::extract::{self, ExtractConfig};
use modforge::inject::{self, InjectOptions};
use modforge::package::{self, PackageOptions};
use modforge::{audio, logger};
use tracing::{error, info};

fn main() -> ExitCode {
    let command = match cli::run() {
        Ok(command) => command,
        Err(e) => {
            if e.downcast_ref::<clap::Error>().is_none() {
                eprintln!("Error: {e}");
            }
            return ExitCode::FAILURE;
        }
    };

    let (log_path, verbose, pause) = match &command {
        Commands::Extract { .. } => ("extractor_log.txt", false, false),
        Commands::Inject {
            verbose,
            no_exit_timer,
            ..
        } => ("modloader_log.txt", *verbose, !*no_exit_timer),
        Commands::Package { .. } => ("packager_log.txt", false, false),
    };
    if logger::init(Path::new(log_path), verbose).is_err() {
        logger::init_console_only(verbose);
    }
    // Log lines carry no per-line time, so stamp the run once.
    info!("run started {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

    let result = run_command(command);
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(
                "FATAL ERROR: {e}\nIf this interrupted an injection, re-run with no mods loaded \
                 (or --reset-vanilla) to restore your game files"
            );
            ExitCode::FAILURE
        }
    };

    println!("Output written to {log_path}");
    if pause {
        info!("this window will close in 10 seconds");
        std::thread::sleep(std::time::Duration::from_secs(10));
    }
    code
}

fn run_command(command: Commands) -> Result<(), modforge::ModError> {
    let codec = default_codec();
    match command {
        Commands::Extract { config } => {
            let cfg = ExtractConfig::load(&config)?;
            if cfg.run_extractor {
                info!("performing resource extraction");
                extract::run_extraction(&cfg, &codec)?;
            } else {
                info!("skipping resource extraction");
            }
            if cfg.run_audio_extractor {
                info!("performing audio extraction");
                audio::run_audio_extraction(&audio::AudioExtractOptions {
                    sound_dir: cfg.input_dir.join("base/sound"),
                    output_dir: cfg.output_dir.join("audio"),
                    groups: &cfg.audio_types,
                    max_threads: cfg.max_threads,
                })?;
            }
            if cfg.run_deserializer {
                // Turning entity blobs into editable text is the reflection
                // deserializer's job; it runs as its own tool.
                info!("deserialization is handled by the external deserializer");
            }
            Ok(())
        }
        Commands::Inject {
            gamedir,
            reset_vanilla,
            verbose,
            no_launch,
            force_load,
            never_patch,
            no_exit_timer,
        } => {
            info!("modforge injector");
            let opts = InjectOptions {
                game_dir: gamedir,
                reset_vanilla,
                verbose,
                no_launch,
                force_load,
                never_patch,
                no_exit_timer,
            };
            inject::run_injection(&opts, &codec)
        }
        Commands::Package { mods, output } => {
            info!("modforge packager");
            package::run_packager(&PackageOptions {
                mods_dir: mods,
                output_zip: output,
            })?;
            Ok(())
        }
    }
}
