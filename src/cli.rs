use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Extract game assets into an editable file tree.
    #[command(alias = "x")]
    Extract {
        /// Path to the extractor configuration file.
        #[arg(long, default_value = "extractor_config.txt")]
        config: PathBuf,
    },

    /// Load the mods folder into the game's archive set.
    #[command(alias = "i")]
    Inject {
        /// Game installation folder.
        #[arg(long, default_value = ".")]
        gamedir: PathBuf,

        /// Restore vanilla files and stop; loads no mods.
        #[arg(long = "reset-vanilla")]
        reset_vanilla: bool,

        /// Log at debug verbosity.
        #[arg(long)]
        verbose: bool,

        /// Do not launch the game after loading mods.
        #[arg(long = "nolaunch")]
        no_launch: bool,

        /// Proceed with mod loading even if the executable patcher fails.
        /// The game may refuse to start until mods are reset.
        #[arg(long = "forceload")]
        force_load: bool,

        /// Never invoke the executable patcher.
        #[arg(long = "never-patch")]
        never_patch: bool,

        /// Exit immediately instead of pausing so the window stays readable.
        #[arg(long = "no-exit-timer")]
        no_exit_timer: bool,
    },

    /// Bundle a mods working tree into a redistributable zip.
    #[command(alias = "p")]
    Package {
        /// Folder holding the mod files to bundle.
        #[arg(long, default_value = "./mods")]
        mods: PathBuf,

        /// Output zip path.
        #[arg(long, default_value = "ModPackage.zip")]
        output: PathBuf,
    },
}

/// Parse command-line arguments and return the command to execute.
pub fn run() -> Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args.command)
}
