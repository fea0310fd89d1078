use clap::Parser;
use color_eyre::Result;
use fix_quicklook::{preflight, Error, Fixer, Lldb, Process, SERVICE_NAME};

/// Remove the rounded corners from QuickLook image previews.
///
/// Every running QuickLookUIService is patched in memory. The patch is lost
/// when the process exits, so run this again whenever corners come back.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::WarnLevel>,
}

impl Args {
    /// Returns whether every process was patched.
    fn run(self) -> Result<bool> {
        pretty_env_logger::formatted_builder()
            .filter_level(self.verbose.log_level_filter())
            .init();
        let report = Fixer::new(Lldb::default())?
            .run(preflight::check, || Process::all_by_name(SERVICE_NAME))?;
        println!();
        print!("{report}");
        Ok(report.is_complete())
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    match Args::parse().run() {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if let Some(error) = Error::find(&e) {
                eprintln!("{error}");
                std::process::exit(error.exit_code());
            }
            Err(e)
        }
    }
}
