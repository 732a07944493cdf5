use eyre::{Result, WrapErr};
use ips_patcher::ips::{self, Record};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use structopt::clap::ErrorKind;
use structopt::StructOpt;

const USAGE: &str = "Usage: ips-patcher {patch} {file}";

/// ips-patcher: IPS patch tool
///
/// Applies PATCH to FILE in place.
#[derive(StructOpt, Debug)]
#[structopt(name = "ips-patcher")]
struct Opt {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    /// Only log errors
    #[structopt(short, long)]
    quiet: bool,

    /// Print the records of PATCH instead of applying it
    #[structopt(long)]
    list: bool,

    #[structopt(name = "PATCH", parse(from_os_str))]
    arg_patch: Option<PathBuf>,

    #[structopt(name = "FILE", parse(from_os_str))]
    arg_file: Option<PathBuf>,
}

fn init_logger(args: &Opt) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.verbose > 0 {
        builder.filter_level(match args.verbose {
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        });
    } else if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    }
    builder.init();
}

fn open(path: &Path, write: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .open(path)
        .wrap_err_with(|| format!("Could not open {}", path.display()))
}

fn apply(patch_filename: &Path, target_filename: &Path) -> Result<()> {
    let mut patch = BufReader::new(open(patch_filename, true)?);
    // Unbuffered so the writeable check sees the file handle itself.
    let mut target = open(target_filename, true)?;

    ips::apply(&mut patch, &mut target).wrap_err_with(|| {
        format!(
            "Could not apply {} to {}",
            patch_filename.display(),
            target_filename.display()
        )
    })?;

    log::info!(
        "Patched {} with {}",
        target_filename.display(),
        patch_filename.display()
    );
    Ok(())
}

fn list(patch_filename: &Path) -> Result<()> {
    let mut patch = BufReader::new(open(patch_filename, false)?);
    let records = ips::list(&mut patch)
        .wrap_err_with(|| format!("Could not read {}", patch_filename.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for rec in records {
        match rec {
            Record::Literal { offset, size } => {
                writeln!(out, "DATA : {:x}, {:x}", offset, size)?;
            }
            Record::Fill {
                offset,
                size,
                value,
            } => {
                writeln!(out, "RLE  : {:x}, {:x}, {:x}", offset, size, value)?;
            }
        }
    }
    Ok(())
}

fn run(args: Opt) -> Result<()> {
    match (args.list, args.arg_patch, args.arg_file) {
        (false, Some(patch), Some(file)) => apply(&patch, &file),
        (true, Some(patch), None) => list(&patch),
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn main() {
    let args = match Opt::from_args_safe() {
        Ok(args) => args,
        Err(e) if matches!(e.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed) => {
            e.exit()
        }
        Err(_) => {
            println!("{}", USAGE);
            return;
        }
    };
    init_logger(&args);

    match run(args) {
        Ok(_) => (),
        Err(e) => {
            eprintln!("Error: {:?}", e);
            std::process::exit(1);
        }
    }
}
