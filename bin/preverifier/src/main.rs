use preverifier::jvm::class_graph::{CompositeClassPath, DirectoryClassPath, TypeResolver};
use preverifier::preverify::{
    ArchiveEntry, ArchiveListener, ArchivePreverifier, FrameFormat, Policy,
    PreverificationResults,
};

use clap::{value_parser, Arg, ArgAction, Command};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;
use walkdir::WalkDir;

/// Prints every error as soon as its class is done
struct ReportingListener {
    classes: usize,
    failed: usize,
}

impl ArchiveListener for ReportingListener {
    fn file_begin(&mut self, archive: &str) {
        log::info!("Preverifying '{}'", archive);
    }

    fn entry_end(
        &mut self,
        _archive: &str,
        entry: &str,
        results: Option<&PreverificationResults>,
    ) -> bool {
        if let Some(results) = results {
            self.classes += 1;
            if results.is_error_result() {
                self.failed += 1;
                eprintln!("Error preverifying {}", entry);
                for error in results.errors() {
                    eprintln!("  {}", error);
                }
            }
        }
        true
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let matches = Command::new("Class file preverifier")
        .version(clap::crate_version!())
        .about("Preverify class files for CLDC-style virtual machines")
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("DIRECTORY")
                .value_parser(value_parser!(PathBuf))
                .default_value("output")
                .help("Sets the directory preverified classes are written to"),
        )
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .value_name("DIRECTORY")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Adds a directory of classes used to resolve types (repeatable)"),
        )
        .arg(
            Arg::new("cldc10")
                .long("cldc10")
                .action(ArgAction::SetTrue)
                .help("Use the CLDC 1.0 policy (no floating point) instead of CLDC 1.1"),
        )
        .arg(
            Arg::new("frame-format")
                .long("frame-format")
                .value_name("FORMAT")
                .value_parser(["stackmaptable", "stackmap"])
                .help("Sets the attribute frames are written to (defaults to the policy's)"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Sets the input class file or directory of classes")
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .index(1),
        )
        .get_matches();

    let mut policy = if matches.get_flag("cldc10") {
        Policy::cldc_1_0()
    } else {
        Policy::cldc_1_1()
    };
    match matches.get_one::<String>("frame-format").map(String::as_str) {
        Some("stackmaptable") => policy.frame_format = FrameFormat::StackMapTable,
        Some("stackmap") => policy.frame_format = FrameFormat::StackMap,
        _ => (),
    }

    let input_path: &PathBuf = matches
        .get_one("INPUT")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing input"))?;
    let output_path: PathBuf = matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("output"));

    // Input classes can refer to each other, so the input directory is on the class path too
    let mut class_path = CompositeClassPath::new();
    if input_path.is_dir() {
        class_path.push(DirectoryClassPath::new(input_path));
    }
    for directory in matches.get_many::<PathBuf>("classpath").into_iter().flatten() {
        class_path.push(DirectoryClassPath::new(directory));
    }
    let resolver = TypeResolver::new(class_path);

    let entries = read_entries(input_path)?;
    let mut listener = ReportingListener {
        classes: 0,
        failed: 0,
    };
    let archive_name = input_path.to_string_lossy();
    let outcome =
        ArchivePreverifier::new(&policy, &resolver).preverify(&archive_name, entries, &mut listener);

    for entry in &outcome.entries {
        let path = output_path.join(&entry.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        log::debug!("Writing '{}'", path.display());
        fs::write(&path, &entry.bytes)?;
    }

    println!(
        "Preverified {} classes ({} failed)",
        listener.classes, listener.failed
    );
    if !outcome.is_success() {
        exit(1);
    }
    Ok(())
}

/// Input entries, named by their path relative to the input (with `/` separators)
fn read_entries(input_path: &Path) -> io::Result<Vec<ArchiveEntry>> {
    if input_path.is_file() {
        let name = input_path
            .file_name()
            .map_or_else(|| String::from("unnamed"), |name| name.to_string_lossy().into_owned());
        return Ok(vec![ArchiveEntry::new(name, fs::read(input_path)?)]);
    }

    let mut entries = vec![];
    for dir_entry in WalkDir::new(input_path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = dir_entry
            .path()
            .strip_prefix(input_path)
            .unwrap_or_else(|_| dir_entry.path());
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(ArchiveEntry::new(name, fs::read(dir_entry.path())?));
    }
    Ok(entries)
}
