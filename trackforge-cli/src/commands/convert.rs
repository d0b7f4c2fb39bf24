//! Convert command - import a GPX file and write it back out normalised.
//!
//! Re-saving rewrites legacy GPX 1.0 constructs as 1.1, declares any
//! namespace prefixes the source left undeclared, and routes waypoints
//! through their folder extensions.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use trackforge::config::ConfigFile;
use trackforge::gpx::{GpxExporter, GpxImporter};
use trackforge::meta::TagRegistry;
use trackforge::report::ImportReport;

use crate::error::CliError;

/// Run the convert command.
pub fn run(input: &Path, output: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load().unwrap_or_default();

    let mut registry = TagRegistry::new();
    let mut importer = GpxImporter::new(&mut registry);
    let mut report = ImportReport::new();
    report.set_file(input.display().to_string());

    let file = File::open(input)?;
    let root = importer.load(BufReader::new(file), &mut report)?;
    let needs_resave = importer.needs_resave();

    if !report.is_clean() {
        println!("Import findings for {}:", input.display());
        for message in report.to_message_list() {
            println!("  {message}");
        }
    }

    let mut exporter = GpxExporter::new(&registry);
    if let Some(creator) = config.gpx.creator.clone() {
        exporter = exporter.with_creator(creator);
    }

    let out = File::create(output)?;
    exporter.save_to(BufWriter::new(out), &root)?;

    println!("Wrote {}", output.display());
    if needs_resave {
        println!("Undeclared namespace prefixes from the source are now declared.");
    }
    Ok(())
}
