//! Info command - inspect a GPX file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use trackforge::gpx::GpxImporter;
use trackforge::meta::TagRegistry;
use trackforge::model::{Item, ItemKind};
use trackforge::report::ImportReport;

use crate::error::CliError;

/// Run the info command.
pub fn run(path: &Path) -> Result<(), CliError> {
    let file = File::open(path)?;
    let mut registry = TagRegistry::new();
    let mut importer = GpxImporter::new(&mut registry);
    let mut report = ImportReport::new();
    report.set_file(path.display().to_string());

    println!("File: {}", path.display());
    let result = importer.load(BufReader::new(file), &mut report);
    let needs_resave = importer.needs_resave();

    let root = match result {
        Ok(root) => root,
        Err(error) => {
            // The partial report still tells the user what went wrong where.
            print_findings(&report);
            return Err(error.into());
        }
    };

    if let Some(name) = root.name() {
        println!("Name: {name}");
    }
    let counts = Counts::collect(&root);
    println!("  Tracks:    {}", counts.tracks);
    println!("  Routes:    {}", counts.routes);
    println!("  Waypoints: {}", counts.waypoints);
    println!("  Points:    {}", counts.points);

    print_findings(&report);
    if needs_resave {
        println!();
        println!("This file uses undeclared namespace prefixes; saving it again will normalise them.");
    }
    Ok(())
}

fn print_findings(report: &ImportReport) {
    if report.is_clean() {
        return;
    }
    println!();
    println!(
        "Findings ({} warnings, {} errors):",
        report.warning_count(),
        report.error_count()
    );
    for message in report.to_message_list() {
        println!("  {message}");
    }
}

#[derive(Debug, Default)]
struct Counts {
    tracks: usize,
    routes: usize,
    waypoints: usize,
    points: usize,
}

impl Counts {
    fn collect(root: &Item) -> Self {
        let mut counts = Self::default();
        root.walk(&mut |item| match item.kind() {
            ItemKind::Track => counts.tracks += 1,
            ItemKind::Route => counts.routes += 1,
            ItemKind::Waypoint(_) => counts.waypoints += 1,
            ItemKind::Trackpoint(_) | ItemKind::Routepoint(_) => counts.points += 1,
            _ => {}
        });
        counts
    }
}
