//! HandleSleuth: which processes have these files open?
//!
//! Thin binary entry point. All logic lives in the `handlesleuth-core` crate.

use clap::Parser;
use handlesleuth_core::platform::ObjectTypeInfo;
use handlesleuth_core::FileHandleInfo;
use std::io::Write;

#[derive(Parser, Debug)]
#[command(name = "HandleSleuth", version, about)]
struct Cli {
    /// Only report handles under this directory (case-insensitive prefix).
    directory: Option<String>,

    /// Print results as JSON.
    #[arg(long, conflicts_with = "csv")]
    json: bool,

    /// Print results as CSV.
    #[arg(long)]
    csv: bool,

    /// Per-handle name query deadline in milliseconds.
    #[arg(long, default_value_t = 125)]
    timeout_ms: u64,

    /// Resolver worker threads (default: one per logical CPU).
    #[arg(long)]
    threads: Option<usize>,

    /// Only report handles owned by this process id.
    #[arg(long)]
    pid: Option<u32>,

    /// Print the kernel object type catalog instead of handles.
    #[arg(long, conflicts_with_all = ["directory", "pid", "csv"])]
    list_types: bool,

    /// Skip handles whose access mask is known to hang name queries.
    #[arg(long)]
    skip_hang_prone: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[cfg_attr(not(windows), allow(dead_code))]
#[derive(Debug, Clone, Copy)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl Cli {
    #[cfg_attr(not(windows), allow(dead_code))]
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.csv {
            OutputFormat::Csv
        } else {
            OutputFormat::Table
        }
    }
}

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    use handlesleuth_core::{HandleEngine, ResolverConfig};
    use std::time::Duration;

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for --json / --csv.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("HandleSleuth starting");

    if !handlesleuth_core::platform::is_elevated() {
        tracing::warn!("Not running elevated: handles in other users' and system processes will be missed");
    }

    let mut config =
        ResolverConfig::default().with_name_query_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(threads) = cli.threads {
        config = config.with_worker_threads(threads);
    }
    config = config.with_skip_hang_prone_access(cli.skip_hang_prone);

    let engine = HandleEngine::open(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.list_types {
        let types = engine.catalog().entries();
        if cli.json {
            serde_json::to_writer_pretty(&mut out, &types)?;
            writeln!(out)?;
        } else {
            write_types(&mut out, &types)?;
        }
        return Ok(());
    }

    let mut handles = match cli.pid {
        Some(pid) => engine.open_handles_of(pid, cli.directory.as_deref())?,
        None => engine.open_handles(cli.directory.as_deref())?,
    };
    sort_for_display(&mut handles);

    match cli.format() {
        OutputFormat::Table => write_table(&mut out, &handles)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &handles)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => write_csv(&mut out, &handles)?,
    }

    Ok(())
}

#[cfg(not(windows))]
fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();
    anyhow::bail!("HandleSleuth inspects the Windows kernel handle table and only runs on Windows")
}

#[cfg_attr(not(windows), allow(dead_code))]
fn sort_for_display(handles: &mut [FileHandleInfo]) {
    handles.sort_by(|a, b| {
        a.process_name
            .to_lowercase()
            .cmp(&b.process_name.to_lowercase())
            .then_with(|| a.process_id().cmp(&b.process_id()))
            .then_with(|| a.dos_path.cmp(&b.dos_path))
    });
}

#[cfg_attr(not(windows), allow(dead_code))]
fn write_table(out: &mut impl Write, handles: &[FileHandleInfo]) -> std::io::Result<()> {
    let name_width = handles
        .iter()
        .map(|h| h.process_name.len())
        .max()
        .unwrap_or(0)
        .max("Process".len());

    writeln!(
        out,
        "{:<name_width$}  {:>6}  {:>8}  {:<9}  Path",
        "Process", "PID", "Handle", "Type"
    )?;
    for h in handles {
        writeln!(
            out,
            "{:<name_width$}  {:>6}  {:>#8x}  {:<9}  {}",
            h.process_name,
            h.process_id(),
            h.raw_handle_entry.raw_handle_value,
            h.handle_type.label(),
            h.dos_path
        )?;
    }
    writeln!(out, "\n{} open handle(s)", handles.len())
}

#[cfg_attr(not(windows), allow(dead_code))]
fn write_types(out: &mut impl Write, types: &[ObjectTypeInfo]) -> std::io::Result<()> {
    writeln!(out, "{:>5}  Name", "Index")?;
    for t in types {
        writeln!(out, "{:>5}  {}", t.type_index, t.name)?;
    }
    writeln!(out, "\n{} object type(s)", types.len())
}

#[cfg_attr(not(windows), allow(dead_code))]
fn write_csv(out: &mut impl Write, handles: &[FileHandleInfo]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["process_name", "pid", "handle", "type", "dos_path", "nt_path"])?;
    for h in handles {
        writer.write_record([
            h.process_name.as_str(),
            h.process_id().to_string().as_str(),
            format!("{:#x}", h.raw_handle_entry.raw_handle_value).as_str(),
            h.handle_type.label(),
            h.dos_path.as_str(),
            h.nt_path.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use handlesleuth_core::{HandleEntry, HandleKind};

    fn record(process: &str, pid: u32, path: &str) -> FileHandleInfo {
        FileHandleInfo {
            process_name: process.to_string(),
            dos_path: path.to_string(),
            nt_path: path.replacen("C:", r"\Device\HarddiskVolume3", 1),
            handle_type: HandleKind::File,
            raw_handle_entry: HandleEntry {
                owning_process_id: pid,
                raw_handle_value: 0x44,
                object_type_index: 37,
                access_mask: 0x0012_0089,
                raw_attributes: 0,
            },
        }
    }

    #[test]
    fn cli_parses_directory_and_flags() {
        let cli = Cli::parse_from(["HandleSleuth", r"C:\Program Files\App", "--csv", "--timeout-ms", "250"]);
        assert_eq!(cli.directory.as_deref(), Some(r"C:\Program Files\App"));
        assert!(matches!(cli.format(), OutputFormat::Csv));
        assert_eq!(cli.timeout_ms, 250);
        assert!(!cli.verbose);
    }

    #[test]
    fn json_and_csv_conflict() {
        assert!(Cli::try_parse_from(["HandleSleuth", "--json", "--csv"]).is_err());
    }

    #[test]
    fn display_order_is_process_then_path() {
        let mut handles = vec![
            record("svchost", 900, r"C:\b.log"),
            record("App", 100, r"C:\z.txt"),
            record("app", 100, r"C:\a.txt"),
        ];
        sort_for_display(&mut handles);
        let order: Vec<&str> = handles.iter().map(|h| h.dos_path.as_str()).collect();
        assert_eq!(order, vec![r"C:\a.txt", r"C:\z.txt", r"C:\b.log"]);
    }

    #[test]
    fn csv_has_header_and_one_row_per_handle() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[record("app", 100, r"C:\a.txt")]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "process_name,pid,handle,type,dos_path,nt_path");
        assert_eq!(lines[1], r"app,100,0x44,File,C:\a.txt,\Device\HarddiskVolume3\a.txt");
    }

    #[test]
    fn pid_and_list_types_parse() {
        let cli = Cli::parse_from(["HandleSleuth", "--pid", "1312", r"C:\Logs"]);
        assert_eq!(cli.pid, Some(1312));
        assert!(!cli.list_types);

        let cli = Cli::parse_from(["HandleSleuth", "--list-types", "--json"]);
        assert!(cli.list_types);
        assert!(Cli::try_parse_from(["HandleSleuth", "--list-types", "--pid", "4"]).is_err());
    }

    #[test]
    fn type_listing_shows_index_and_name() {
        let types = [
            ObjectTypeInfo { type_index: 3, name: "Directory".into() },
            ObjectTypeInfo { type_index: 37, name: "File".into() },
        ];
        let mut buf = Vec::new();
        write_types(&mut buf, &types).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Index  Name");
        assert_eq!(lines[1], "    3  Directory");
        assert_eq!(lines[2], "   37  File");
        assert!(text.trim_end().ends_with("2 object type(s)"));
    }

    #[test]
    fn table_ends_with_count() {
        let mut buf = Vec::new();
        write_table(&mut buf, &[record("app", 100, r"C:\a.txt")]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(r"C:\a.txt"));
        assert!(text.trim_end().ends_with("1 open handle(s)"));
    }
}
