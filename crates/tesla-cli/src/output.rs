//! Output formatting for tesla-cli (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::builder::Builder;
use tesla_client::TelemetrySnapshot;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "table" => Some(Self::Table),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print an arbitrary JSON value in the configured format
    pub fn print_value(&self, value: &serde_json::Value) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
                );
            }
            OutputFormat::Table => match value {
                serde_json::Value::Object(map) => {
                    let mut builder = Builder::default();
                    builder.push_record(["Field", "Value"]);
                    for (key, v) in map {
                        builder.push_record([key.clone(), format_json_value(v)]);
                    }
                    println!("{}", builder.build());
                }
                other => println!("{}", format_json_value(other)),
            },
            OutputFormat::Csv => match value {
                serde_json::Value::Object(map) => {
                    let keys: Vec<String> = map.keys().map(|k| escape_csv(k)).collect();
                    let values: Vec<String> =
                        map.values().map(|v| escape_csv(&format_json_value(v))).collect();
                    println!("{}", keys.join(","));
                    println!("{}", values.join(","));
                }
                other => println!("{}", escape_csv(&format_json_value(other))),
            },
        }
    }
}

// =============================================================================
// Telemetry rendering
// =============================================================================

/// Flattened snapshot for display
#[derive(Debug, Serialize)]
pub struct SnapshotRow {
    pub timestamp: String,
    pub speed: i32,
    pub odometer: f64,
    pub soc: i32,
    pub elevation: i32,
    pub est_heading: i32,
    pub est_lat: f64,
    pub est_lng: f64,
    pub power: i32,
    pub shift_state: String,
    pub range: i32,
    pub est_range: i32,
    pub heading: i32,
}

impl From<&TelemetrySnapshot> for SnapshotRow {
    fn from(s: &TelemetrySnapshot) -> Self {
        Self {
            timestamp: s.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            speed: s.speed,
            odometer: s.odometer,
            soc: s.soc,
            elevation: s.elevation,
            est_heading: s.est_heading,
            est_lat: s.est_lat,
            est_lng: s.est_lng,
            power: s.power,
            shift_state: s.shift().to_string(),
            range: s.range,
            est_range: s.est_range,
            heading: s.heading,
        }
    }
}

/// Incremental writer for a sequence of snapshots
pub struct SnapshotPrinter<'a> {
    ctx: &'a OutputContext,
    header_written: bool,
}

impl<'a> SnapshotPrinter<'a> {
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            header_written: false,
        }
    }

    pub fn print(&mut self, snapshot: &TelemetrySnapshot) {
        let row = SnapshotRow::from(snapshot);
        match self.ctx.format {
            OutputFormat::Table => println!("{}", format_inline(&row)),
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(&row) {
                    println!("{}", json);
                }
            }
            OutputFormat::Csv => {
                let Ok(serde_json::Value::Object(map)) = serde_json::to_value(&row) else {
                    return;
                };
                if !self.header_written {
                    let headers: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                    println!("{}", headers.join(","));
                    self.header_written = true;
                }
                let values: Vec<String> =
                    map.values().map(|v| escape_csv(&format_json_value(v))).collect();
                println!("{}", values.join(","));
            }
        }
    }
}

fn format_inline(row: &SnapshotRow) -> String {
    format!(
        "[{}] {} speed={} soc={}% power={}kW range={} odo={:.1} pos=({:.5}, {:.5}) hdg={}",
        row.timestamp,
        row.shift_state.bold(),
        row.speed,
        row.soc,
        row.power,
        row.range,
        row.odometer,
        row.est_lat,
        row.est_lng,
        row.heading
    )
}

fn format_json_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
