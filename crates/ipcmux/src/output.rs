use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ipcmux_wire::{InterfaceId, MessageFlags};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Two-column key/value table.
pub fn print_table(rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (key, value) in rows {
        table.add_row(vec![key.to_string(), value.clone()]);
    }
    println!("{table}");
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn interface_kind(id: InterfaceId) -> &'static str {
    if !id.is_valid() {
        "PIPE_CONTROL"
    } else if id.is_master() {
        "MASTER"
    } else {
        "ASSOCIATED"
    }
}

pub fn flag_names(flags: MessageFlags) -> Vec<&'static str> {
    flags.iter_names().map(|(name, _)| name).collect()
}
