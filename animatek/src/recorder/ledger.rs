use animatek_ipc::SessionRecord;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use super::{local_date, ExternalError};

pub const LEDGER_FILE: &str = "sessions_log.csv";

pub const HEADER: &str = "Categoria,DuracionMin,Lenguaje,Fecha,Sesion,DuracionHHMMSS";

/// Append one session line, creating the file with a header row if absent
pub fn append_row(path: &Path, record: &SessionRecord) -> Result<(), ExternalError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let fresh = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if fresh {
        writeln!(file, "{HEADER}")?;
    }

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(file);
    writer.write_record([
        record.category.clone(),
        record.duration_min.to_string(),
        record.language.clone(),
        local_date(record),
        record.session_type.clone(),
        hhmmss(record.duration_sec),
    ])?;
    writer.flush()?;
    Ok(())
}

fn hhmmss(total: i64) -> String {
    let total = total.max(0);
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
