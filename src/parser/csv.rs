//! `schtasks /query /fo csv /v` listings.

use super::{split_command_line, SourceHint};
use crate::core::types::{Artifact, MechanismKind};
use std::collections::HashMap;

/// Split one CSV record, honouring quotes and `""` escapes.
pub fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Column lookup built from a header record.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn from_header(header: &[String]) -> Self {
        Self(
            header
                .iter()
                .enumerate()
                .map(|(i, name)| (name.trim().to_string(), i))
                .collect(),
        )
    }

    fn get<'a>(&self, record: &'a [String], name: &str) -> Option<&'a str> {
        self.0
            .get(name)
            .and_then(|&i| record.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && *s != "N/A")
    }
}

/// Parse the verbose CSV listing into one artifact per task action.
///
/// `schtasks` repeats the header row for every task folder; those rows are
/// skipped, as are rows shorter than the header.
pub fn parse_schtasks(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    let mut columns: Option<Columns> = None;

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let record = split_record(line);
        if record.iter().any(|f| f == "TaskName") {
            if columns.is_none() {
                columns = Some(Columns::from_header(&record));
            }
            continue;
        }

        let Some(ref cols) = columns else { continue };
        if record.len() < cols.0.len() {
            continue;
        }

        let Some(task_name) = cols.get(&record, "TaskName") else {
            continue;
        };

        let mut artifact = hint
            .artifact(MechanismKind::ScheduledTask, task_name)
            .with_meta("task_name", task_name);

        match cols.get(&record, "Task To Run") {
            Some("COM handler") => {
                artifact = artifact.with_meta("handler", "com");
            }
            Some(command) => {
                let (path, _) = split_command_line(command);
                artifact = artifact.with_command(command);
                if let Some(path) = path {
                    artifact = artifact.with_path(path);
                }
            }
            None => {}
        }

        if let Some(author) = cols.get(&record, "Author") {
            artifact = artifact.with_meta("author", author);
        }
        if let Some(user) = cols.get(&record, "Run As User") {
            artifact = artifact.with_meta("run_as", user);
            artifact.owner = Some(user.to_string());
        }
        if let Some(status) = cols.get(&record, "Status") {
            artifact = artifact.with_meta("status", status);
        }
        if let Some(next_run) = cols.get(&record, "Next Run Time") {
            artifact = artifact.with_meta("next_run", next_run);
        }
        if let Some(state) = cols.get(&record, "Scheduled Task State") {
            artifact = artifact.with_meta("enabled", (state != "Disabled").to_string());
        }
        if let Some(schedule) = cols.get(&record, "Schedule Type") {
            artifact = artifact.with_meta("schedule", schedule);
        }

        artifacts.push(artifact);
    }

    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Platform;
    use crate::parser::Grammar;
    use std::path::PathBuf;

    const HEADER: &str = r#""HostName","TaskName","Next Run Time","Status","Logon Mode","Last Run Time","Last Result","Author","Task To Run","Start In","Comment","Scheduled Task State","Idle Time","Power Management","Run As User","Delete Task If Not Rescheduled","Stop Task If Runs X Hours and X Mins","Schedule","Schedule Type""#;

    fn hint() -> SourceHint {
        SourceHint::new(Platform::Windows, "schtasks", Grammar::SchtasksCsv)
    }

    #[test]
    fn test_split_record_quotes() {
        let fields = split_record(r#""a","b,c","say ""hi""",d"#);
        assert_eq!(fields, vec!["a", "b,c", r#"say "hi""#, "d"]);
    }

    #[test]
    fn test_parse_tasks() {
        let raw = format!(
            "\r\n{HEADER}\r\n{}\r\n{HEADER}\r\n{}\r\n",
            r#""PC","\Updater","N/A","Ready","Interactive only","N/A","0","ACME","""C:\Program Files\Acme\upd.exe"" /quiet","N/A","","Enabled","","","SYSTEM","","","","Daily""#,
            r#""PC","\Microsoft\Windows\Shell\Sync","N/A","Ready","Interactive only","N/A","0","Microsoft","COM handler","N/A","","Disabled","","","Users","","","","At logon time""#,
        );
        let artifacts = parse_schtasks(&raw, &hint());
        assert_eq!(artifacts.len(), 2);

        let upd = &artifacts[0];
        assert_eq!(upd.name, r"\Updater");
        assert_eq!(upd.path, Some(PathBuf::from(r"C:\Program Files\Acme\upd.exe")));
        assert_eq!(upd.owner.as_deref(), Some("SYSTEM"));
        assert_eq!(upd.meta("enabled"), Some("true"));
        assert_eq!(upd.meta("schedule"), Some("Daily"));
        assert_eq!(upd.meta("run_as"), Some("SYSTEM"));
        assert_eq!(upd.meta("status"), Some("Ready"));
        assert_eq!(upd.meta("next_run"), None);

        let com = &artifacts[1];
        assert_eq!(com.meta("handler"), Some("com"));
        assert!(com.command.is_none());
        assert_eq!(com.meta("enabled"), Some("false"));
    }

    #[test]
    fn test_unquoted_task_path_with_spaces() {
        let raw = format!(
            "{HEADER}\r\n{}\r\n",
            r#""PC","\AcmeSync","N/A","Ready","Interactive only","N/A","0","ACME","C:\Program Files\Acme\app.exe --sync","N/A","","Enabled","","","SYSTEM","","","","Daily""#,
        );
        let artifacts = parse_schtasks(&raw, &hint());
        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            artifacts[0].path,
            Some(PathBuf::from(r"C:\Program Files\Acme\app.exe"))
        );
        assert_eq!(
            artifacts[0].command.as_deref(),
            Some(r"C:\Program Files\Acme\app.exe --sync")
        );
    }

    #[test]
    fn test_short_rows_skipped() {
        let raw = format!("{HEADER}\n\"PC\",\"\\broken\"\n");
        assert!(parse_schtasks(&raw, &hint()).is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_schtasks("", &hint()).is_empty());
        assert!(parse_schtasks("INFO: There are no scheduled tasks presently available.", &hint()).is_empty());
    }
}
