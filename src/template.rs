//! Input template rendering
//!
//! The scheduler reads a work-unit input template: one `file_info` per
//! attached file followed by a single `workunit` whose `file_ref`s bind each
//! file number to the name the job opens it under.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::staging::StagedFile;

const INDENT: &str = "    ";

/// Errors from writing the template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to write input template {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered file list for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTemplate {
    files: Vec<StagedFile>,
}

impl InputTemplate {
    /// Template for `files`; position in the slice is the file number.
    pub fn build(files: &[StagedFile]) -> Self {
        Self {
            files: files.to_vec(),
        }
    }

    /// Backing filenames in file-number order.
    pub fn backing_files(&self) -> Vec<String> {
        self.files.iter().map(|f| f.backing.clone()).collect()
    }

    /// Render the XML document.
    pub fn render(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" ?>\n<input_template>\n");

        for (number, file) in self.files.iter().enumerate() {
            let _ = writeln!(xml, "{}<file_info>", INDENT);
            let _ = writeln!(xml, "{0}{0}<number>{1}</number>", INDENT, number);
            for flag in &file.flags {
                let _ = writeln!(xml, "{0}{0}<{1}/>", INDENT, flag.as_str());
            }
            let _ = writeln!(xml, "{}</file_info>", INDENT);
        }

        let _ = writeln!(xml, "{}<workunit>", INDENT);
        for (number, file) in self.files.iter().enumerate() {
            let _ = writeln!(xml, "{0}{0}<file_ref>", INDENT);
            let _ = writeln!(xml, "{0}{0}{0}<file_number>{1}</file_number>", INDENT, number);
            let _ = writeln!(
                xml,
                "{0}{0}{0}<open_name>{1}</open_name>",
                INDENT,
                escape(&file.open_name)
            );
            let _ = writeln!(xml, "{0}{0}{0}<copy_file/>", INDENT);
            let _ = writeln!(xml, "{0}{0}</file_ref>", INDENT);
        }
        let _ = writeln!(xml, "{}</workunit>", INDENT);

        xml.push_str("</input_template>\n");
        xml
    }

    /// Write the rendered template to a uniquely named file in `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, TemplateError> {
        let path = dir.join(format!("boinc2docker_in_{}", uuid::Uuid::new_v4().simple()));
        fs::write(&path, self.render()).map_err(|source| TemplateError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(template = %path.display(), files = self.files.len(), "Wrote input template");
        Ok(path)
    }
}

/// Escape text content for XML.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
