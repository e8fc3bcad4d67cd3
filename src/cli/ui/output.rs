use console::style;

use crate::ingest::IngestOutcome;
use crate::report::StageOutput;

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    pub fn ingested(&self, outcome: &IngestOutcome) {
        self.success(&format!(
            "Corpus saved: {} ({} chars, source: {})",
            outcome.path.display(),
            outcome.chars,
            outcome.source
        ));
        if outcome.possibly_incomplete {
            self.warning(&format!(
                "Only {} bytes collected; the page may not have loaded completely",
                outcome.bytes
            ));
        }
    }

    pub fn stage(&self, output: &StageOutput) {
        self.success(&format!(
            "Report {} saved: {} ({} chars)",
            output.version.tag(),
            output.markdown.display(),
            output.chars
        ));
        if let Some(docx) = &output.docx {
            println!("  Word: {}", docx.display());
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
