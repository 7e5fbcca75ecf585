use std::path::Path;
use anyhow::{Result, Context};
use super::walker::SupportedFormat;

pub fn extract_text(path: &Path, format: SupportedFormat) -> Result<String> {
    match format {
        SupportedFormat::PlainText => extract_plain_text(path),
        SupportedFormat::Pdf => extract_pdf(path),
    }
}

fn extract_plain_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))
}

fn extract_pdf(path: &Path) -> Result<String> {
    let text = pdf_extract::extract_text(path)
        .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?;
    Ok(text)
}

/// Text of an uploaded PDF held in memory.
pub fn extract_pdf_bytes(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).context("Failed to extract PDF text")
}
