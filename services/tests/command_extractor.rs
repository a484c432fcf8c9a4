use std::io::Write;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use services::{CommandExtractor, ExtractionConfig, ExtractionEngine, ResultWriter};
use streaming::ContentBuffer;

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_extract_buffered_document() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let document = "<html><body>".to_string() + &"<p>row</p>".repeat(50_000) + "</body></html>";
    let buffer = ContentBuffer::create_in(dir.path(), "page", document.as_bytes(), "text/html", "http://example.org/page")?;

    // Counts the bytes of the decoded document
    let extractor = CommandExtractor::new("bash", ["-c", "printf '<%s> <size> \"%s\" .' \"$1\" \"$(wc -c | tr -d ' ')\""]);
    let sink = SharedSink::default();
    let mut writer = ResultWriter::new(sink.clone());

    extractor.extract(&ExtractionConfig::default(), &buffer, &mut writer, "UTF-8")?;
    writer.close()?;

    let output = String::from_utf8(sink.0.lock().unwrap().clone())?;
    assert_eq!(output, format!("<http://example.org/page> <size> \"{}\" .", document.len()));
    Ok(())
}
