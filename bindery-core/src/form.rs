//! Form processing and multipart support
//!
//! The multipart parser streams the body: text values and small files are
//! buffered in memory, file parts that do not fit the remaining memory
//! budget are spilled to a temporary file that lives as long as the last
//! [`FileHeader`] pointing at it.

use crate::Error;
use bytes::Bytes;
use memchr::memmem;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Default in-memory budget for multipart bodies (32 MiB).
pub const DEFAULT_MAX_MULTIPART_MEMORY: u64 = 32 << 20;

/// Extra room granted to non-file values on top of the memory budget.
pub const FORM_VALUE_ALLOWANCE: u64 = 10 << 20;

const MAX_PART_HEADER_BYTES: usize = 16 << 10;
const READ_CHUNK: usize = 8 << 10;

// ============================================================================
// Uploaded files
// ============================================================================

#[derive(Clone)]
enum FileStorage {
    Memory(Bytes),
    Disk(Arc<NamedTempFile>),
}

/// Handle to an uploaded file part.
///
/// Cloning is cheap; clones share the same buffer or temp file.
#[derive(Clone)]
pub struct FileHeader {
    /// Original filename
    pub filename: String,

    /// Content type (MIME type)
    pub content_type: String,

    /// File size in bytes
    pub size: u64,

    storage: FileStorage,
}

impl FileHeader {
    /// Create an in-memory file handle.
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            size: data.len() as u64,
            storage: FileStorage::Memory(data),
        }
    }

    fn spilled(filename: String, content_type: String, size: u64, file: NamedTempFile) -> Self {
        Self {
            filename,
            content_type,
            size,
            storage: FileStorage::Disk(Arc::new(file)),
        }
    }

    /// Whether the contents are held in memory rather than on disk.
    pub fn in_memory(&self) -> bool {
        matches!(self.storage, FileStorage::Memory(_))
    }

    /// Path of the spill file, if the part went to disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            FileStorage::Memory(_) => None,
            FileStorage::Disk(file) => Some(file.path()),
        }
    }

    /// Open the contents for reading.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.storage {
            FileStorage::Memory(data) => Ok(Box::new(Cursor::new(data.clone()))),
            FileStorage::Disk(file) => Ok(Box::new(file.reopen()?)),
        }
    }

    /// Read the whole contents.
    pub fn bytes(&self) -> io::Result<Bytes> {
        match &self.storage {
            FileStorage::Memory(data) => Ok(data.clone()),
            FileStorage::Disk(_) => {
                let mut data = Vec::with_capacity(self.size as usize);
                self.open()?.read_to_end(&mut data)?;
                Ok(Bytes::from(data))
            }
        }
    }
}

impl fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("in_memory", &self.in_memory())
            .finish()
    }
}

// ============================================================================
// Parsed form
// ============================================================================

/// A parsed `multipart/form-data` body.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub values: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<FileHeader>>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value submitted under `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value submitted under `name`.
    pub fn values(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&FileHeader> {
        self.files.get(name).and_then(|files| files.first())
    }

    /// All files uploaded under `name`.
    pub fn files(&self, name: &str) -> &[FileHeader] {
        self.files.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Streaming multipart form data parser
pub struct MultipartParser {
    boundary: String,
}

impl MultipartParser {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    /// Create a new multipart parser from Content-Type header
    pub fn from_content_type(content_type: &str) -> Result<Self, Error> {
        let parsed: mime::Mime = content_type
            .parse()
            .map_err(|e| Error::Multipart(format!("invalid Content-Type: {}", e)))?;
        let boundary = parsed
            .get_param(mime::BOUNDARY)
            .map(|b| b.as_str().to_string())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::Multipart("missing boundary in Content-Type".to_string()))?;

        Ok(Self::new(boundary))
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Parse a complete form from `reader`.
    ///
    /// File parts are buffered while they fit in `max_memory`; larger ones go
    /// to a temp file. Text values may use `max_memory` plus
    /// [`FORM_VALUE_ALLOWANCE`] in total.
    pub fn parse<R: Read>(&self, reader: R, max_memory: u64) -> Result<MultipartForm, Error> {
        let mut stream = PartStream::new(reader);
        let opening = format!("--{}", self.boundary);
        let delimiter = format!("\r\n--{}", self.boundary);
        let delimiter = memmem::Finder::new(delimiter.as_bytes());

        let mut form = MultipartForm::new();
        let mut file_budget = max_memory;
        let mut value_budget = max_memory.saturating_add(FORM_VALUE_ALLOWANCE);

        // Preamble
        stream.read_until(&memmem::Finder::new(opening.as_bytes()), |_| Ok(()))?;

        loop {
            stream.ensure(2)?;
            if stream.buf.starts_with(b"--") {
                break;
            }
            if !stream.buf.starts_with(b"\r\n") {
                return Err(Error::Multipart("malformed boundary line".to_string()));
            }
            stream.consume(2);

            let headers = stream.read_headers()?;
            let Some(name) = headers.name else {
                stream.read_until(&delimiter, |_| Ok(()))?;
                continue;
            };

            match headers.filename.filter(|f| !f.is_empty()) {
                None => {
                    let mut value = Vec::new();
                    stream.read_until(&delimiter, |chunk| {
                        if (value.len() + chunk.len()) as u64 > value_budget {
                            return Err(Error::Multipart("message too large".to_string()));
                        }
                        value.extend_from_slice(chunk);
                        Ok(())
                    })?;
                    value_budget -= value.len() as u64;
                    let value = String::from_utf8(value)
                        .map_err(|_| Error::Multipart(format!("value of '{}' is not UTF-8", name)))?;
                    form.values.entry(name).or_default().push(value);
                }
                Some(filename) => {
                    let mut sink = FileSink::new(file_budget);
                    stream.read_until(&delimiter, |chunk| sink.write(chunk))?;
                    let content_type = headers
                        .content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    let file = match sink {
                        FileSink { spill: Some(file), written, .. } => {
                            tracing::debug!(
                                field = %name,
                                size = written,
                                "multipart file part spilled to disk"
                            );
                            FileHeader::spilled(filename, content_type, written, file)
                        }
                        FileSink { buf, .. } => {
                            file_budget -= buf.len() as u64;
                            value_budget = value_budget.saturating_sub(buf.len() as u64);
                            FileHeader::from_bytes(filename, content_type, buf)
                        }
                    };
                    form.files.entry(name).or_default().push(file);
                }
            }
        }

        Ok(form)
    }
}

/// Headers of a single part that matter for form binding.
#[derive(Debug, Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(raw: &str) -> Self {
        let mut headers = PartHeaders::default();
        for line in raw.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("Content-Disposition") {
                for attr in value.split(';').skip(1) {
                    let Some((attr_key, attr_value)) = attr.split_once('=') else {
                        continue;
                    };
                    let attr_value = attr_value.trim().trim_matches('"').to_string();
                    match attr_key.trim() {
                        "name" => headers.name = Some(attr_value),
                        "filename" => headers.filename = Some(attr_value),
                        _ => {}
                    }
                }
            } else if key.eq_ignore_ascii_case("Content-Type") {
                headers.content_type = Some(value.trim().to_string());
            }
        }
        headers
    }
}

/// Destination for a file part's bytes.
struct FileSink {
    buf: Vec<u8>,
    limit: u64,
    written: u64,
    spill: Option<NamedTempFile>,
}

impl FileSink {
    fn new(limit: u64) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            written: 0,
            spill: None,
        }
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.written += chunk.len() as u64;
        if let Some(file) = self.spill.as_mut() {
            file.write_all(chunk)?;
            return Ok(());
        }
        if self.written > self.limit {
            let mut file = NamedTempFile::new()?;
            file.write_all(&self.buf)?;
            file.write_all(chunk)?;
            self.buf = Vec::new();
            self.spill = Some(file);
            return Ok(());
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

/// Buffered view over the body used by the parser.
struct PartStream<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: Read> PartStream<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    fn fill(&mut self) -> Result<bool, Error> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = loop {
            match self.reader.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n > 0)
    }

    fn ensure(&mut self, len: usize) -> Result<(), Error> {
        while self.buf.len() < len {
            if !self.fill()? {
                return Err(unexpected_eof());
            }
        }
        Ok(())
    }

    fn consume(&mut self, len: usize) {
        self.buf.drain(..len);
    }

    /// Feed everything before the next `pattern` to `sink` and skip the pattern.
    fn read_until<F>(&mut self, pattern: &memmem::Finder<'_>, mut sink: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        let needle_len = pattern.needle().len();
        loop {
            if let Some(pos) = pattern.find(&self.buf) {
                sink(&self.buf[..pos])?;
                self.consume(pos + needle_len);
                return Ok(());
            }
            // Keep a tail that might be the start of a split pattern.
            if self.buf.len() >= needle_len {
                let emit = self.buf.len() + 1 - needle_len;
                sink(&self.buf[..emit])?;
                self.consume(emit);
            }
            if !self.fill()? {
                return Err(unexpected_eof());
            }
        }
    }

    fn read_headers(&mut self) -> Result<PartHeaders, Error> {
        self.ensure(2)?;
        if self.buf.starts_with(b"\r\n") {
            self.consume(2);
            return Ok(PartHeaders::default());
        }

        let mut raw = Vec::new();
        self.read_until(&memmem::Finder::new(b"\r\n\r\n"), |chunk| {
            if raw.len() + chunk.len() > MAX_PART_HEADER_BYTES {
                return Err(Error::Multipart("part headers too large".to_string()));
            }
            raw.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(PartHeaders::parse(&String::from_utf8_lossy(&raw)))
    }
}

fn unexpected_eof() -> Error {
    Error::Multipart("unexpected end of body".to_string())
}
