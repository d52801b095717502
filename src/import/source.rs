use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_compression::tokio::bufread::GzipDecoder;
use csv_async::{AsyncReaderBuilder, StringRecord};
use futures::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, BufReader};

use super::error::ImportError;

/// Bytes requested from the decompressor per read.
const READ_CHUNK: usize = 64 * 1024;

pub type SourceReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// A delimited-text row and the header record of its file.
pub type CsvRow = (StringRecord, Arc<StringRecord>);

/// Opens `path` for streaming, decompressing it when it ends in `.gz`.
pub async fn open_file(path: &Path) -> Result<SourceReader, ImportError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| ImportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let reader = BufReader::new(file);

    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut decompressor = GzipDecoder::new(reader);
        decompressor.multiple_members(true);
        Ok(Box::new(BufReader::new(decompressor)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Decodes a sequence of concatenated JSON documents. Documents may be
/// separated by any amount of whitespace, including none.
///
/// Only the document currently being decoded is held in memory. Anything
/// other than whitespace after the last complete document is an error.
pub fn json_records<T, R>(
    reader: R,
    path: PathBuf,
) -> impl Stream<Item = Result<T, ImportError>> + Send
where
    T: DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    documents(JsonState::new(reader, path, Framing::Concatenated))
}

/// Decodes the elements of a single top-level JSON array, one at a time.
/// Anything after the closing bracket is ignored.
pub fn json_array_records<T, R>(
    reader: R,
    path: PathBuf,
) -> impl Stream<Item = Result<T, ImportError>> + Send
where
    T: DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    documents(JsonState::new(reader, path, Framing::Array { opened: false }))
}

fn documents<T, R>(state: JsonState<R>) -> impl Stream<Item = Result<T, ImportError>> + Send
where
    T: DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    futures::stream::try_unfold(state, |mut state| async move {
        match state.next_document().await? {
            Some(document) => Ok(Some((document, state))),
            None => Ok(None),
        }
    })
}

/// How documents are laid out in the file.
#[derive(Debug, Clone, Copy)]
enum Framing {
    Concatenated,
    Array { opened: bool },
    /// The closing bracket of the array has been read.
    Closed,
}

struct JsonState<R> {
    reader: R,
    path: PathBuf,
    buffer: Vec<u8>,
    exhausted: bool,
    framing: Framing,
    /// Buffer length below which an incomplete document is not re-parsed.
    retry_len: usize,
    #[cfg(test)]
    attempts: usize,
}

impl<R: AsyncRead + Unpin> JsonState<R> {
    fn new(reader: R, path: PathBuf, framing: Framing) -> Self {
        JsonState {
            reader,
            path,
            buffer: Vec::with_capacity(READ_CHUNK),
            exhausted: false,
            framing,
            retry_len: 0,
            #[cfg(test)]
            attempts: 0,
        }
    }

    async fn next_document<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ImportError> {
        loop {
            let start = self
                .buffer
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..start);

            if let Framing::Array { opened } = self.framing {
                match (self.buffer.first().copied(), opened) {
                    (Some(b'['), false) => {
                        self.framing = Framing::Array { opened: true };
                        self.buffer.drain(..1);
                        continue;
                    }
                    (Some(b','), true) => {
                        self.buffer.drain(..1);
                        continue;
                    }
                    (Some(b']'), true) => {
                        self.framing = Framing::Closed;
                        self.buffer.clear();
                    }
                    (Some(_), false) => {
                        return Err(self.decode_error("expected a JSON array"));
                    }
                    (None, _) if self.exhausted => {
                        return Err(self.decode_error("unterminated JSON array"));
                    }
                    _ => {}
                }
            }
            if matches!(self.framing, Framing::Closed) {
                return Ok(None);
            }

            if !self.buffer.is_empty() && (self.buffer.len() >= self.retry_len || self.exhausted) {
                #[cfg(test)]
                {
                    self.attempts += 1;
                }
                let mut documents =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<T>();
                match documents.next() {
                    Some(Ok(document)) => {
                        let consumed = documents.byte_offset();
                        self.buffer.drain(..consumed);
                        self.retry_len = 0;
                        return Ok(Some(document));
                    }
                    // the document continues past what has been read so far;
                    // wait for the buffer to double so large documents are
                    // parsed a logarithmic number of times
                    Some(Err(e)) if e.is_eof() => {
                        self.retry_len = self.buffer.len().saturating_mul(2);
                    }
                    Some(Err(e)) => return Err(self.decode_error(&e.to_string())),
                    None => {}
                }
            }

            if self.exhausted {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(self.decode_error("truncated document at end of stream"))
                };
            }

            self.buffer.reserve(READ_CHUNK);
            let read = self
                .reader
                .read_buf(&mut self.buffer)
                .await
                .map_err(|source| ImportError::Read {
                    path: self.path.clone(),
                    source,
                })?;
            if read == 0 {
                self.exhausted = true;
            }
        }
    }

    fn decode_error(&self, message: &str) -> ImportError {
        ImportError::Decode {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}

/// Streams the rows of a delimited text file with a header row, so importers
/// can deserialize each row by column name.
///
/// Structural errors (I/O, invalid UTF-8, ragged rows) end the stream with
/// an error; per-field conversion is left to the caller.
pub async fn csv_records<R>(
    reader: R,
    path: PathBuf,
    delimiter: u8,
) -> Result<impl Stream<Item = Result<CsvRow, ImportError>> + Send, ImportError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = AsyncReaderBuilder::new()
        .delimiter(delimiter)
        .create_reader(reader);

    let headers = reader
        .headers()
        .await
        .map_err(|e| csv_error(&path, e))?
        .clone();
    let headers = Arc::new(headers);

    Ok(reader
        .into_records()
        .map_err(move |e| csv_error(&path, e))
        .map_ok(move |row| (row, headers.clone())))
}

fn csv_error(path: &Path, error: csv_async::Error) -> ImportError {
    let message = error.to_string();
    match error.into_kind() {
        csv_async::ErrorKind::Io(source) => ImportError::Read {
            path: path.to_path_buf(),
            source,
        },
        _ => ImportError::Decode {
            path: path.to_path_buf(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Doc {
        id: u32,
    }

    async fn collect(input: &'static [u8]) -> Vec<Result<Doc, ImportError>> {
        json_records::<Doc, _>(input, PathBuf::from("test.json"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn decodes_concatenated_documents_without_separators() {
        let docs = collect(br#"{"id":1}{"id":2}  {"id":3}"#).await;
        let ids: Vec<u32> = docs.into_iter().map(|d| d.unwrap().id).collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[tokio::test]
    async fn decodes_newline_delimited_documents() {
        let docs = collect(b"{\"id\":1}\n{\"id\":2}\n").await;
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn empty_input_is_a_clean_end_of_stream() {
        assert!(collect(b"").await.is_empty());
        assert!(collect(b" \n\t ").await.is_empty());
    }

    #[tokio::test]
    async fn truncated_document_is_an_error() {
        let docs = collect(br#"{"id":1}{"id":"#).await;
        assert_eq!(docs.len(), 2);
        assert!(docs[0].is_ok());
        assert!(matches!(docs[1], Err(ImportError::Decode { .. })));
    }

    #[tokio::test]
    async fn invalid_document_is_an_error() {
        let docs = collect(br#"{"id":1} garbage {"id":2}"#).await;
        assert!(docs[0].is_ok());
        assert!(matches!(docs[1], Err(ImportError::Decode { .. })));
    }

    #[tokio::test]
    async fn documents_larger_than_one_read_are_reassembled() {
        let padding = "x".repeat(3 * READ_CHUNK);
        let text = format!(r#"{{"id":7,"pad":"{}"}}{{"id":8}}"#, padding);
        let input: &'static [u8] = Box::leak(text.into_bytes().into_boxed_slice());
        let docs = collect(input).await;
        let ids: Vec<u32> = docs.into_iter().map(|d| d.unwrap().id).collect();
        assert_eq!(ids, [7, 8]);
    }

    #[tokio::test]
    async fn decodes_array_elements_one_at_a_time() {
        let input: &'static [u8] = b" [ {\"id\":1},\n {\"id\":2} ,{\"id\":3}]\n";
        let docs: Vec<_> = json_array_records::<Doc, _>(input, PathBuf::from("list.json"))
            .collect()
            .await;
        let ids: Vec<u32> = docs.into_iter().map(|d| d.unwrap().id).collect();
        assert_eq!(ids, [1, 2, 3]);

        let empty: Vec<Result<Doc, _>> =
            json_array_records(&b"[]"[..], PathBuf::from("empty.json")).collect().await;
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn array_framing_errors_are_decode_errors() {
        for input in [&br#"{"id":1}"#[..], &br#"[{"id":1}"#[..], &b""[..]] {
            let docs: Vec<Result<Doc, _>> =
                json_array_records(input, PathBuf::from("bad.json")).collect().await;
            assert!(
                matches!(docs.last(), Some(Err(ImportError::Decode { .. }))),
                "{:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let end = (self.pos + self.step)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            buf.put_slice(&self.data[self.pos..end]);
            self.pos = end;
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn large_documents_are_not_reparsed_on_every_read() {
        let padding = "x".repeat(2 * 1024 * 1024);
        let text = format!(r#"{{"id":7,"pad":"{}"}} {{"id":8}}"#, padding);
        let reader = Trickle {
            data: text.into_bytes(),
            pos: 0,
            step: 4096,
        };
        let mut state = JsonState::new(reader, PathBuf::from("large.json"), Framing::Concatenated);

        let first: Option<Doc> = state.next_document().await.unwrap();
        assert_eq!(first, Some(Doc { id: 7 }));
        // 512 reads of 4 KiB, but only a doubling sequence of parse attempts
        assert!(state.attempts < 20, "{} parse attempts", state.attempts);

        let second: Option<Doc> = state.next_document().await.unwrap();
        assert_eq!(second, Some(Doc { id: 8 }));
        let end: Option<Doc> = state.next_document().await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn gzip_files_are_decompressed_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(br#"{"id":1}{"id":2}"#).unwrap();
        encoder.finish().unwrap();

        let reader = open_file(&path).await.unwrap();
        let docs: Vec<_> = json_records::<Doc, _>(reader, path).collect().await;
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_open_error() {
        let result = open_file(Path::new("/nonexistent/registry.csv.gz")).await;
        assert!(matches!(result, Err(ImportError::Open { .. })));
    }

    #[tokio::test]
    async fn csv_rows_carry_headers() {
        let input: &'static [u8] = b"siren;name\n123456789;ACME\n987654321;\n";
        let rows: Vec<_> = csv_records(input, PathBuf::from("t.csv"), b';')
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(rows.len(), 2);
        let (row, headers) = rows[0].as_ref().unwrap();
        assert_eq!(headers.get(0), Some("siren"));
        assert_eq!(row.get(1), Some("ACME"));
    }

    #[tokio::test]
    async fn ragged_csv_row_is_an_error() {
        let input: &'static [u8] = b"a,b\n1,2\n3\n";
        let rows: Vec<_> = csv_records(input, PathBuf::from("t.csv"), b',')
            .await
            .unwrap()
            .collect()
            .await;
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(ImportError::Decode { .. })));
    }
}
